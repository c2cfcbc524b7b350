//! Data capture configuration.
//!
//! Loaded from YAML, overlaid with `HT_DATA_CAPTURE_*` environment variables,
//! and published process-wide through an [`ArcSwap`] so hot paths read it
//! without locking. The capture engine consults it only when a stream is
//! first attached.

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CaptureError, Result};

/// Default cap on captured body size (128 KiB).
pub const DEFAULT_BODY_MAX_SIZE_BYTES: usize = 128 * 1024;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HT_DATA_CAPTURE_";

/// Content types captured when none are configured.
pub fn default_content_types() -> Vec<String> {
    ["json", "graphql", "xml", "x-www-form-urlencoded", "text/"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Request/response toggle pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageToggle {
    /// Capture on the request side
    pub request: bool,
    /// Capture on the response side
    pub response: bool,
}

impl Default for MessageToggle {
    fn default() -> Self {
        Self {
            request: true,
            response: true,
        }
    }
}

impl MessageToggle {
    /// Toggle value for one direction.
    pub fn enabled(&self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.request,
            Direction::Response => self.response,
        }
    }
}

/// Which side of an exchange a body or header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound to the server / outbound from the client.
    Request,
    /// Outbound from the server / inbound to the client.
    Response,
}

impl Direction {
    /// Lowercase label used in attribute keys and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// Data capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataCaptureConfig {
    /// HTTP header capture
    pub http_headers: MessageToggle,
    /// HTTP body capture
    pub http_body: MessageToggle,
    /// RPC metadata capture
    pub rpc_metadata: MessageToggle,
    /// RPC body capture
    pub rpc_body: MessageToggle,
    /// Maximum number of bytes (or chars) kept per body
    pub body_max_size_bytes: usize,
    /// Content-type fragments eligible for capture
    pub allowed_content_types: Vec<String>,
}

impl Default for DataCaptureConfig {
    fn default() -> Self {
        Self {
            http_headers: MessageToggle::default(),
            http_body: MessageToggle::default(),
            rpc_metadata: MessageToggle::default(),
            rpc_body: MessageToggle::default(),
            body_max_size_bytes: DEFAULT_BODY_MAX_SIZE_BYTES,
            allowed_content_types: default_content_types(),
        }
    }
}

/// Top-level document shape: settings live under `data_capture`.
#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    data_capture: DataCaptureConfig,
}

impl DataCaptureConfig {
    /// Parses a YAML document.
    ///
    /// Accepts either the bare settings or a document with a top-level
    /// `data_capture` key. An empty document yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_yml::Value =
            serde_yml::from_str(yaml).map_err(|e| CaptureError::ConfigParse {
                details: e.to_string(),
            })?;
        let nested = value
            .as_mapping()
            .is_some_and(|m| m.contains_key("data_capture"));
        let config = if nested {
            serde_yml::from_value::<ConfigDocument>(value).map(|doc| doc.data_capture)
        } else {
            serde_yml::from_value::<DataCaptureConfig>(value)
        }
        .map_err(|e| CaptureError::ConfigParse {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| CaptureError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Loads an optional file, then applies process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `HT_DATA_CAPTURE_*` overrides read through `lookup`.
    ///
    /// Values that do not parse are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((name, value)) = var("BODY_MAX_SIZE_BYTES") {
            match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.body_max_size_bytes = size,
                _ => warn!(var = %name, value = %value, "Ignoring invalid body size override"),
            }
        }

        if let Some((_, value)) = var("ALLOWED_CONTENT_TYPES") {
            let types: Vec<String> = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !types.is_empty() {
                self.allowed_content_types = types;
            }
        }

        let toggles: [(&str, &mut MessageToggle); 4] = [
            ("HTTP_HEADERS", &mut self.http_headers),
            ("HTTP_BODY", &mut self.http_body),
            ("RPC_METADATA", &mut self.rpc_metadata),
            ("RPC_BODY", &mut self.rpc_body),
        ];
        for (group, toggle) in toggles {
            for (side, slot) in [("REQUEST", &mut toggle.request), ("RESPONSE", &mut toggle.response)] {
                if let Some((name, value)) = var(&format!("{group}_{side}")) {
                    match parse_bool(&value) {
                        Some(flag) => *slot = flag,
                        None => warn!(var = %name, value = %value, "Ignoring invalid boolean override"),
                    }
                }
            }
        }
    }

    /// Checks that the settings can drive capture.
    pub fn validate(&self) -> Result<()> {
        if self.body_max_size_bytes == 0 {
            return Err(CaptureError::Config {
                details: "body_max_size_bytes must be greater than zero".to_string(),
            });
        }
        if self.allowed_content_types.iter().all(|t| t.trim().is_empty()) {
            return Err(CaptureError::Config {
                details: "allowed_content_types must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Whether bodies in `direction` are captured for HTTP (`rpc == false`) or RPC.
    pub fn body_enabled(&self, direction: Direction, rpc: bool) -> bool {
        if rpc {
            self.rpc_body.enabled(direction)
        } else {
            self.http_body.enabled(direction)
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

static CURRENT: Lazy<ArcSwap<DataCaptureConfig>> =
    Lazy::new(|| ArcSwap::from_pointee(DataCaptureConfig::default()));

/// Returns the process-wide configuration.
pub fn current() -> Arc<DataCaptureConfig> {
    CURRENT.load_full()
}

/// Replaces the process-wide configuration.
pub fn install(config: DataCaptureConfig) {
    info!(
        body_max_size_bytes = config.body_max_size_bytes,
        allowed = ?config.allowed_content_types,
        "Installing data capture config"
    );
    CURRENT.store(Arc::new(config));
}
