//! Capture lifecycle controller.
//!
//! Drives each capture context through attach → accumulate → finalize in
//! response to enter/exit notifications from intercepted call sites:
//!
//! ```text
//! Unattached --attach--> Attached --transfer--> Accumulating
//!                           |                        |
//!                           +--eof / close / async / forced drain--> Finalized
//! ```
//!
//! Finalization renders the buffer once and writes it to the bound span;
//! every later signal for that context is a no-op. Nothing here returns an
//! error to the instrumented code: failures are logged and the body is
//! simply not captured.

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::any::Any;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::config::{self, DataCaptureConfig, Direction};
use crate::error::Result;
use crate::context::{CaptureContext, FinalizeReason, Finalized, Transfer};
use crate::metrics;
use crate::policy::{self, BodyKind, ContentPolicy};
use crate::reentrancy::{CallDepthGuard, OperationCategory};
use crate::registry::AssociationRegistry;
use crate::span::{keys, AttributeKey, SharedSpan};

/// Chunk size used when draining the remainder of a stream.
const DRAIN_CHUNK: usize = 8 * 1024;

/// Protocol family of a captured body; selects config toggles and keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP request/response bodies.
    Http,
    /// RPC message bodies.
    Rpc,
}

/// Everything needed to attach a capture context to an instance.
#[derive(Clone)]
pub struct AttachRequest<'a> {
    /// Span the body is written to
    pub span: SharedSpan,
    /// Request or response side
    pub direction: Direction,
    /// HTTP or RPC
    pub protocol: Protocol,
    /// Byte or char stream
    pub kind: BodyKind,
    /// Raw `Content-Type` value
    pub content_type: Option<&'a str>,
    /// Raw `Content-Length` value
    pub content_length: Option<&'a str>,
    /// Attribute key override; defaults to the body key for the direction
    pub attribute_key: Option<AttributeKey>,
}

impl<'a> AttachRequest<'a> {
    /// Request for a byte-oriented body.
    pub fn new(
        span: SharedSpan,
        direction: Direction,
        protocol: Protocol,
        content_type: Option<&'a str>,
    ) -> Self {
        Self {
            span,
            direction,
            protocol,
            kind: BodyKind::Bytes,
            content_type,
            content_length: None,
            attribute_key: None,
        }
    }

    /// HTTP request body.
    pub fn http_request(span: SharedSpan, content_type: Option<&'a str>) -> Self {
        Self::new(span, Direction::Request, Protocol::Http, content_type)
    }

    /// HTTP response body.
    pub fn http_response(span: SharedSpan, content_type: Option<&'a str>) -> Self {
        Self::new(span, Direction::Response, Protocol::Http, content_type)
    }

    /// Sets the `Content-Length` used to size the buffer.
    pub fn content_length(mut self, content_length: Option<&'a str>) -> Self {
        self.content_length = content_length;
        self
    }

    /// Marks the stream as char-oriented.
    pub fn chars(mut self) -> Self {
        self.kind = BodyKind::Chars;
        self
    }

    /// Overrides the attribute key.
    pub fn attribute(mut self, key: AttributeKey) -> Self {
        self.attribute_key = Some(key);
        self
    }

    /// Attribute key the body will be written to.
    pub fn resolved_key(&self) -> AttributeKey {
        if let Some(key) = &self.attribute_key {
            return key.clone();
        }
        match (self.protocol, self.direction) {
            (Protocol::Http, Direction::Request) => keys::HTTP_REQUEST_BODY,
            (Protocol::Http, Direction::Response) => keys::HTTP_RESPONSE_BODY,
            (Protocol::Rpc, Direction::Request) => keys::RPC_REQUEST_BODY,
            (Protocol::Rpc, Direction::Response) => keys::RPC_RESPONSE_BODY,
        }
    }
}

/// Config snapshot plus the policy derived from it.
#[derive(Debug)]
struct Settings {
    config: DataCaptureConfig,
    policy: ContentPolicy,
}

impl Settings {
    fn new(config: DataCaptureConfig) -> Self {
        let policy = ContentPolicy::from_config(&config);
        Self { config, policy }
    }
}

/// Lifecycle controller: owns the association registry and applies config
/// and content policy at attach time.
pub struct CaptureController {
    registry: AssociationRegistry,
    settings: ArcSwap<Settings>,
}

impl CaptureController {
    /// Controller with its own registry and the given config.
    pub fn new(config: DataCaptureConfig) -> Self {
        Self {
            registry: AssociationRegistry::new(),
            settings: ArcSwap::from_pointee(Settings::new(config)),
        }
    }

    /// Controller seeded from the process-wide config.
    pub fn from_current() -> Self {
        Self::new((*config::current()).clone())
    }

    /// Swaps the config; contexts already attached keep their settings.
    pub fn reconfigure(&self, config: DataCaptureConfig) {
        self.settings.store(Arc::new(Settings::new(config)));
    }

    /// Re-reads the process-wide config.
    pub fn reload(&self) {
        self.reconfigure((*config::current()).clone());
    }

    /// Current config snapshot.
    pub fn config(&self) -> DataCaptureConfig {
        self.settings.load().config.clone()
    }

    /// Association registry.
    pub fn registry(&self) -> &AssociationRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Attach / lookup / detach
    // ------------------------------------------------------------------

    /// Attaches a capture context to `instance`.
    ///
    /// Returns `None` when capture is disabled for this direction or the
    /// content type is not eligible; nothing is registered in that case. A
    /// second attach for an instance with a live context returns that
    /// context.
    pub fn attach<T>(&self, instance: &Arc<T>, request: AttachRequest<'_>) -> Option<Arc<CaptureContext>>
    where
        T: Any + Send + Sync,
    {
        let key = request.resolved_key();
        let attached = self.registry.get_or_insert_with(instance, || {
            let context = self.build_context(&request, key.clone())?;
            Some(Arc::new(context))
        });
        match attached {
            Some((context, true)) => {
                metrics::record_started(&key);
                debug!(attribute = %key, charset = %context.charset(), "Attached body capture");
                Some(context)
            }
            Some((context, false)) => Some(context),
            None => {
                metrics::record_skipped(&key);
                None
            }
        }
    }

    /// Builds a detached context for wrapper-owned streams.
    ///
    /// Same gating as [`attach`](Self::attach), without touching the registry.
    pub fn context_for(&self, request: AttachRequest<'_>) -> Option<Arc<CaptureContext>> {
        let key = request.resolved_key();
        match self.build_context(&request, key.clone()) {
            Some(context) => {
                metrics::record_started(&key);
                Some(Arc::new(context))
            }
            None => {
                metrics::record_skipped(&key);
                None
            }
        }
    }

    fn build_context(&self, request: &AttachRequest<'_>, key: AttributeKey) -> Option<CaptureContext> {
        let settings = self.settings.load();
        let rpc = request.protocol == Protocol::Rpc;
        if !settings.config.body_enabled(request.direction, rpc) {
            debug!(attribute = %key, "Body capture disabled by config");
            return None;
        }
        let decision = settings.policy.decide(request.content_type, request.kind);
        if !decision.is_capture() {
            debug!(
                attribute = %key,
                content_type = request.content_type.unwrap_or(""),
                "Content type not eligible for capture"
            );
            return None;
        }
        let max = settings.config.body_max_size_bytes;
        Some(CaptureContext::new(
            request.span.clone(),
            key,
            decision.charset,
            request.kind,
            max,
            policy::initial_capacity(request.content_length, max),
        ))
    }

    /// Registers `outer`, a stream wrapping `inner`, under the context
    /// already attached to `inner`.
    ///
    /// A wrapped payload keeps a single context: the wrapper never gets a
    /// second one. Returns `None` if `inner` is not being captured.
    pub fn attach_chained<T, U>(&self, outer: &Arc<T>, inner: &Arc<U>) -> Option<Arc<CaptureContext>>
    where
        T: Any + Send + Sync,
        U: Any,
    {
        let context = self.registry.lookup(inner)?;
        if let Some(existing) = self.registry.lookup(outer) {
            return Some(existing);
        }
        self.registry.insert(outer, context.clone());
        Some(context)
    }

    /// Live context for `instance`.
    pub fn lookup<T: Any>(&self, instance: &Arc<T>) -> Option<Arc<CaptureContext>> {
        self.registry.lookup(instance)
    }

    /// Removes `instance` from the registry and abandons its context without
    /// emitting anything.
    pub fn detach<T: Any>(&self, instance: &Arc<T>) {
        if let Some(context) = self.registry.detach(instance) {
            if context.abandon() {
                debug!(attribute = %context.attribute_key(), "Abandoned body capture");
            }
        }
    }

    // ------------------------------------------------------------------
    // Intercepted operations
    // ------------------------------------------------------------------

    /// Enters an intercepted operation on `instance`.
    ///
    /// Returns `None` when the instance is not captured. The returned frame
    /// tracks call depth for `category` until it is consumed or dropped.
    pub fn enter<T: Any>(&self, instance: &Arc<T>, category: OperationCategory) -> Option<OperationFrame> {
        let context = self.registry.lookup(instance)?;
        Some(OperationFrame::for_context(context, category))
    }

    /// Finalizes the context of `instance` and removes its entry.
    pub fn finalize<T: Any>(&self, instance: &Arc<T>, reason: FinalizeReason) -> Option<Finalized> {
        let context = self.registry.detach(instance)?;
        context.finalize(reason)
    }

    /// Explicit close of `instance`.
    pub fn on_close<T: Any>(&self, instance: &Arc<T>) -> Option<Finalized> {
        self.finalize(instance, FinalizeReason::Closed)
    }

    /// Reads whatever `source` still holds into the context of `instance`
    /// and finalizes it.
    ///
    /// Used at the request-handling boundary for consumers that stop before
    /// end-of-stream. `source` must be the stream underlying `instance`;
    /// only its unread remainder is consumed. A missing or finalized context
    /// makes this a no-op that leaves `source` untouched.
    pub fn force_drain<T, R>(&self, instance: &Arc<T>, source: &mut R) -> Option<Finalized>
    where
        T: Any,
        R: Read + ?Sized,
    {
        let context = self.registry.lookup(instance)?;
        self.registry.detach(instance);
        drain_into(&context, source);
        context.finalize(FinalizeReason::ForcedDrain)
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new(DataCaptureConfig::default())
    }
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

static GLOBAL: Lazy<CaptureController> = Lazy::new(CaptureController::from_current);

/// Process-wide controller, seeded from [`config::current`].
///
/// Call [`CaptureController::reload`] after installing a new config.
pub fn global() -> &'static CaptureController {
    &GLOBAL
}

/// Reads the rest of `source` into `context`.
///
/// Nested intercepted reads on this thread are suppressed for the duration,
/// so a wrapper passed as `source` cannot record the same bytes again. A read
/// error stops the drain; what was read so far stays captured.
pub(crate) fn drain_into<R: Read + ?Sized>(context: &CaptureContext, source: &mut R) {
    if context.is_finalized() {
        return;
    }
    let _bytes = CallDepthGuard::enter(OperationCategory::ByteRead);
    let _chars = CallDepthGuard::enter(OperationCategory::CharRead);
    match read_remaining(context, source) {
        Ok(drained) => {
            debug!(attribute = %context.attribute_key(), drained, "Drained stream remainder");
        }
        Err(err) => warn!(
            attribute = %context.attribute_key(),
            kind = err.kind(),
            error = %err,
            "Forced drain stopped early; capturing what was read"
        ),
    }
}

/// Copies `source` to EOF into `context`, chunk by chunk.
///
/// Char contexts decode each chunk as it arrives. Once the buffer has
/// overflowed, the rest of the source is read and discarded.
fn read_remaining<R: Read + ?Sized>(context: &CaptureContext, source: &mut R) -> Result<usize> {
    let mut decoder = match context.kind() {
        BodyKind::Bytes => None,
        BodyKind::Chars => Some(context.charset().stream_decoder()),
    };
    let mut chunk = vec![0u8; DRAIN_CHUNK];
    let mut drained = 0usize;
    loop {
        let n = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        drained += n;
        if context.is_truncated() {
            continue;
        }
        match decoder.as_mut() {
            None => context.record(Transfer::Bytes(&chunk[..n])),
            Some(decoder) => context.record(Transfer::Text(&decoder.decode(&chunk[..n], false))),
        };
    }
    if let Some(decoder) = decoder.as_mut() {
        if !context.is_truncated() {
            context.record(Transfer::Text(&decoder.decode(&[], true)));
        }
    }
    Ok(drained)
}

// ============================================================================
// Operation frames
// ============================================================================

/// One intercepted operation in flight.
///
/// Only the outermost frame of a category mutates the buffer or finalizes;
/// nested frames are inert. Dropping a frame without consuming it simply
/// exits the call depth. Registry entries of a finalized context are
/// dropped lazily by later lookups and sweeps.
pub struct OperationFrame {
    context: Arc<CaptureContext>,
    guard: CallDepthGuard,
}

impl OperationFrame {
    /// Enters `category` for `context`.
    pub fn for_context(context: Arc<CaptureContext>, category: OperationCategory) -> Self {
        Self {
            context,
            guard: CallDepthGuard::enter(category),
        }
    }

    /// Whether this frame is the outermost of its category.
    pub fn is_outermost(&self) -> bool {
        self.guard.is_outermost()
    }

    /// Context this frame feeds.
    pub fn context(&self) -> &Arc<CaptureContext> {
        &self.context
    }

    /// Records data moved by the operation. Empty transfers are no-ops.
    pub fn transferred(self, transfer: Transfer<'_>) -> usize {
        if !self.is_outermost() {
            return 0;
        }
        self.context.record(transfer)
    }

    /// The operation reported end-of-stream.
    pub fn end_of_stream(self) -> Option<Finalized> {
        self.complete(FinalizeReason::EndOfStream)
    }

    /// The stream was closed.
    pub fn closed(self) -> Option<Finalized> {
        self.complete(FinalizeReason::Closed)
    }

    /// Finalizes the context if this is the outermost frame.
    pub fn complete(self, reason: FinalizeReason) -> Option<Finalized> {
        if !self.is_outermost() {
            return None;
        }
        self.context.finalize(reason)
    }
}

// ============================================================================
// Async completion
// ============================================================================

/// Completion listener for asynchronously processed exchanges.
///
/// Share it through an `Arc` with whichever thread delivers the completion.
/// The first complete or error signal finalizes every watched context; a
/// timeout only means "no useful completion yet" and changes nothing.
#[derive(Debug, Default)]
pub struct AsyncCompletion {
    handled: AtomicBool,
    contexts: Mutex<Vec<Arc<CaptureContext>>>,
}

impl AsyncCompletion {
    /// Empty listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener watching `contexts`.
    pub fn watching<I>(contexts: I) -> Self
    where
        I: IntoIterator<Item = Arc<CaptureContext>>,
    {
        Self {
            handled: AtomicBool::new(false),
            contexts: Mutex::new(contexts.into_iter().collect()),
        }
    }

    /// Adds a context, e.g. a response stream obtained after the hand-off.
    ///
    /// A context added after completion is finalized immediately.
    pub fn watch(&self, context: Arc<CaptureContext>) {
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        if self.handled.load(Ordering::Acquire) {
            drop(contexts);
            context.finalize(FinalizeReason::AsyncComplete);
            return;
        }
        contexts.push(context);
    }

    /// Processing started asynchronously. No-op.
    pub fn on_start_async(&self) {}

    /// Processing completed.
    pub fn on_complete(&self) -> usize {
        self.finish(FinalizeReason::AsyncComplete)
    }

    /// Processing failed or was cancelled; whatever was captured is kept.
    pub fn on_error(&self) -> usize {
        self.finish(FinalizeReason::AsyncError)
    }

    /// Processing timed out. Neither finalizes nor fails.
    pub fn on_timeout(&self) {
        debug!("Async timeout; capture left open");
    }

    /// Whether a complete or error signal has been handled.
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    fn finish(&self, reason: FinalizeReason) -> usize {
        let contexts = {
            let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
            if self.handled.swap(true, Ordering::AcqRel) {
                return 0;
            }
            std::mem::take(&mut *contexts)
        };
        contexts
            .iter()
            .filter(|context| context.finalize(reason).is_some())
            .count()
    }
}
