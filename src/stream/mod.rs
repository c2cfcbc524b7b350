//! Stream adapters that own the intercepted call sites.
//!
//! Each adapter wraps a stream obtained at a boundary the host controls and
//! carries its capture context directly, so no registry lookup happens per
//! operation. Operations go through an [`OperationFrame`] so that adapters
//! stacked on the same payload record each unit once.
//!
//! [`OperationFrame`]: crate::controller::OperationFrame

mod body;
mod reader;
mod writer;

pub use body::CaptureBody;
pub use reader::{CaptureBufReader, CaptureReader, Lines};
pub use writer::{CaptureTextWriter, CaptureWriter};

use std::sync::Arc;

use crate::context::CaptureContext;

fn live(context: &Option<Arc<CaptureContext>>) -> Option<&Arc<CaptureContext>> {
    context.as_ref().filter(|context| !context.is_finalized())
}
