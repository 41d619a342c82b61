//! Poll-able cancellation for streaming operations.
//!
//! Add, remove and extract check the token between buffered chunks, so a
//! cancelled operation stops within one `buffer_size` of work. Progress
//! reporting layers can wrap a token instead of threading observers through
//! the core.

use crate::error::{Result, ZipError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap, clonable cancellation flag shared between the caller and an
/// in-flight archive operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The operation holding a clone of this token
    /// fails with `ZipError::Cancelled` at its next chunk boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ZipError::Cancelled)
        } else {
            Ok(())
        }
    }
}
