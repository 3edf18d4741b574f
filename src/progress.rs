// Progress reporting for long-running operations
// Callers receive (current, total, message) updates through a callback and
// never poll engine internals

use std::sync::Arc;

/// A single progress update.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

/// Type alias for progress callback function
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Tracks progress of an operation and notifies an optional callback.
#[derive(Default)]
pub struct ProgressTracker {
    callback: Option<Arc<ProgressCallback>>,
    current: u64,
    total: u64,
    message: String,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: Arc<ProgressCallback>) -> Self {
        Self {
            callback: Some(callback),
            ..Self::default()
        }
    }

    /// Begin a new phase with a fresh total and status message.
    pub fn start(&mut self, total: u64, message: impl Into<String>) {
        self.current = 0;
        self.total = total;
        self.message = message.into();
        self.notify();
    }

    /// Advance to a new position, optionally replacing the message.
    pub fn update(&mut self, current: u64, message: Option<&str>) {
        self.current = current;
        if let Some(message) = message {
            self.message = message.to_string();
        }
        self.notify();
    }

    fn notify(&self) {
        if let Some(ref callback) = self.callback {
            (callback.as_ref())(ProgressEvent {
                current: self.current,
                total: self.total,
                message: self.message.clone(),
            });
        }
    }
}
