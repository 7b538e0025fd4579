use std::time::Duration;

/// Errors returned by the [`EventBus`](crate::bus::EventBus) and its
/// middleware.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// `start()` was called on a bus that is already running.
    #[error("Event bus already started")]
    AlreadyStarted,

    /// `start()` was called outside a Tokio runtime.
    #[error("Event bus must be started from within a Tokio runtime")]
    NoRuntime,

    /// In-flight deliveries did not finish within the drain timeout.
    #[error("Event bus shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The caller cancelled the shutdown wait before deliveries drained.
    #[error("Event bus shutdown canceled")]
    ShutdownCanceled,

    /// The intake queue is closed because the bus was shut down.
    #[error("Event bus intake queue is closed")]
    Closed,

    /// A middleware refused to pass the event on.
    #[error("Middleware {middleware} rejected event: {reason}")]
    Rejected {
        middleware: &'static str,
        reason: String,
    },
}

impl BusError {
    /// Convenience constructor for middleware rejections.
    pub fn rejected(middleware: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            middleware,
            reason: reason.into(),
        }
    }
}
