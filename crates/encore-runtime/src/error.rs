use thiserror::Error;

/// Errors reported by the worker pool, the periodic scheduler and the
/// async runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Job was dropped before it produced a result")]
    Disconnected,

    #[error("Invalid schedule for task {name:?}: {reason}")]
    InvalidSchedule { name: String, reason: &'static str },

    #[error("Failed to start {what}: {reason}")]
    Startup { what: &'static str, reason: String },

    #[error("Runtime has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
