use lookout_common::{DocumentError, Selector};
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Asynchronous failure of a selector or predicate wait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The deadline passed. `pending` lists the selectors that never matched;
    /// it is empty when a predicate timed out.
    #[error("{}", timeout_message(.pending))]
    Timeout { pending: Vec<Selector> },

    #[error("Predicate threw: {message}")]
    Predicate { message: String },

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

fn timeout_message(pending: &[Selector]) -> String {
    if pending.is_empty() {
        "Timeout while waiting for condition".to_string()
    } else {
        format!("Timeout while waiting for selectors: {}", Selector::join(pending))
    }
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

/// Malformed call-time arguments. Always returned to the caller, never reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Timeout must be at least {}ms, got {}ms", .min.as_millis(), .actual.as_millis())]
    TimeoutTooShort { min: Duration, actual: Duration },

    #[error("Poll interval must be at least {}ms, got {}ms", .min.as_millis(), .actual.as_millis())]
    PollIntervalTooShort { min: Duration, actual: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserveError {
    #[error("Target element \"{selector}\" not found.")]
    TargetNotFound { selector: Selector },

    #[error("Cannot observe: {0}")]
    Document(#[from] DocumentError),
}

/// Anything the engine routes to an error handler or sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Observe(#[from] ObserveError),
}
