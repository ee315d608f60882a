use crate::error::{BoxError, WaitError};
use lookout_common::Selector;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type PredicateFn = dyn Fn() -> Result<bool, BoxError> + Send + Sync;

/// Zero-argument boolean check evaluated on the poll cadence.
///
/// A predicate that returns `Err` or panics counts as having thrown.
#[derive(Clone)]
pub struct Predicate(Arc<PredicateFn>);

impl Predicate {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move || Ok(check())))
    }

    pub fn fallible<F>(check: F) -> Self
    where
        F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(check))
    }

    pub fn evaluate(&self) -> Result<bool, WaitError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.0)())) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(WaitError::Predicate {
                message: error.to_string(),
            }),
            Err(payload) => Err(WaitError::Predicate {
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "predicate panicked".to_string()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// One entry in a joined wait.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Satisfied once the selector has at least one match.
    Selector(Selector),
    /// Satisfied once the predicate returns true.
    Predicate(Predicate),
}

impl Condition {
    pub fn selector(selector: impl Into<Selector>) -> Self {
        Condition::Selector(selector.into())
    }

    pub fn predicate<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Predicate::new(check))
    }

    pub fn fallible<F>(check: F) -> Self
    where
        F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Condition::Predicate(Predicate::fallible(check))
    }
}

impl From<&str> for Condition {
    fn from(selector: &str) -> Self {
        Condition::Selector(selector.into())
    }
}

impl From<Selector> for Condition {
    fn from(selector: Selector) -> Self {
        Condition::Selector(selector)
    }
}

impl From<Predicate> for Condition {
    fn from(predicate: Predicate) -> Self {
        Condition::Predicate(predicate)
    }
}
