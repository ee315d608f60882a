use crate::condition::Condition;
use crate::error::{ValidationError, WaitError};
use crate::poller::PredicatePoller;
use crate::sink::{ErrorHandler, ErrorReport, ErrorRoute, ErrorSink};
use crate::watcher::{ElementMap, ElementWatcher};
use futures::future::try_join_all;
use lookout_common::Document;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MIN_TIMEOUT: Duration = Duration::from_millis(1000);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One joined wait: the conditions plus how failures are routed.
pub struct WaitOptions {
    pub conditions: Vec<Condition>,
    pub activity: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub on_error: Option<ErrorHandler>,
}

impl WaitOptions {
    pub fn new(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            conditions: conditions.into_iter().collect(),
            activity: None,
            timeout: crate::watcher::DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            on_error: None,
        }
    }

    pub fn activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(ErrorReport) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout < MIN_TIMEOUT {
            return Err(ValidationError::TimeoutTooShort {
                min: MIN_TIMEOUT,
                actual: self.timeout,
            });
        }
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(ValidationError::PollIntervalTooShort {
                min: MIN_POLL_INTERVAL,
                actual: self.poll_interval,
            });
        }
        Ok(())
    }
}

/// Owned handle to a running joined wait.
///
/// `cancel` settles the wait without invoking either callback and releases
/// every subscription and timer it holds. Dropping the handle does not cancel.
pub struct WaitHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WaitHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits until the outcome callback (if any) has run.
    pub async fn finished(self) {
        let Some(task) = self.task else {
            return;
        };
        if let Err(error) = task.await {
            if error.is_panic() {
                warn!(%error, "Wait callback panicked");
            }
        }
    }
}

/// Fans conditions out to element watchers and predicate pollers and joins them.
pub struct ConditionAggregator<D: Document + ?Sized> {
    document: Arc<D>,
    sink: Arc<dyn ErrorSink>,
}

impl<D: Document + ?Sized> ConditionAggregator<D> {
    pub fn new(document: Arc<D>, sink: Arc<dyn ErrorSink>) -> Self {
        Self { document, sink }
    }

    /// Validates `options`, then waits in the background for every condition.
    ///
    /// `on_success` receives the merged selector mapping once all conditions
    /// hold; predicates contribute no entry. The first failure goes to
    /// `options.on_error`, or the sink when none was given. Exactly one of the
    /// two fires unless the wait is cancelled. With no conditions `on_success`
    /// runs before this returns.
    pub fn run<F>(&self, options: WaitOptions, on_success: F) -> Result<WaitHandle, ValidationError>
    where
        F: FnOnce(ElementMap) + Send + 'static,
    {
        options.validate()?;
        let WaitOptions {
            conditions,
            activity,
            timeout,
            poll_interval,
            on_error,
        } = options;

        let cancel = CancellationToken::new();
        if conditions.is_empty() {
            debug!(activity = activity.as_deref(), "No conditions to wait for");
            on_success(ElementMap::new());
            return Ok(WaitHandle { cancel, task: None });
        }

        let document = self.document.clone();
        let route = ErrorRoute::new(activity.clone(), on_error, self.sink.clone());
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(activity = activity.as_deref(), "Wait cancelled");
                    return;
                }
                outcome = join(document.clone(), &conditions, timeout, poll_interval) => outcome,
            };
            match outcome {
                Ok(elements) => {
                    info!(
                        activity = activity.as_deref(),
                        selectors = elements.len(),
                        "All conditions satisfied"
                    );
                    on_success(elements);
                }
                Err(error) => {
                    warn!(activity = activity.as_deref(), %error, "Conditions not satisfied");
                    route.deliver(error, Some(document.location()));
                }
            }
        });

        Ok(WaitHandle {
            cancel,
            task: Some(task),
        })
    }

    /// The joined wait itself, without callbacks or validation.
    pub async fn wait(
        &self,
        conditions: &[Condition],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ElementMap, WaitError> {
        join(self.document.clone(), conditions, timeout, poll_interval).await
    }
}

/// Logical AND over all conditions. The first failure settles the join and
/// drops the remaining waits, which releases their subscriptions and timers.
async fn join<D: Document + ?Sized>(
    document: Arc<D>,
    conditions: &[Condition],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ElementMap, WaitError> {
    let watcher = ElementWatcher::new(document);
    let waits = conditions.iter().map(|condition| {
        let watcher = &watcher;
        async move {
            match condition {
                Condition::Selector(selector) => {
                    watcher.watch(selector.clone(), timeout).await.map(Some)
                }
                Condition::Predicate(predicate) => {
                    PredicatePoller::poll(predicate, poll_interval, timeout)
                        .await
                        .map(|()| None)
                }
            }
        }
    });

    let mut merged = ElementMap::new();
    for elements in try_join_all(waits).await?.into_iter().flatten() {
        merged.extend(elements);
    }
    Ok(merged)
}
