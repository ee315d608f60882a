use crate::aggregator::{ConditionAggregator, WaitHandle, WaitOptions};
use crate::condition::Condition;
use crate::config::LookoutConfig;
use crate::error::{BoxError, ValidationError, WaitError};
use crate::navigation::{NavigationHandle, NavigationOptions, NavigationWatcher, UrlChange};
use crate::observe::{ObserveNodeOptions, observe_node};
use crate::signal::ObserverHandle;
use crate::sink::{ErrorSink, LogSink, sink_from_config};
use crate::watcher::{ElementMap, ElementWatcher, IntoSelectors};
use lookout_common::{Document, MutationRecord};
use std::sync::Arc;
use std::time::Duration;

/// Caller-facing entry point bound to one document and one error sink.
pub struct Lookout<D: Document + ?Sized> {
    document: Arc<D>,
    sink: Arc<dyn ErrorSink>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<D: Document + ?Sized> Clone for Lookout<D> {
    fn clone(&self) -> Self {
        Self {
            document: self.document.clone(),
            sink: self.sink.clone(),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
        }
    }
}

impl<D: Document + ?Sized> Lookout<D> {
    pub fn new(document: Arc<D>, sink: Arc<dyn ErrorSink>) -> Self {
        let defaults = crate::config::WaitDefaults::default();
        Self {
            document,
            sink,
            timeout: defaults.timeout(),
            poll_interval: defaults.poll_interval(),
        }
    }

    /// Logs failures that have no handler of their own.
    pub fn with_log_sink(document: Arc<D>) -> Self {
        Self::new(document, Arc::new(LogSink))
    }

    /// Wait defaults and sink taken from `config`.
    pub fn from_config(document: Arc<D>, config: &LookoutConfig) -> Self {
        Self {
            document,
            sink: sink_from_config(&config.reporting),
            timeout: config.waits.timeout(),
            poll_interval: config.waits.poll_interval(),
        }
    }

    pub fn document(&self) -> &Arc<D> {
        &self.document
    }

    /// [`WaitOptions`] seeded with this instance's timeout and poll interval.
    pub fn wait_options(&self, conditions: impl IntoIterator<Item = Condition>) -> WaitOptions {
        WaitOptions::new(conditions)
            .timeout(self.timeout)
            .poll_interval(self.poll_interval)
    }

    /// Resolves with every selector's matches, or fails after `timeout`
    /// (the configured default when `None`).
    pub async fn watch_elements(
        &self,
        selectors: impl IntoSelectors,
        timeout: Option<Duration>,
    ) -> Result<ElementMap, WaitError> {
        ElementWatcher::new(self.document.clone())
            .watch(selectors, timeout.unwrap_or(self.timeout))
            .await
    }

    /// [`watch_elements`](Self::watch_elements) that also hands a failure to
    /// `on_error`. The error is still returned.
    pub async fn watch_elements_with_handler<F>(
        &self,
        selectors: impl IntoSelectors,
        timeout: Option<Duration>,
        on_error: F,
    ) -> Result<ElementMap, WaitError>
    where
        F: FnOnce(&WaitError),
    {
        ElementWatcher::new(self.document.clone())
            .watch_with_handler(selectors, timeout.unwrap_or(self.timeout), on_error)
            .await
    }

    pub fn wait_for_conditions<F>(
        &self,
        options: WaitOptions,
        on_success: F,
    ) -> Result<WaitHandle, ValidationError>
    where
        F: FnOnce(ElementMap) + Send + 'static,
    {
        ConditionAggregator::new(self.document.clone(), self.sink.clone()).run(options, on_success)
    }

    pub fn observe_node<F>(
        &self,
        options: ObserveNodeOptions,
        callback: F,
    ) -> Option<ObserverHandle>
    where
        F: FnMut(&MutationRecord) + Send + 'static,
    {
        observe_node(&self.document, options, self.sink.clone(), callback)
    }

    pub fn on_url_change<F>(&self, options: NavigationOptions, on_change: F) -> NavigationHandle
    where
        F: FnMut(UrlChange) -> Result<(), BoxError> + Send + 'static,
    {
        NavigationWatcher::new(self.document.clone(), self.sink.clone()).watch(options, on_change)
    }
}
