use crate::error::{BoxError, ObserveError};
use crate::signal::ChangeSignal;
use crate::sink::{ErrorHandler, ErrorReport, ErrorRoute, ErrorSink};
use lookout_common::{Document, MutationRecord, ObserveConfig};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A detected change of document location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlChange {
    pub previous_url: String,
    pub current_url: String,
    /// First record of the batch that revealed the change.
    pub mutation: Option<MutationRecord>,
}

#[derive(Default)]
pub struct NavigationOptions {
    pub activity: Option<String>,
    pub on_error: Option<ErrorHandler>,
}

impl NavigationOptions {
    pub fn activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(ErrorReport) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }
}

/// Stops a running navigation watcher. Dropping it leaves the watcher running.
pub struct NavigationHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NavigationHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

type Delivery = (UrlChange, oneshot::Sender<()>);

/// Reports each distinct document location exactly once.
///
/// While the callback runs the watcher is unsubscribed, so DOM edits the
/// callback makes are never observed. The observer re-subscribes only after
/// the callback task acknowledges completion.
pub struct NavigationWatcher<D: Document + ?Sized> {
    document: Arc<D>,
    sink: Arc<dyn ErrorSink>,
}

impl<D: Document + ?Sized> NavigationWatcher<D> {
    pub fn new(document: Arc<D>, sink: Arc<dyn ErrorSink>) -> Self {
        Self { document, sink }
    }

    /// Arms immediately with the current location as the previous URL.
    ///
    /// A failure to subscribe is routed once to `options.on_error` (or the
    /// sink) and the returned handle is already finished. Errors and panics
    /// from `on_change` are logged and do not stop the watcher.
    pub fn watch<F>(&self, options: NavigationOptions, on_change: F) -> NavigationHandle
    where
        F: FnMut(UrlChange) -> Result<(), BoxError> + Send + 'static,
    {
        let NavigationOptions { activity, on_error } = options;
        let route = ErrorRoute::new(activity.clone(), on_error, self.sink.clone());
        let cancel = CancellationToken::new();

        let previous_url = self.document.location();
        let signal = match arm(self.document.as_ref()) {
            Ok(signal) => signal,
            Err(error) => {
                warn!(
                    activity = activity.as_deref(),
                    %error,
                    "Navigation watcher failed to start"
                );
                route.deliver(error, Some(previous_url));
                return NavigationHandle { cancel, task: None };
            }
        };
        debug!(activity = activity.as_deref(), url = %previous_url, "Navigation watcher armed");

        let (tx, rx) = mpsc::channel::<Delivery>(1);
        tokio::spawn(deliver_changes(rx, on_change, activity.clone()));

        let observer = Observer {
            document: self.document.clone(),
            previous_url,
            activity,
            cancel: cancel.clone(),
            route: Some(route),
            deliveries: tx,
        };
        let task = tokio::spawn(observer.run(signal));
        NavigationHandle {
            cancel,
            task: Some(task),
        }
    }
}

fn arm<D: Document + ?Sized>(document: &D) -> Result<ChangeSignal, ObserveError> {
    Ok(ChangeSignal::observe(
        document,
        document.root(),
        ObserveConfig::default(),
    )?)
}

struct Observer<D: Document + ?Sized> {
    document: Arc<D>,
    previous_url: String,
    activity: Option<String>,
    cancel: CancellationToken,
    route: Option<ErrorRoute>,
    deliveries: mpsc::Sender<Delivery>,
}

impl<D: Document + ?Sized> Observer<D> {
    async fn run(mut self, mut signal: ChangeSignal) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                batch = signal.next_batch() => batch,
            };
            let Some(batch) = batch else {
                debug!(
                    activity = self.activity.as_deref(),
                    "Document closed the navigation subscription"
                );
                break;
            };

            let current_url = self.document.location();
            if current_url == self.previous_url {
                continue;
            }

            // Suspended: nothing the callback does to the tree is observed.
            signal.stop();
            let change = UrlChange {
                previous_url: std::mem::replace(&mut self.previous_url, current_url.clone()),
                current_url,
                mutation: batch.into_iter().next(),
            };
            info!(
                activity = self.activity.as_deref(),
                from = %change.previous_url,
                to = %change.current_url,
                "Location changed"
            );

            let (ack, done) = oneshot::channel();
            if self.deliveries.send((change, ack)).await.is_err() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = done => {}
            }

            signal = match arm(self.document.as_ref()) {
                Ok(signal) => signal,
                Err(error) => {
                    warn!(
                        activity = self.activity.as_deref(),
                        %error,
                        "Navigation watcher failed to re-arm"
                    );
                    if let Some(route) = self.route.take() {
                        route.deliver(error, Some(self.document.location()));
                    }
                    return;
                }
            };
        }
        signal.stop();
        debug!(activity = self.activity.as_deref(), "Navigation watcher stopped");
    }
}

async fn deliver_changes<F>(
    mut rx: mpsc::Receiver<Delivery>,
    mut on_change: F,
    activity: Option<String>,
) where
    F: FnMut(UrlChange) -> Result<(), BoxError>,
{
    while let Some((change, ack)) = rx.recv().await {
        match catch_unwind(AssertUnwindSafe(|| on_change(change))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(activity = activity.as_deref(), error = %err, "URL change callback failed");
            }
            Err(_) => {
                error!(activity = activity.as_deref(), "URL change callback panicked");
            }
        }
        let _ = ack.send(());
    }
}
