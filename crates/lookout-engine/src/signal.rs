use lookout_common::{
    Document, DocumentError, MutationBatch, NodeId, ObserveConfig, Subscription, Unsubscribe,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::debug;

struct HandleState {
    target: NodeId,
    stopped: AtomicBool,
    unsubscribe: Mutex<Option<Unsubscribe>>,
    wake: Notify,
}

/// Stop control for one change subscription. Clones share the same subscription.
#[derive(Clone)]
pub struct ObserverHandle {
    state: Arc<HandleState>,
}

impl ObserverHandle {
    /// Unsubscribes. Idempotent; safe after the signal has already fired or stopped.
    pub fn stop(&self) {
        if self.state.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(unsubscribe) = self.state.unsubscribe.lock().take() {
            unsubscribe();
        }
        self.state.wake.notify_one();
        debug!(target_node = %self.state.target, "Change signal stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("target", &self.state.target)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A mutation subscription on one target node, delivering raw batches.
///
/// Dropping the signal stops it.
pub struct ChangeSignal {
    subscription: Subscription,
    handle: ObserverHandle,
}

impl ChangeSignal {
    /// Subscribes to `target` with `config` merged over the defaults.
    /// Fails synchronously when the host cannot observe the target.
    pub fn observe<D: Document + ?Sized>(
        document: &D,
        target: NodeId,
        config: ObserveConfig,
    ) -> Result<Self, DocumentError> {
        let options = config.resolve();
        let mut subscription = document.subscribe(target, options)?;
        let unsubscribe = subscription.take_unsubscribe();
        debug!(target_node = %target, ?options, "Change signal armed");
        Ok(Self {
            subscription,
            handle: ObserverHandle {
                state: Arc::new(HandleState {
                    target,
                    stopped: AtomicBool::new(false),
                    unsubscribe: Mutex::new(unsubscribe),
                    wake: Notify::new(),
                }),
            },
        })
    }

    /// Subscribes and drives `on_batch` from a spawned task until the
    /// returned handle is stopped or the host closes the subscription.
    pub fn spawn<D, F>(
        document: &D,
        target: NodeId,
        config: ObserveConfig,
        mut on_batch: F,
    ) -> Result<ObserverHandle, DocumentError>
    where
        D: Document + ?Sized,
        F: FnMut(MutationBatch) + Send + 'static,
    {
        let mut signal = Self::observe(document, target, config)?;
        let handle = signal.handle();
        tokio::spawn(async move {
            while let Some(batch) = signal.next_batch().await {
                on_batch(batch);
            }
        });
        Ok(handle)
    }

    /// Next batch, or `None` once stopped. A batch already queued when
    /// `stop` runs is discarded.
    pub async fn next_batch(&mut self) -> Option<MutationBatch> {
        if self.handle.is_stopped() {
            return None;
        }
        let batch = tokio::select! {
            biased;
            _ = self.handle.state.wake.notified() => None,
            batch = self.subscription.recv() => batch,
        };
        batch.filter(|_| !self.handle.is_stopped())
    }

    pub fn handle(&self) -> ObserverHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }
}

impl Drop for ChangeSignal {
    fn drop(&mut self) {
        self.handle.stop();
    }
}
