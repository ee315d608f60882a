use crate::error::DocumentError;
use crate::mutation::{MutationBatch, NodeId, ObserveOptions};
use crate::selector::Selector;
use tokio::sync::mpsc;

/// The document capabilities the engine consumes.
///
/// Queries must reflect the tree synchronously at call time. Hosts deliver
/// mutation batches through the [`Subscription`] returned by `subscribe` and
/// must drop the sending side when the subscription's unsubscribe action runs.
pub trait Document: Send + Sync + 'static {
    /// The node that whole-document observers attach to.
    fn root(&self) -> NodeId;

    fn query_all(&self, selector: &Selector) -> Result<Vec<NodeId>, DocumentError>;

    fn query_one(&self, selector: &Selector) -> Result<Option<NodeId>, DocumentError> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    /// Current location (URL) of the document.
    fn location(&self) -> String;

    fn subscribe(
        &self,
        target: NodeId,
        options: ObserveOptions,
    ) -> Result<Subscription, DocumentError>;
}

pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// A live mutation subscription. Dropping it unsubscribes.
pub struct Subscription {
    batches: mpsc::UnboundedReceiver<MutationBatch>,
    unsubscribe: Option<Unsubscribe>,
}

impl Subscription {
    pub fn new(
        batches: mpsc::UnboundedReceiver<MutationBatch>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            batches,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next batch, or `None` once the host has closed the channel.
    pub async fn recv(&mut self) -> Option<MutationBatch> {
        self.batches.recv().await
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }

    /// Hands the release action to another owner. Hosts close the batch
    /// channel once it runs, so `recv` still terminates.
    pub fn take_unsubscribe(&mut self) -> Option<Unsubscribe> {
        self.unsubscribe.take()
    }

    /// Releases the host-side registration. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        self.batches.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let mut subscription = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.unsubscribe();
        subscription.unsubscribe();
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_subscription_yields_none() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, || {});
        subscription.unsubscribe();
        assert!(tx.send(Vec::new()).is_err());
        assert!(subscription.recv().await.is_none());
    }
}
