use crate::error::WaitError;
use crate::signal::ChangeSignal;
use lookout_common::{Document, NodeId, ObserveConfig, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Matched nodes per selector, in document order.
pub type ElementMap = BTreeMap<Selector, Vec<NodeId>>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// One selector or a list of them.
pub trait IntoSelectors {
    fn into_selectors(self) -> Vec<Selector>;
}

impl IntoSelectors for Selector {
    fn into_selectors(self) -> Vec<Selector> {
        vec![self]
    }
}

impl IntoSelectors for &str {
    fn into_selectors(self) -> Vec<Selector> {
        vec![Selector::from(self)]
    }
}

impl IntoSelectors for String {
    fn into_selectors(self) -> Vec<Selector> {
        vec![Selector::from(self)]
    }
}

impl<T: Into<Selector>> IntoSelectors for Vec<T> {
    fn into_selectors(self) -> Vec<Selector> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Selector>, const N: usize> IntoSelectors for [T; N] {
    fn into_selectors(self) -> Vec<Selector> {
        self.into_iter().map(Into::into).collect()
    }
}

/// Waits until every selector in a set has at least one match.
pub struct ElementWatcher<D: Document + ?Sized> {
    document: Arc<D>,
}

impl<D: Document + ?Sized> Clone for ElementWatcher<D> {
    fn clone(&self) -> Self {
        Self {
            document: self.document.clone(),
        }
    }
}

impl<D: Document + ?Sized> ElementWatcher<D> {
    pub fn new(document: Arc<D>) -> Self {
        Self { document }
    }

    /// Resolves once every selector matches, with the matches captured at
    /// detection time. Rejects with [`WaitError::Timeout`] naming the
    /// selectors still unmatched when `timeout` elapses.
    ///
    /// Selectors already present are resolved by a synchronous pre-check; when
    /// that satisfies the whole set no subscription is ever opened.
    pub async fn watch(
        &self,
        selectors: impl IntoSelectors,
        timeout: Duration,
    ) -> Result<ElementMap, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut pending = dedup(selectors.into_selectors());
        let mut resolved = ElementMap::new();

        self.sweep(&mut pending, &mut resolved)?;
        if pending.is_empty() {
            debug!(selectors = resolved.len(), "Selectors already present");
            return Ok(resolved);
        }

        let mut signal = ChangeSignal::observe(
            self.document.as_ref(),
            self.document.root(),
            // Attributes stay at their default so class and attribute edits re-sweep.
            ObserveConfig::default().with_child_list(true).with_subtree(true),
        )?;

        // Catch anything that landed between the pre-check and the subscription.
        self.sweep(&mut pending, &mut resolved)?;

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        while !pending.is_empty() {
            tokio::select! {
                biased;
                batch = signal.next_batch() => {
                    if batch.is_none() {
                        // Host closed the subscription; only the deadline can settle us now.
                        (&mut expiry).await;
                        break;
                    }
                    self.sweep(&mut pending, &mut resolved)?;
                    if !pending.is_empty() && Instant::now() >= deadline {
                        break;
                    }
                }
                _ = &mut expiry => break,
            }
        }
        signal.stop();

        if pending.is_empty() {
            info!(selectors = resolved.len(), "Selectors resolved");
            Ok(resolved)
        } else {
            warn!(pending = %Selector::join(&pending), ?timeout, "Timed out waiting for selectors");
            Err(WaitError::Timeout { pending })
        }
    }

    /// Like [`watch`](Self::watch), additionally handing any failure to
    /// `on_error` before returning it.
    pub async fn watch_with_handler<F>(
        &self,
        selectors: impl IntoSelectors,
        timeout: Duration,
        on_error: F,
    ) -> Result<ElementMap, WaitError>
    where
        F: FnOnce(&WaitError),
    {
        let outcome = self.watch(selectors, timeout).await;
        if let Err(error) = &outcome {
            on_error(error);
        }
        outcome
    }

    fn sweep(
        &self,
        pending: &mut Vec<Selector>,
        resolved: &mut ElementMap,
    ) -> Result<(), WaitError> {
        let mut unmatched = Vec::with_capacity(pending.len());
        for selector in pending.drain(..) {
            let nodes = self.document.query_all(&selector)?;
            if nodes.is_empty() {
                unmatched.push(selector);
            } else {
                resolved.insert(selector, nodes);
            }
        }
        *pending = unmatched;
        Ok(())
    }
}

fn dedup(selectors: Vec<Selector>) -> Vec<Selector> {
    let mut unique: Vec<Selector> = Vec::with_capacity(selectors.len());
    for selector in selectors {
        if !unique.contains(&selector) {
            unique.push(selector);
        }
    }
    unique
}
