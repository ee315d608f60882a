use crate::error::ObserveError;
use crate::signal::{ChangeSignal, ObserverHandle};
use crate::sink::{ErrorHandler, ErrorReport, ErrorRoute, ErrorSink};
use lookout_common::{Document, MutationRecord, NodeId, ObserveConfig, Selector};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ObserveNodeOptions {
    pub selector: Selector,
    /// Merged over the all-true defaults.
    pub config: ObserveConfig,
    pub activity: Option<String>,
    pub on_error: Option<ErrorHandler>,
}

impl ObserveNodeOptions {
    pub fn new(selector: impl Into<Selector>) -> Self {
        Self {
            selector: selector.into(),
            config: ObserveConfig::default(),
            activity: None,
            on_error: None,
        }
    }

    pub fn config(mut self, config: ObserveConfig) -> Self {
        self.config = config;
        self
    }

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

/// Invokes `callback` for every mutation record on the first node matching
/// `options.selector`.
///
/// When nothing matches, or the node cannot be observed, the failure is
/// routed to `options.on_error` (or `sink`) and `None` is returned.
pub fn observe_node<D, F>(
    document: &Arc<D>,
    options: ObserveNodeOptions,
    sink: Arc<dyn ErrorSink>,
    mut callback: F,
) -> Option<ObserverHandle>
where
    D: Document + ?Sized,
    F: FnMut(&MutationRecord) + Send + 'static,
{
    let ObserveNodeOptions {
        selector,
        config,
        activity,
        on_error,
    } = options;

    let started = resolve_target(document.as_ref(), &selector).and_then(|target| {
        Ok(ChangeSignal::spawn(
            document.as_ref(),
            target,
            config,
            move |batch| {
                for record in &batch {
                    callback(record);
                }
            },
        )?)
    });

    match started {
        Ok(handle) => {
            debug!(activity = activity.as_deref(), %selector, "Observing node");
            Some(handle)
        }
        Err(error) => {
            warn!(activity = activity.as_deref(), %error, "Cannot observe node");
            ErrorRoute::new(activity, on_error, sink).deliver(error, Some(document.location()));
            None
        }
    }
}

fn resolve_target<D: Document + ?Sized>(
    document: &D,
    selector: &Selector,
) -> Result<NodeId, ObserveError> {
    document
        .query_one(selector)?
        .ok_or_else(|| ObserveError::TargetNotFound {
            selector: selector.clone(),
        })
}
