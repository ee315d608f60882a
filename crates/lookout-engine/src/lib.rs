//! Condition-resolution engine.
//!
//! Waits on a live [`Document`] until selectors match and predicates hold,
//! or until a deadline passes. Every wait owns its own subscription and
//! timers and releases them on whichever path settles it.

pub mod aggregator;
pub mod api;
pub mod condition;
pub mod config;
pub mod error;
pub mod navigation;
pub mod observe;
pub mod poller;
pub mod scenario;
pub mod signal;
pub mod sink;
pub mod watcher;

pub use aggregator::{ConditionAggregator, WaitHandle, WaitOptions};
pub use api::Lookout;
pub use condition::{Condition, Predicate};
pub use error::{BoxError, EngineError, ObserveError, ValidationError, WaitError};
pub use lookout_common::{Document, MutationRecord, NodeId, ObserveConfig, Selector};
pub use navigation::{NavigationHandle, NavigationOptions, NavigationWatcher, UrlChange};
pub use observe::{ObserveNodeOptions, observe_node};
pub use poller::PredicatePoller;
pub use signal::{ChangeSignal, ObserverHandle};
pub use sink::{Environment, ErrorHandler, ErrorReport, ErrorSink, HttpSink, LogSink};
pub use watcher::{ElementMap, ElementWatcher, IntoSelectors};
