pub mod document;
pub mod error;
pub mod mutation;
pub mod selector;

pub use document::{Document, Subscription, Unsubscribe};
pub use error::DocumentError;
pub use mutation::{
    MutationBatch, MutationKind, MutationRecord, NodeId, ObserveConfig, ObserveOptions,
};
pub use selector::Selector;
