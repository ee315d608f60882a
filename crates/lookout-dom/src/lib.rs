//! In-process document host.
//!
//! `MemoryDocument` implements the [`lookout_common::Document`] capability over
//! an arena tree, so waits can be driven without a browser. Mutations made
//! through [`MemoryDocument::mutate`] are delivered to subscribers as one batch.

pub mod document;
pub mod selector;
mod tree;

pub use document::{MemoryDocument, Mutator};
pub use tree::ElementSpec;
