use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-assigned identity of a node in the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    ChildList,
    Attributes,
}

/// One raw change to the tree, as delivered inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_nodes: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_nodes: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

impl MutationRecord {
    pub fn child_list(
        target: NodeId,
        added_nodes: Vec<NodeId>,
        removed_nodes: Vec<NodeId>,
    ) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added_nodes,
            removed_nodes,
            attribute_name: None,
            old_value: None,
        }
    }

    pub fn attribute(target: NodeId, name: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            attribute_name: Some(name.into()),
            old_value,
        }
    }
}

/// Records accumulated since the previous delivery to one subscriber.
pub type MutationBatch = Vec<MutationRecord>;

/// Caller-facing observation options. Unset fields fall back to the defaults
/// (`child_list`, `subtree` and `attributes` all enabled).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_list: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtree: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<bool>,
}

impl ObserveConfig {
    pub fn with_child_list(mut self, enabled: bool) -> Self {
        self.child_list = Some(enabled);
        self
    }

    pub fn with_subtree(mut self, enabled: bool) -> Self {
        self.subtree = Some(enabled);
        self
    }

    pub fn with_attributes(mut self, enabled: bool) -> Self {
        self.attributes = Some(enabled);
        self
    }

    /// Merges caller overrides over the defaults; caller values win.
    pub fn resolve(self) -> ObserveOptions {
        let defaults = ObserveOptions::default();
        ObserveOptions {
            child_list: self.child_list.unwrap_or(defaults.child_list),
            subtree: self.subtree.unwrap_or(defaults.subtree),
            attributes: self.attributes.unwrap_or(defaults.attributes),
        }
    }
}

/// Fully resolved observation options handed to the document host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            child_list: true,
            subtree: true,
            attributes: true,
        }
    }
}

impl ObserveOptions {
    pub fn accepts(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::Attributes => self.attributes,
        }
    }
}
