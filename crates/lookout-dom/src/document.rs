use crate::tree::{BODY, ElementSpec, HTML, Tree};
use lookout_common::{
    Document, DocumentError, MutationBatch, MutationRecord, NodeId, ObserveOptions, Selector,
    Subscription,
};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

struct Registration {
    id: u64,
    target: usize,
    options: ObserveOptions,
    sender: mpsc::UnboundedSender<MutationBatch>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    opened: u64,
    entries: Vec<Registration>,
}

/// Arena-backed document with live mutation subscriptions.
///
/// A fresh document holds `html > body` and the given location.
pub struct MemoryDocument {
    tree: RwLock<Tree>,
    registry: Arc<Mutex<Registry>>,
}

/// Mutation handle passed to [`MemoryDocument::mutate`]. Every change made
/// through it is delivered to subscribers as part of one batch.
pub struct Mutator<'a> {
    tree: &'a mut Tree,
    records: Vec<MutationRecord>,
}

impl Mutator<'_> {
    pub fn append(&mut self, parent: NodeId, spec: ElementSpec) -> Result<NodeId, DocumentError> {
        let (node, record) = self.tree.append(parent, spec)?;
        self.records.push(record);
        Ok(node)
    }

    pub fn remove(&mut self, node: NodeId) -> Result<(), DocumentError> {
        let record = self.tree.remove(node)?;
        self.records.push(record);
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DocumentError> {
        let record = self.tree.set_attribute(node, name, value)?;
        self.records.push(record);
        Ok(())
    }

    /// History-style navigation: changes the location without touching the tree.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.tree.location = location.into();
    }
}

impl MemoryDocument {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            tree: RwLock::new(Tree::new(location.into())),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn document_element(&self) -> NodeId {
        NodeId(HTML as u64)
    }

    pub fn body(&self) -> NodeId {
        NodeId(BODY as u64)
    }

    /// Applies `apply` under one write lock and delivers the resulting records
    /// as a single batch per interested subscriber. Records from operations
    /// that succeeded before an error are still delivered.
    pub fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut Mutator<'_>) -> Result<R, DocumentError>,
    ) -> Result<R, DocumentError> {
        let mut tree = self.tree.write();
        let mut mutator = Mutator {
            tree: &mut tree,
            records: Vec::new(),
        };
        let result = apply(&mut mutator);
        let records = mutator.records;
        if !records.is_empty() {
            self.dispatch(&tree, records);
        }
        result
    }

    pub fn append(&self, parent: NodeId, spec: ElementSpec) -> Result<NodeId, DocumentError> {
        self.mutate(|m| m.append(parent, spec))
    }

    pub fn remove(&self, node: NodeId) -> Result<(), DocumentError> {
        self.mutate(|m| m.remove(node))
    }

    pub fn set_attribute(
        &self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DocumentError> {
        self.mutate(|m| m.set_attribute(node, name, value))
    }

    pub fn set_location(&self, location: impl Into<String>) {
        self.tree.write().location = location.into();
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>, DocumentError> {
        self.tree.read().attribute(node, name)
    }

    pub fn tag_name(&self, node: NodeId) -> Result<String, DocumentError> {
        self.tree.read().tag_name(node)
    }

    /// Number of subscriptions currently registered.
    pub fn active_subscriptions(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Number of subscriptions ever opened on this document.
    pub fn subscriptions_opened(&self) -> u64 {
        self.registry.lock().opened
    }

    fn dispatch(&self, tree: &Tree, records: Vec<MutationRecord>) {
        let mut registry = self.registry.lock();
        registry.entries.retain(|entry| {
            let batch: MutationBatch = records
                .iter()
                .filter(|record| entry.options.accepts(record.kind))
                .filter(|record| {
                    // Records always name an existing node.
                    let target = record.target.0 as usize;
                    target == entry.target
                        || (entry.options.subtree
                            && tree.is_inclusive_ancestor(entry.target, target))
                })
                .cloned()
                .collect();
            if batch.is_empty() {
                return true;
            }
            entry.sender.send(batch).is_ok()
        });
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new("about:blank")
    }
}

impl Document for MemoryDocument {
    fn root(&self) -> NodeId {
        self.document_element()
    }

    fn query_all(&self, selector: &Selector) -> Result<Vec<NodeId>, DocumentError> {
        self.tree.read().query_all(selector.as_str())
    }

    fn location(&self) -> String {
        self.tree.read().location.clone()
    }

    fn subscribe(
        &self,
        target: NodeId,
        options: ObserveOptions,
    ) -> Result<Subscription, DocumentError> {
        let tree = self.tree.read();
        let index = tree.index(target)?;
        if !tree.is_connected(index) {
            return Err(DocumentError::Detached(target));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.opened += 1;
            registry.entries.push(Registration {
                id,
                target: index,
                options,
                sender,
            });
            id
        };
        debug!(subscription = id, %target, "Opened mutation subscription");

        let registry: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        Ok(Subscription::new(receiver, move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.retain(|entry| entry.id != id);
                debug!(subscription = id, "Closed mutation subscription");
            }
        }))
    }
}
