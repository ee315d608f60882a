use crate::selector::{Combinator, CompoundSelector, SelectorList, SelectorPart};
use lookout_common::{DocumentError, MutationRecord, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) const DOCUMENT: usize = 0;
pub(crate) const HTML: usize = 1;
pub(crate) const BODY: usize = 2;

/// Description of an element to insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    fn into_element(self) -> Element {
        let mut attributes: BTreeMap<String, String> = self
            .attributes
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        if let Some(id) = self.id {
            attributes.insert("id".into(), id);
        }
        if !self.classes.is_empty() {
            attributes.insert("class".into(), self.classes.join(" "));
        }
        Element {
            tag: self.tag.to_ascii_lowercase(),
            attributes,
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attributes: BTreeMap<String, String>,
}

impl Element {
    fn has_class(&self, class: &str) -> bool {
        self.attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    fn matches(&self, compound: &CompoundSelector) -> bool {
        if compound.tag.as_ref().is_some_and(|tag| *tag != self.tag) {
            return false;
        }
        if compound
            .id
            .as_ref()
            .is_some_and(|id| self.attributes.get("id") != Some(id))
        {
            return false;
        }
        if !compound.classes.iter().all(|class| self.has_class(class)) {
            return false;
        }
        compound.attributes.iter().all(|matcher| {
            match (self.attributes.get(&matcher.name), &matcher.value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    // `None` for the document node itself.
    element: Option<Element>,
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    pub(crate) location: String,
}

impl Tree {
    pub(crate) fn new(location: String) -> Self {
        let mut tree = Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                element: None,
            }],
            location,
        };
        tree.push(DOCUMENT, ElementSpec::new("html").into_element());
        tree.push(HTML, ElementSpec::new("body").into_element());
        tree
    }

    fn push(&mut self, parent: usize, element: Element) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            element: Some(element),
        });
        self.nodes[parent].children.push(index);
        index
    }

    pub(crate) fn index(&self, node: NodeId) -> Result<usize, DocumentError> {
        usize::try_from(node.0)
            .ok()
            .filter(|index| *index < self.nodes.len())
            .ok_or(DocumentError::NodeNotFound(node))
    }

    pub(crate) fn is_connected(&self, index: usize) -> bool {
        let mut cursor = Some(index);
        while let Some(current) = cursor {
            if current == DOCUMENT {
                return true;
            }
            cursor = self.nodes[current].parent;
        }
        false
    }

    /// True when `ancestor` is `node` or one of its ancestors.
    pub(crate) fn is_inclusive_ancestor(&self, ancestor: usize, node: usize) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes[current].parent;
        }
        false
    }

    pub(crate) fn append(
        &mut self,
        parent: NodeId,
        spec: ElementSpec,
    ) -> Result<(NodeId, MutationRecord), DocumentError> {
        let parent_index = self.index(parent)?;
        if parent_index == DOCUMENT && !self.nodes[DOCUMENT].children.is_empty() {
            return Err(DocumentError::NotAnElement(parent));
        }
        let index = self.push(parent_index, spec.into_element());
        let child = NodeId(index as u64);
        Ok((child, MutationRecord::child_list(parent, vec![child], Vec::new())))
    }

    pub(crate) fn remove(&mut self, node: NodeId) -> Result<MutationRecord, DocumentError> {
        let index = self.index(node)?;
        if index == DOCUMENT || index == HTML {
            return Err(DocumentError::NotRemovable(node));
        }
        let parent = self.nodes[index]
            .parent
            .ok_or(DocumentError::Detached(node))?;
        self.nodes[parent].children.retain(|child| *child != index);
        self.nodes[index].parent = None;
        Ok(MutationRecord::child_list(
            NodeId(parent as u64),
            Vec::new(),
            vec![node],
        ))
    }

    pub(crate) fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<MutationRecord, DocumentError> {
        let index = self.index(node)?;
        let element = self.nodes[index]
            .element
            .as_mut()
            .ok_or(DocumentError::NotAnElement(node))?;
        let name = name.to_ascii_lowercase();
        let old_value = element.attributes.insert(name.clone(), value.to_string());
        Ok(MutationRecord::attribute(node, name, old_value))
    }

    pub(crate) fn attribute(
        &self,
        node: NodeId,
        name: &str,
    ) -> Result<Option<String>, DocumentError> {
        let index = self.index(node)?;
        let element = self.nodes[index]
            .element
            .as_ref()
            .ok_or(DocumentError::NotAnElement(node))?;
        Ok(element.attributes.get(&name.to_ascii_lowercase()).cloned())
    }

    pub(crate) fn tag_name(&self, node: NodeId) -> Result<String, DocumentError> {
        let index = self.index(node)?;
        self.nodes[index]
            .element
            .as_ref()
            .map(|element| element.tag.clone())
            .ok_or(DocumentError::NotAnElement(node))
    }

    /// Connected elements matching `selector`, in document order.
    pub(crate) fn query_all(&self, selector: &str) -> Result<Vec<NodeId>, DocumentError> {
        let list = SelectorList::parse(selector)?;
        let mut ordered = Vec::new();
        self.collect_elements(DOCUMENT, &mut ordered);
        Ok(ordered
            .into_iter()
            .filter(|index| {
                list.chains
                    .iter()
                    .any(|chain| self.matches_chain(*index, chain, chain.len() - 1))
            })
            .map(|index| NodeId(index as u64))
            .collect())
    }

    fn collect_elements(&self, index: usize, out: &mut Vec<usize>) {
        if self.nodes[index].element.is_some() {
            out.push(index);
        }
        for child in &self.nodes[index].children {
            self.collect_elements(*child, out);
        }
    }

    fn matches_chain(&self, index: usize, chain: &[SelectorPart], position: usize) -> bool {
        let part = &chain[position];
        let matched = self.nodes[index]
            .element
            .as_ref()
            .is_some_and(|element| element.matches(&part.compound));
        if !matched {
            return false;
        }
        if position == 0 {
            return true;
        }

        match part.combinator.unwrap_or(Combinator::Descendant) {
            Combinator::Child => self.nodes[index]
                .parent
                .is_some_and(|parent| self.matches_chain(parent, chain, position - 1)),
            Combinator::Descendant => {
                let mut cursor = self.nodes[index].parent;
                while let Some(ancestor) = cursor {
                    if self.matches_chain(ancestor, chain, position - 1) {
                        return true;
                    }
                    cursor = self.nodes[ancestor].parent;
                }
                false
            }
        }
    }
}
