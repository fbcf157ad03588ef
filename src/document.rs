// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree document model.
//!
//! Both schemas and materialized data are held in a [`Document`]: an arena of
//! named nodes with ordered, namespace-qualified attributes. The arena keeps
//! the tree cheap to clone and lets callers address nodes with plain
//! [`NodeId`] indices while mutating the tree during materialization and
//! cleanup passes.
//!
//! Detached subtrees stay in the arena but are unreachable from the root;
//! every traversal in this module starts from a node, so they are invisible
//! to equality, search and serialization.

use std::collections::HashMap;

/// Index of a node inside its owning [`Document`].
///
/// Ids are only meaningful for the document that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// A namespace-qualified attribute. `ns` is the namespace URI, not a prefix;
/// prefixes are a serialization concern kept in the document prefix table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub ns: Option<String>,
    pub local: String,
    pub value: String,
}

#[derive(Debug, Clone)]
struct NodeData {
    name: String,
    attrs: Vec<Attr>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
    /// prefix -> namespace URI, in declaration order
    prefixes: Vec<(String, String)>,
}

impl Document {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![NodeData {
                name: root_name.into(),
                attrs: Vec::new(),
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            prefixes: Vec::new(),
        }
    }

    /// New document whose root is a shallow copy (name and attributes) of a
    /// node from another document. The prefix table is carried over so the
    /// result serializes with the same namespace declarations.
    pub fn shallow_from(src: &Document, node: NodeId) -> Self {
        let mut doc = Document::new(src.name(node));
        doc.prefixes = src.prefixes.clone();
        doc.nodes[0].attrs = src.node(node).attrs.clone();
        doc
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Child ids in document order. Returns an owned vector so callers can
    /// mutate the document while iterating.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).children.clone()
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        !self.node(id).children.is_empty()
    }

    /// A document is empty when its root element has no child elements.
    pub fn is_empty(&self) -> bool {
        !self.has_children(self.root)
    }

    pub fn append_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            name: name.into(),
            attrs: Vec::new(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.node_mut(parent).children.push(id);
        id
    }

    /// Append a shallow copy (name and attributes only) of a node from
    /// another document.
    pub fn append_shallow_from(&mut self, parent: NodeId, src: &Document, node: NodeId) -> NodeId {
        let id = self.append_child(parent, src.name(node));
        self.node_mut(id).attrs = src.node(node).attrs.clone();
        id
    }

    /// Append a deep copy of a subtree from another document.
    pub fn append_deep_from(&mut self, parent: NodeId, src: &Document, node: NodeId) -> NodeId {
        let id = self.append_shallow_from(parent, src, node);
        for child in src.children(node) {
            self.append_deep_from(id, src, child);
        }
        id
    }

    /// Remove a subtree from the tree. The nodes stay in the arena but become
    /// unreachable. Detaching the root is a no-op.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|c| *c != id);
            self.node_mut(id).parent = None;
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[Attr] {
        &self.node(id).attrs
    }

    pub fn attr(&self, id: NodeId, ns: Option<&str>, local: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|a| a.ns.as_deref() == ns && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, overwriting in place when the key already exists so
    /// attribute order stays stable.
    pub fn set_attr(&mut self, id: NodeId, ns: Option<&str>, local: &str, value: impl Into<String>) {
        let node = self.node_mut(id);
        if let Some(attr) = node
            .attrs
            .iter_mut()
            .find(|a| a.ns.as_deref() == ns && a.local == local)
        {
            attr.value = value.into();
        } else {
            node.attrs.push(Attr {
                ns: ns.map(str::to_string),
                local: local.to_string(),
                value: value.into(),
            });
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, ns: Option<&str>, local: &str) -> bool {
        let node = self.node_mut(id);
        let before = node.attrs.len();
        node.attrs
            .retain(|a| !(a.ns.as_deref() == ns && a.local == local));
        node.attrs.len() != before
    }

    /// Preorder traversal starting at `from` (inclusive).
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            // push in reverse so children come out in document order
            for child in self.node(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// All values of a given attribute anywhere in the tree, in document
    /// order.
    pub fn find_attributes(&self, ns: Option<&str>, local: &str) -> Vec<(NodeId, String)> {
        self.descendants(self.root)
            .into_iter()
            .filter_map(|id| {
                self.attr(id, ns, local)
                    .map(|value| (id, value.to_string()))
            })
            .collect()
    }

    pub fn declare_prefix(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        let uri = uri.into();
        if !self.prefixes.iter().any(|(p, _)| *p == prefix) {
            self.prefixes.push((prefix, uri));
        }
    }

    pub fn prefixes(&self) -> &[(String, String)] {
        &self.prefixes
    }

    pub fn uri_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn prefix_for_uri(&self, uri: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(_, u)| u == uri)
            .map(|(p, _)| p.as_str())
    }

    /// Make sure every attribute namespace has a prefix, generating `ns1`,
    /// `ns2`, ... for URIs that were never declared. Used before writing.
    pub(crate) fn ensure_prefixes(&mut self) {
        let mut missing: Vec<String> = Vec::new();
        for id in self.descendants(self.root) {
            for attr in self.attrs(id) {
                if let Some(uri) = &attr.ns {
                    if self.prefix_for_uri(uri).is_none() && !missing.contains(uri) {
                        missing.push(uri.clone());
                    }
                }
            }
        }
        let mut counter = 1;
        for uri in missing {
            let mut prefix = format!("ns{counter}");
            while self.uri_for_prefix(&prefix).is_some() {
                counter += 1;
                prefix = format!("ns{counter}");
            }
            counter += 1;
            self.prefixes.push((prefix, uri));
        }
    }

    fn subtree_eq(&self, a: NodeId, other: &Document, b: NodeId) -> bool {
        if self.name(a) != other.name(b) || self.node(a).attrs != other.node(b).attrs {
            return false;
        }
        let left = &self.node(a).children;
        let right = &other.node(b).children;
        left.len() == right.len()
            && left
                .iter()
                .zip(right.iter())
                .all(|(l, r)| self.subtree_eq(*l, other, *r))
    }
}

/// Structural equality: node names, attribute lists (ordered) and child
/// trees. Prefix tables and arena layout are ignored.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }
}

impl Eq for Document {}

/// Compact single-line rendering for logs: tag names with attribute counts.
pub fn summarize(doc: &Document) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in doc.descendants(doc.root()) {
        *counts.entry(doc.name(id)).or_insert(0) += 1;
    }
    let mut parts: Vec<String> = counts
        .into_iter()
        .map(|(name, n)| format!("{name}x{n}"))
        .collect();
    parts.sort();
    parts.join(",")
}
