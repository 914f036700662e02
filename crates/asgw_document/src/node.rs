//! Arena-backed document tree.
//!
//! Protocol requests and responses are held as a tree of named nodes
//! with optional text content. Nodes are addressed through stable
//! [`NodeId`] handles, so builders can keep a handle to a subtree and
//! append to it later without any positional bookkeeping.

use crate::error::{DocError, DocResult};

/// Stable handle to a node within a [`Document`].
///
/// Handles stay valid for the lifetime of the document; detaching a
/// node only unlinks it from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) text: Option<String>,
    pub(crate) attrs: Vec<(String, String)>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

/// A hierarchical protocol document.
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Creates a document with a single root element.
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = Node {
            name: root_name.into(),
            text: None,
            attrs: Vec::new(),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Returns the root node handle.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the name of the root element.
    pub fn root_name(&self) -> &str {
        &self.nodes[self.root.0].name
    }

    /// Appends a child element and returns its handle.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.into(),
            text: None,
            attrs: Vec::new(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Appends a child element carrying text content.
    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> NodeId {
        let id = self.add_child(parent, name);
        self.nodes[id.0].text = Some(text.into());
        id
    }

    /// Returns the element name of a node.
    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    /// Returns the text content of a node, if any.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].text.as_deref()
    }

    /// Replaces the text content of a node.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id.0].text = Some(text.into());
    }

    /// Returns the parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Sets an attribute on a node, replacing any existing value.
    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let node = &mut self.nodes[id.0];
        if let Some(slot) = node.attrs.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value.into();
        } else {
            node.attrs.push((name, value.into()));
        }
    }

    /// Returns an attribute value.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id.0]
            .attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over a node's attributes in insertion order.
    pub fn attrs(&self, id: NodeId) -> impl Iterator<Item = (&str, &str)> {
        self.nodes[id.0]
            .attrs
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Iterates over the direct children of a node.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].children.iter().copied()
    }

    /// Returns the first direct child with the given name.
    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent).find(|&c| self.name(c) == name)
    }

    /// Returns the text of the first direct child with the given name.
    pub fn child_text(&self, parent: NodeId, name: &str) -> Option<&str> {
        self.child_named(parent, name).and_then(|c| self.text(c))
    }

    /// Returns the first descendant (depth-first) with the given name,
    /// starting below `from`.
    pub fn find(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.nodes[from.0].children.clone();
        stack.reverse();
        while let Some(id) = stack.pop() {
            if self.name(id) == name {
                return Some(id);
            }
            for &c in self.nodes[id.0].children.iter().rev() {
                stack.push(c);
            }
        }
        None
    }

    /// Collects every descendant with the given name in document order.
    pub fn find_all(&self, from: NodeId, name: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[from.0].children.clone();
        stack.reverse();
        while let Some(id) = stack.pop() {
            if self.name(id) == name {
                out.push(id);
            }
            for &c in self.nodes[id.0].children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Unlinks a node from its parent.
    ///
    /// The handle stays allocated but the node no longer appears in
    /// traversals. Used to pull `Data` parts out of a response before
    /// multipart framing.
    pub fn detach(&mut self, id: NodeId) -> DocResult<()> {
        let parent = self.nodes[id.0].parent.ok_or(DocError::StaleNode)?;
        self.nodes[parent.0].children.retain(|&c| c != id);
        self.nodes[id.0].parent = None;
        Ok(())
    }

    /// Copies the subtree rooted at `src_id` in `src` under `parent`.
    pub fn graft(&mut self, parent: NodeId, src: &Document, src_id: NodeId) -> NodeId {
        let copy = self.add_child(parent, src.name(src_id));
        if let Some(t) = src.text(src_id) {
            self.set_text(copy, t);
        }
        for (n, v) in &src.nodes[src_id.0].attrs {
            self.set_attr(copy, n.clone(), v.clone());
        }
        for child in src.children(src_id).collect::<Vec<_>>() {
            self.graft(copy, src, child);
        }
        copy
    }

    /// Returns a traversal cursor positioned at the root.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            doc: self,
            pos: self.root,
        }
    }
}

/// A read cursor over a document.
///
/// The cursor tracks one position. [`Cursor::scoped`] hands out a
/// guard that restores the position when it is dropped, replacing the
/// save/restore bookkeeping a walk would otherwise need.
pub struct Cursor<'a> {
    doc: &'a Document,
    pos: NodeId,
}

impl<'a> Cursor<'a> {
    /// Returns the current position.
    pub fn pos(&self) -> NodeId {
        self.pos
    }

    /// Moves the cursor to an arbitrary node.
    pub fn jump(&mut self, id: NodeId) {
        self.pos = id;
    }

    /// Descends to the first child with the given name, if present.
    pub fn descend(&mut self, name: &str) -> bool {
        match self.doc.child_named(self.pos, name) {
            Some(id) => {
                self.pos = id;
                true
            }
            None => false,
        }
    }

    /// Text at the current position.
    pub fn text(&self) -> Option<&'a str> {
        self.doc.text(self.pos)
    }

    /// Runs `f` with the cursor and restores the position afterwards.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Cursor<'a>) -> R) -> R {
        let saved = self.pos;
        let out = f(self);
        self.pos = saved;
        out
    }
}
