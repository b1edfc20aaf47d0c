//! In-memory bookmark node tree and URL index.
//!
//! One tree represents the bookmark state of a single browser instance at a
//! point in time. Full-parse browsers rebuild it wholesale every pass;
//! incremental browsers patch it in place. Traversals are iterative with an
//! explicit stack, parents are always visited before children.

use crate::bookmark::Bookmark;
use std::collections::HashMap;

/// Index of a node inside its owning [`NodeTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Lookup from URL to the node representing it in the current pass.
pub type UrlIndex = HashMap<String, NodeId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Folder,
    Tag,
    Url,
}

/// A folder, tag or bookmarked URL.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Non-empty only for url nodes.
    pub url: String,
    pub tags: Vec<String>,
    pub desc: String,
    /// True when the content differs from the last observed state.
    pub changed: bool,
    /// Hash of the title, used for cheap change detection.
    pub name_hash: u64,
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Node {
            name_hash: name_hash(&name),
            name,
            kind,
            url: String::new(),
            tags: Vec::new(),
            desc: String::new(),
            changed: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Node::new(NodeKind::Folder, name)
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Node::new(NodeKind::Tag, name)
    }

    pub fn url(url: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        let mut node = Node::new(NodeKind::Url, name);
        node.url = url.into();
        node.desc = desc.into();
        node
    }

    pub fn is_url(&self) -> bool {
        self.kind == NodeKind::Url
    }

    /// Append a tag unless already present.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Flatten this url node into its persisted projection.
    pub fn to_bookmark(&self, module: &str) -> Bookmark {
        Bookmark {
            url: self.url.clone(),
            title: self.name.clone(),
            tags: self.tags.clone(),
            desc: self.desc.clone(),
            module: module.to_string(),
        }
    }
}

/// Hash of a node title. Only the low 64 bits of blake3 are kept, collisions
/// merely cost a redundant hook run.
pub fn name_hash(name: &str) -> u64 {
    let digest = blake3::hash(name.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

/// Arena-backed bookmark tree with a single root.
#[derive(Debug)]
pub struct NodeTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl NodeTree {
    pub fn new() -> Self {
        NodeTree {
            nodes: vec![Node::new(NodeKind::Root, "root")],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Append `node` under `parent`. Parents are always nodes already in the
    /// tree, so no cycle can be formed.
    pub fn insert_child(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Link an existing node under a new parent (incremental reparenting,
    /// used when a tag claims a url node).
    pub fn link_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        if !self.nodes[parent.0].children.contains(&child) {
            self.nodes[parent.0].children.push(child);
        }
    }

    /// When the node's parent is a folder or tag, inherit the parent name as
    /// a tag (folder-as-tag convention).
    pub fn inherit_parent_tag(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        let parent_node = &self.nodes[parent.0];
        if matches!(parent_node.kind, NodeKind::Folder | NodeKind::Tag) {
            let tag = parent_node.name.clone();
            self.nodes[id.0].add_tag(&tag);
        }
    }

    /// Depth-first traversal, parents before children, no recursion.
    pub fn iter_depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Walk the tree and index every url node by URL, replacing any previous
    /// index for this browser instance.
    pub fn build_url_index(&self) -> UrlIndex {
        let mut index = UrlIndex::new();
        for id in self.iter_depth_first() {
            let node = self.node(id);
            if node.is_url() {
                index.insert(node.url.clone(), id);
            }
        }
        index
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        NodeTree::new()
    }
}

pub struct DepthFirst<'a> {
    tree: &'a NodeTree,
    stack: Vec<NodeId>,
}

impl Iterator for DepthFirst<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        for child in self.tree.children(id).iter().rev() {
            self.stack.push(*child);
        }
        Some(id)
    }
}
