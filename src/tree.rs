/// Row Tree
///
/// The hierarchical structure derived from the row registry: leaf nodes wrap a
/// row, group nodes bucket rows by grouping values (or tree-data paths), and
/// footer nodes hold aggregated values for their parent group.
///
/// Nodes live in an insertion-ordered arena keyed by `NodeId`. The root group
/// is always present, has depth -1 and is never rendered.

use crate::column::CellValue;
use crate::error::{PipelineError, Result};
use crate::row::RowId;
use indexmap::IndexMap;
use std::fmt;

/// Depth of the root group
pub const ROOT_DEPTH: i32 = -1;

/// Identifier of a node in the row tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Root,
    /// Leaf (or row-backed group) for a row of the registry
    Row(RowId),
    /// Auto-generated group, identified by its grouping path
    Group(String),
    /// Footer of the given group
    Footer(Box<NodeId>),
}

impl NodeId {
    pub fn footer_of(parent: &NodeId) -> NodeId {
        NodeId::Footer(Box::new(parent.clone()))
    }

    pub fn row_id(&self) -> Option<&RowId> {
        match self {
            NodeId::Row(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_footer(&self) -> bool {
        matches!(self, NodeId::Footer(_))
    }
}

impl From<RowId> for NodeId {
    fn from(id: RowId) -> Self {
        NodeId::Row(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Root => f.write_str("auto-generated-group-node-root"),
            NodeId::Row(id) => write!(f, "{}", id),
            NodeId::Group(path) => write!(f, "auto-generated-row-{}", path),
            NodeId::Footer(parent) => match parent.as_ref() {
                NodeId::Root => f.write_str("auto-generated-group-footer-root"),
                other => write!(f, "auto-generated-group-footer-{}", other),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub id: NodeId,
    pub row_id: RowId,
    pub parent: NodeId,
    pub depth: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub id: NodeId,
    /// None only for the root
    pub parent: Option<NodeId>,
    pub depth: i32,
    pub children: Vec<NodeId>,
    pub footer_id: Option<NodeId>,
    pub is_auto_generated: bool,
    /// Field whose value created this group (None for root and tree-data groups)
    pub grouping_field: Option<String>,
    pub grouping_key: CellValue,
    /// Row backing this group (tree data only)
    pub row_id: Option<RowId>,
    pub children_expanded: bool,
}

impl GroupNode {
    pub(crate) fn root() -> Self {
        GroupNode {
            id: NodeId::Root,
            parent: None,
            depth: ROOT_DEPTH,
            children: Vec::new(),
            footer_id: None,
            is_auto_generated: true,
            grouping_field: None,
            grouping_key: CellValue::Null,
            row_id: None,
            children_expanded: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == NodeId::Root
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FooterNode {
    pub id: NodeId,
    pub parent: NodeId,
    pub depth: i32,
}

/// A node of the row tree
#[derive(Debug, Clone, PartialEq)]
pub enum RowNode {
    Leaf(LeafNode),
    Group(GroupNode),
    Footer(FooterNode),
}

impl RowNode {
    pub fn id(&self) -> &NodeId {
        match self {
            RowNode::Leaf(n) => &n.id,
            RowNode::Group(n) => &n.id,
            RowNode::Footer(n) => &n.id,
        }
    }

    pub fn parent(&self) -> Option<&NodeId> {
        match self {
            RowNode::Leaf(n) => Some(&n.parent),
            RowNode::Group(n) => n.parent.as_ref(),
            RowNode::Footer(n) => Some(&n.parent),
        }
    }

    pub fn depth(&self) -> i32 {
        match self {
            RowNode::Leaf(n) => n.depth,
            RowNode::Group(n) => n.depth,
            RowNode::Footer(n) => n.depth,
        }
    }

    /// Row carried by this node, if any
    pub fn row_id(&self) -> Option<&RowId> {
        match self {
            RowNode::Leaf(n) => Some(&n.row_id),
            RowNode::Group(n) => n.row_id.as_ref(),
            RowNode::Footer(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            RowNode::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, RowNode::Leaf(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, RowNode::Group(_))
    }

    pub fn is_footer(&self) -> bool {
        matches!(self, RowNode::Footer(_))
    }
}

/// Arena of row nodes with parent/children links.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTree {
    nodes: IndexMap<NodeId, RowNode>,
    max_depth: i32,
}

impl Default for RowTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RowTree {
    /// Creates a tree holding only the root group.
    pub fn new() -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId::Root, RowNode::Group(GroupNode::root()));
        RowTree { nodes, max_depth: ROOT_DEPTH }
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree holds nothing but the root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn root(&self) -> &GroupNode {
        match self.nodes.get(&NodeId::Root) {
            Some(RowNode::Group(g)) => g,
            _ => unreachable!("row tree always holds the root group"),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&RowNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get_group(&self, id: &NodeId) -> Option<&GroupNode> {
        self.nodes.get(id).and_then(RowNode::as_group)
    }

    pub(crate) fn get_group_mut(&mut self, id: &NodeId) -> Option<&mut GroupNode> {
        match self.nodes.get_mut(id) {
            Some(RowNode::Group(g)) => Some(g),
            _ => None,
        }
    }

    /// Children of a group, in tree order; empty for non-groups
    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.get_group(id).map(|g| g.children.as_slice()).unwrap_or(&[])
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RowNode> {
        self.nodes.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupNode> {
        self.nodes.values().filter_map(RowNode::as_group)
    }

    /// Arena index of a node
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    pub fn node_at(&self, index: usize) -> Option<&RowNode> {
        self.nodes.get_index(index).map(|(_, node)| node)
    }

    /// Depth of the deepest node (-1 for an empty tree)
    pub fn max_depth(&self) -> i32 {
        self.max_depth
    }

    /// Appends a node under its parent. The parent must be a group already in
    /// the tree.
    pub(crate) fn insert_child(&mut self, node: RowNode) -> Result<()> {
        let id = node.id().clone();
        let parent = node
            .parent()
            .cloned()
            .ok_or_else(|| PipelineError::NodeNotFound(id.clone()))?;

        let group = self
            .get_group_mut(&parent)
            .ok_or_else(|| PipelineError::NotAGroup(parent.clone()))?;
        group.children.push(id.clone());

        self.max_depth = self.max_depth.max(node.depth());
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Adds a footer as the last child of `group_id`.
    ///
    /// Returns the footer id; a group that already has a footer keeps it.
    pub fn add_footer(&mut self, group_id: &NodeId) -> Result<NodeId> {
        let group = self
            .get_group_mut(group_id)
            .ok_or_else(|| PipelineError::NotAGroup(group_id.clone()))?;
        if let Some(existing) = &group.footer_id {
            return Ok(existing.clone());
        }

        let footer_id = NodeId::footer_of(group_id);
        let depth = group.depth + 1;
        group.children.push(footer_id.clone());
        group.footer_id = Some(footer_id.clone());

        self.max_depth = self.max_depth.max(depth);
        self.nodes.insert(
            footer_id.clone(),
            RowNode::Footer(FooterNode {
                id: footer_id.clone(),
                parent: group_id.clone(),
                depth,
            }),
        );
        Ok(footer_id)
    }

    /// Removes the footer previously synthesized for `group_id`.
    ///
    /// Only the node recorded in the group's `footer_id` is touched.
    pub fn remove_footer(&mut self, group_id: &NodeId) -> Option<NodeId> {
        let group = self.get_group_mut(group_id)?;
        let footer_id = group.footer_id.take()?;
        group.children.retain(|child| child != &footer_id);
        self.nodes.shift_remove(&footer_id);
        Some(footer_id)
    }

    /// Removes every synthesized footer in one pass.
    pub fn remove_all_footers(&mut self) -> Vec<NodeId> {
        let mut removed = Vec::new();
        for node in self.nodes.values_mut() {
            if let RowNode::Group(group) = node {
                if let Some(footer_id) = group.footer_id.take() {
                    group.children.retain(|child| child != &footer_id);
                    removed.push(footer_id);
                }
            }
        }
        if !removed.is_empty() {
            self.nodes.retain(|id, _| !removed.contains(id));
        }
        removed
    }

    pub(crate) fn set_children_expanded(&mut self, id: &NodeId, expanded: bool) -> bool {
        match self.get_group_mut(id) {
            Some(group) if !group.is_root() => {
                group.children_expanded = expanded;
                true
            }
            _ => false,
        }
    }

    /// Pre-order walk of the subtree below `id` (the node itself excluded),
    /// in tree order.
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeId> = self.children(id).iter().rev().collect();
        while let Some(current) = stack.pop() {
            out.push(current.clone());
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    /// Rows of every leaf below `id`
    pub fn leaf_descendants(&self, id: &NodeId) -> Vec<RowId> {
        self.descendants(id)
            .iter()
            .filter_map(|d| match self.get(d) {
                Some(RowNode::Leaf(leaf)) => Some(leaf.row_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ancestors of a node from its parent up to the root
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent()).cloned();
        while let Some(parent) = current {
            current = self.get(&parent).and_then(|n| n.parent()).cloned();
            out.push(parent);
        }
        out
    }

    /// Checks the structural invariants: single parent per node, children
    /// present in the tree, child depth = parent depth + 1, and every
    /// non-root node reachable from exactly one children list.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();

        for node in self.nodes.values() {
            let group = match node {
                RowNode::Group(g) => g,
                _ => continue,
            };
            for child_id in &group.children {
                let child = self
                    .nodes
                    .get(child_id)
                    .ok_or_else(|| format!("child '{}' of '{}' missing", child_id, group.id))?;
                if child.parent() != Some(&group.id) {
                    return Err(format!("child '{}' does not point back to '{}'", child_id, group.id));
                }
                if child.depth() != group.depth + 1 {
                    return Err(format!(
                        "child '{}' has depth {} under parent depth {}",
                        child_id,
                        child.depth(),
                        group.depth
                    ));
                }
                if !seen.insert(child_id.clone()) {
                    return Err(format!("node '{}' listed under two parents", child_id));
                }
            }
        }

        if seen.len() != self.nodes.len() - 1 {
            return Err(format!(
                "{} nodes reachable from children lists, {} non-root nodes in tree",
                seen.len(),
                self.nodes.len() - 1
            ));
        }
        Ok(())
    }
}
