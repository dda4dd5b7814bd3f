//! Permission hierarchy: building a forest from flat parent-pointer records.
//!
//! The catalog stores each permission with an optional `parent_id`. This module
//! turns a flat list of such records into an ordered forest that can be used for
//! menu generation, admin tree views and menu-permission checks.
//!
//! The builder never fails on malformed input:
//!
//! - A node whose parent is not in the input is attached at root level and
//!   flagged as orphaned. A missing parent never hides its descendants.
//! - A node caught in a parent-pointer cycle cannot be reached from any root.
//!   One member of each such cycle is lifted to root level (also flagged as
//!   orphaned) so the output stays a finite forest.
//!
//! Every input node appears exactly once in the output.

#[cfg(feature = "audit")]
use log::{debug, warn};

use crate::{
    error::Result,
    permission::{PermissionNode, PermissionType},
};
use std::collections::{HashMap, HashSet};

/// A single node of a built permission forest.
///
/// Building, walking, cloning, comparing and dropping a forest all run in
/// loops over an explicit stack, so a deep parent chain costs heap, not call
/// stack. The `Debug` and serde representations still nest one level per
/// tree level.
#[derive(Debug, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct PermissionTreeNode {
    /// The catalog record at this node
    pub permission: PermissionNode,
    /// Direct children, already sorted
    pub children: Vec<PermissionTreeNode>,
    /// Set when the declared parent could not be used
    pub orphaned: bool,
}

impl PermissionTreeNode {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        walk(&self.children).count()
    }

    /// Depth of the deepest node below this one (0 for a leaf).
    pub fn height(&self) -> usize {
        walk(&self.children)
            .map(|(depth, _)| depth + 1)
            .max()
            .unwrap_or(0)
    }
}

impl Clone for PermissionTreeNode {
    fn clone(&self) -> Self {
        PermissionTreeNode {
            permission: self.permission.clone(),
            children: rebuild(&self.children, |_| true, |node, children| {
                Some(PermissionTreeNode {
                    permission: node.permission.clone(),
                    children,
                    orphaned: node.orphaned,
                })
            }),
            orphaned: self.orphaned,
        }
    }
}

impl PartialEq for PermissionTreeNode {
    fn eq(&self, other: &Self) -> bool {
        shape(self).eq(shape(other))
    }
}

/// Pre-order records with depth and fan-out; together they pin down the tree.
fn shape(node: &PermissionTreeNode) -> impl Iterator<Item = (usize, &PermissionNode, bool, usize)> + '_ {
    walk(std::slice::from_ref(node)).map(|(depth, node)| (depth, &node.permission, node.orphaned, node.children.len()))
}

impl Drop for PermissionTreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Depth-first, pre-order iterator over a forest, yielding `(depth, node)`.
///
/// Roots have depth 0. Siblings are visited in their stored order.
pub struct Walk<'a> {
    stack: Vec<(usize, &'a PermissionTreeNode)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a PermissionTreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, node))
    }
}

/// Walk a forest depth-first.
pub fn walk(forest: &[PermissionTreeNode]) -> Walk<'_> {
    Walk {
        stack: forest.iter().rev().map(|node| (0, node)).collect(),
    }
}

/// Rebuild a forest bottom-up.
///
/// `enter` decides whether a node and its subtree are visited at all. `visit`
/// receives a node together with its already rebuilt children and returns the
/// replacement, or `None` to drop it.
fn rebuild<'a, E, V>(forest: &'a [PermissionTreeNode], mut enter: E, mut visit: V) -> Vec<PermissionTreeNode>
where
    E: FnMut(&PermissionTreeNode) -> bool,
    V: FnMut(&'a PermissionTreeNode, Vec<PermissionTreeNode>) -> Option<PermissionTreeNode>,
{
    struct Frame<'t> {
        node: &'t PermissionTreeNode,
        next: usize,
        built: Vec<PermissionTreeNode>,
    }

    let mut out = Vec::new();
    let mut roots = forest.iter();
    let mut stack: Vec<Frame<'a>> = Vec::new();
    loop {
        let next = match stack.last_mut() {
            Some(frame) => {
                let node = frame.node;
                let child = node.children.get(frame.next);
                frame.next += 1;
                child
            }
            None => match roots.next() {
                Some(root) => Some(root),
                None => break,
            },
        };

        match next {
            Some(node) => {
                if enter(node) {
                    stack.push(Frame {
                        node,
                        next: 0,
                        built: Vec::new(),
                    });
                }
            }
            None => {
                let Some(frame) = stack.pop() else { break };
                if let Some(rebuilt) = visit(frame.node, frame.built) {
                    match stack.last_mut() {
                        Some(parent) => parent.built.push(rebuilt),
                        None => out.push(rebuilt),
                    }
                }
            }
        }
    }
    out
}

/// Summary of a built forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Total number of nodes
    pub total: usize,
    /// Number of root-level nodes, orphans included
    pub roots: usize,
    /// Number of nodes flagged as orphaned
    pub orphaned: usize,
    /// Maximum depth (a forest of bare roots has depth 0)
    pub max_depth: usize,
}

/// Build an ordered forest from flat permission records.
///
/// Enabled/disabled filtering is the caller's job: pass in exactly the nodes
/// that should appear. Sibling lists are ordered by `(orphaned, order, name)`
/// with ties kept in input order.
pub fn build_tree<I>(nodes: I) -> Vec<PermissionTreeNode>
where
    I: IntoIterator<Item = PermissionNode>,
{
    let nodes: Vec<PermissionNode> = nodes.into_iter().collect();
    let count = nodes.len();

    // First occurrence wins if an id is duplicated.
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(count);
    for (i, node) in nodes.iter().enumerate() {
        index.entry(node.id()).or_insert(i);
    }

    let mut parent_of: Vec<Option<usize>> = vec![None; count];
    let mut orphaned = vec![false; count];
    let mut roots: Vec<usize> = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        match node.parent_id() {
            None => roots.push(i),
            Some(parent_id) => match index.get(parent_id) {
                Some(&parent) => parent_of[i] = Some(parent),
                None => {
                    #[cfg(feature = "audit")]
                    warn!(
                        "Permission '{}' ({}) has missing parent '{}'",
                        node.key(),
                        node.id(),
                        parent_id
                    );
                    orphaned[i] = true;
                    roots.push(i);
                }
            },
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (i, parent) in parent_of.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(i);
        }
    }

    // Anything not reachable from a root sits in or under a parent cycle.
    let mut reached = vec![false; count];
    for &root in &roots {
        mark_reachable(root, &children, &mut reached);
    }
    for start in 0..count {
        if reached[start] {
            continue;
        }
        let breaker = cycle_member(start, &parent_of);
        #[cfg(feature = "audit")]
        warn!(
            "Permission '{}' ({}) is part of a parent cycle; attaching at root level",
            nodes[breaker].key(),
            nodes[breaker].id()
        );
        if let Some(parent) = parent_of[breaker].take() {
            children[parent].retain(|&child| child != breaker);
        }
        orphaned[breaker] = true;
        roots.push(breaker);
        mark_reachable(breaker, &children, &mut reached);
    }

    let sort_key = |i: &usize| (orphaned[*i], nodes[*i].order());
    let compare = |a: &usize, b: &usize| {
        sort_key(a)
            .cmp(&sort_key(b))
            .then_with(|| nodes[*a].name().cmp(nodes[*b].name()))
    };
    roots.sort_by(compare);
    for siblings in children.iter_mut() {
        siblings.sort_by(compare);
    }

    let forest = materialize(&roots, &children, &orphaned, nodes);

    #[cfg(feature = "audit")]
    debug!(
        "Built permission tree with {} root permissions, {} orphaned",
        forest.len(),
        orphaned.iter().filter(|flag| **flag).count()
    );

    forest
}

/// Build a menu forest: only enabled MENU and PAGE nodes are kept.
pub fn build_menu_tree<I>(nodes: I) -> Vec<PermissionTreeNode>
where
    I: IntoIterator<Item = PermissionNode>,
{
    build_tree(
        nodes
            .into_iter()
            .filter(|node| node.is_enabled() && node.permission_type().is_menu_like()),
    )
}

fn mark_reachable(start: usize, children: &[Vec<usize>], reached: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if reached[i] {
            continue;
        }
        reached[i] = true;
        stack.extend(children[i].iter().copied());
    }
}

/// Walk parent pointers from `start` until a node repeats; that node is on the cycle.
fn cycle_member(start: usize, parent_of: &[Option<usize>]) -> usize {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        match parent_of[current] {
            Some(parent) => current = parent,
            None => return current,
        }
    }
    current
}

/// Assemble tree nodes leaves first, so no level waits on a deeper call.
fn materialize(
    roots: &[usize],
    children: &[Vec<usize>],
    orphaned: &[bool],
    nodes: Vec<PermissionNode>,
) -> Vec<PermissionTreeNode> {
    let count = nodes.len();
    let mut order = Vec::with_capacity(count);
    let mut placed = vec![false; count];
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut placed[i], true) {
            continue;
        }
        order.push(i);
        stack.extend(children[i].iter().rev().copied());
    }

    let mut slots: Vec<Option<PermissionNode>> = nodes.into_iter().map(Some).collect();
    let mut built: Vec<Option<PermissionTreeNode>> = (0..count).map(|_| None).collect();
    for &i in order.iter().rev() {
        let Some(permission) = slots[i].take() else {
            continue;
        };
        let children = children[i]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[i] = Some(PermissionTreeNode {
            permission,
            children,
            orphaned: orphaned[i],
        });
    }

    roots.iter().filter_map(|&root| built[root].take()).collect()
}

/// Find a node by permission key anywhere in the forest.
pub fn find_by_key<'a>(forest: &'a [PermissionTreeNode], key: &str) -> Option<&'a PermissionTreeNode> {
    walk(forest)
        .map(|(_, node)| node)
        .find(|node| node.permission.key() == key)
}

/// Whether the forest holds an enabled node with this key.
pub fn contains_enabled_key(forest: &[PermissionTreeNode], key: &str) -> bool {
    walk(forest).any(|(_, node)| node.permission.key() == key && node.permission.is_enabled())
}

/// All records in the forest, depth-first, in sibling order.
pub fn flatten(forest: &[PermissionTreeNode]) -> Vec<&PermissionNode> {
    walk(forest).map(|(_, node)| &node.permission).collect()
}

/// Drop disabled nodes, and branches left empty once their children were dropped.
///
/// A node that never had children is kept as a leaf.
pub fn prune_disabled(forest: &[PermissionTreeNode]) -> Vec<PermissionTreeNode> {
    rebuild(
        forest,
        |node| node.permission.is_enabled(),
        |node, children| {
            if !node.children.is_empty() && children.is_empty() {
                return None;
            }
            Some(PermissionTreeNode {
                permission: node.permission.clone(),
                children,
                orphaned: node.orphaned,
            })
        },
    )
}

/// Keep only nodes of the given types, re-parenting nothing.
///
/// Nodes of other types are removed together with their subtrees.
pub fn retain_types(forest: &[PermissionTreeNode], types: &[PermissionType]) -> Vec<PermissionTreeNode> {
    rebuild(
        forest,
        |node| types.contains(&node.permission.permission_type()),
        |node, children| {
            Some(PermissionTreeNode {
                permission: node.permission.clone(),
                children,
                orphaned: node.orphaned,
            })
        },
    )
}

/// Summarise a forest.
pub fn tree_stats(forest: &[PermissionTreeNode]) -> TreeStats {
    let mut stats = TreeStats {
        roots: forest.len(),
        ..TreeStats::default()
    };
    for (depth, node) in walk(forest) {
        stats.total += 1;
        stats.orphaned += usize::from(node.orphaned);
        stats.max_depth = stats.max_depth.max(depth);
    }
    stats
}

/// Whether making `proposed_parent` the parent of `permission_id` would close a cycle.
///
/// Walks the ancestor chain upward from the proposed parent using `parent_of`
/// (which returns the parent ID of a permission, or `None` at a root or for an
/// unknown ID) and reports a cycle if `permission_id` shows up on the way. A
/// loop in the existing data that does not pass through `permission_id` ends
/// the walk without reporting.
pub fn would_create_cycle<F>(permission_id: &str, proposed_parent: &str, mut parent_of: F) -> Result<bool>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let mut visited = HashSet::new();
    let mut current = proposed_parent.to_string();
    loop {
        if current == permission_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            return Ok(false);
        }
        match parent_of(&current)? {
            Some(parent) => current = parent,
            None => return Ok(false),
        }
    }
}

/// IDs of every transitive child of `permission_id` within `nodes`.
pub fn descendant_ids(permission_id: &str, nodes: &[PermissionNode]) -> Vec<String> {
    let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_id() {
            by_parent.entry(parent).or_default().push(node.id());
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(permission_id);
    let mut out = Vec::new();
    let mut stack = vec![permission_id];
    while let Some(current) = stack.pop() {
        if let Some(kids) = by_parent.get(current) {
            for &kid in kids {
                if seen.insert(kid) {
                    out.push(kid.to_string());
                    stack.push(kid);
                }
            }
        }
    }
    out
}
