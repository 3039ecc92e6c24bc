//! Seat focus arbitration.
//!
//! Each seat keeps a focus stack: one entry per live workspace/container
//! node, most recently focused first. Raw focus operations only reorder the
//! stack and mark nodes dirty; the full focus operation additionally
//! deactivates the old view, activates the new one, and lets the state layer
//! move keyboard focus (which must respect an exclusive layer surface).

use smithay::desktop::LayerSurface;

use crate::scene::SceneId;
use crate::tree::{NodeId, NodeKind, Tree};

/// Ordered set of live nodes, most recently focused first.
#[derive(Debug, Default)]
pub struct FocusStack {
    stack: Vec<NodeId>,
}

impl FocusStack {
    /// Move (or insert) `node` to the head. No events, no flags.
    pub fn set_raw_focus(&mut self, node: NodeId) {
        self.stack.retain(|&n| n != node);
        self.stack.insert(0, node);
    }

    pub fn remove(&mut self, node: NodeId) {
        self.stack.retain(|&n| n != node);
    }

    pub fn head(&self) -> Option<NodeId> {
        self.stack.first().copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.stack.contains(&node)
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.stack.iter().copied()
    }

    /// Most recently focused node that lives under `ancestor` (or is it).
    pub fn focus_inactive_in(&self, tree: &Tree, ancestor: NodeId) -> Option<NodeId> {
        self.stack
            .iter()
            .copied()
            .find(|&n| tree.is_self_or_ancestor(ancestor, n))
    }

    /// Most recently focused view container under `ancestor`.
    pub fn focus_inactive_view_in(&self, tree: &Tree, ancestor: NodeId) -> Option<NodeId> {
        self.stack
            .iter()
            .copied()
            .find(|&n| tree.get(n).is_view() && tree.is_self_or_ancestor(ancestor, n))
    }

    /// Most recently focused tiling container that is a direct child of the
    /// workspace (walking the last focused node up to its top-level parent).
    pub fn focus_inactive_tiling(&self, tree: &Tree, ws: NodeId) -> Option<NodeId> {
        let focus = self.stack.iter().copied().find(|&n| {
            tree.get(n).kind() == NodeKind::Container
                && tree.workspace_of(n) == Some(ws)
                && !tree
                    .workspace(ws)
                    .pending
                    .floating
                    .contains(&top_level_of(tree, n))
        })?;
        Some(top_level_of(tree, focus))
    }

    /// The workspace the focus currently sits on.
    pub fn focused_workspace(&self, tree: &Tree) -> Option<NodeId> {
        self.head().and_then(|n| tree.workspace_of(n))
    }
}

fn top_level_of(tree: &Tree, mut node: NodeId) -> NodeId {
    while let Some(parent) = tree.container(node).pending.parent {
        node = parent;
    }
    node
}

/// Outcome of a focus-stack update, consumed by the state layer to emit the
/// actual keyboard/activation events.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FocusChange {
    /// View container that lost focus, if any.
    pub unfocused: Option<NodeId>,
    /// View container that gained focus, if any.
    pub focused: Option<NodeId>,
    /// False when the target was already focused (idempotent call).
    pub changed: bool,
}

/// Update the focus stack and all pending focus flags for focusing `node`
/// (a workspace or container). Emits no client events; the caller handles
/// keyboard enter/leave, activation and input-method notification based on
/// the returned [`FocusChange`].
pub fn prepare_focus(tree: &mut Tree, stack: &mut FocusStack, node: NodeId) -> FocusChange {
    debug_assert!(matches!(
        tree.get(node).kind(),
        NodeKind::Workspace | NodeKind::Container
    ));
    let previous = stack.head();
    if previous == Some(node) {
        return FocusChange::default();
    }
    let previous_view = previous.filter(|&n| tree.get(n).is_view());

    // Raw focus every ancestor root-wards, finishing on the target, so the
    // whole chain is fresher than any other subtree.
    let mut chain = vec![node];
    let mut cursor = node;
    while let Some(parent) = tree.parent_of(cursor) {
        // Only workspaces and containers live in the stack.
        if !matches!(
            tree.get(parent).kind(),
            NodeKind::Container | NodeKind::Workspace
        ) {
            break;
        }
        chain.push(parent);
        cursor = parent;
    }
    for &n in chain.iter().rev() {
        stack.set_raw_focus(n);
        tree.set_dirty(n);
        if let Some(parent) = tree.parent_of(n) {
            if parent != tree.root() {
                tree.set_dirty(parent);
            }
        }
    }

    // Clear the old focused flag.
    if let Some(prev) = previous {
        if tree.exists(prev) {
            match tree.get(prev).kind() {
                NodeKind::Container => {
                    tree.container_mut(prev).pending.focused = false;
                    tree.set_dirty(prev);
                }
                NodeKind::Workspace => {
                    tree.workspace_mut(prev).pending.focused = false;
                    tree.set_dirty(prev);
                }
                _ => {}
            }
        }
    }

    let mut change = FocusChange {
        unfocused: previous_view,
        focused: None,
        changed: true,
    };

    match tree.get(node).kind() {
        NodeKind::Workspace => {
            tree.workspace_mut(node).pending.focused = true;
            tree.set_dirty(node);
        }
        NodeKind::Container => {
            tree.container_mut(node).pending.focused = true;
            tree.set_dirty(node);
            if tree.get(node).is_view() {
                change.focused = Some(node);
                // Focus clears urgency.
                let view = tree.container_mut(node).view.as_mut().expect("is_view");
                view.urgent = false;
            }

            // Record the focus path for stacked/tabbed raise and for
            // focus-inactive resolution after workspace switches.
            let mut child = node;
            while let Some(parent) = tree.container(child).pending.parent {
                tree.container_mut(parent).pending.focused_inactive_child = Some(child);
                tree.set_dirty(parent);
                child = parent;
            }
            if let Some(ws) = tree.container(node).pending.workspace {
                if tree.workspace(ws).pending.tiling.contains(&child) {
                    tree.workspace_mut(ws).pending.focused_inactive_child = Some(child);
                }
                tree.set_dirty(ws);
            }
        }
        _ => unreachable!("checked on entry"),
    }

    change
}

/// Per-seat state wrapped around the toolkit seat.
#[derive(Debug)]
pub struct Seat {
    pub smithay: smithay::input::Seat<crate::state::State>,
    pub focus_stack: FocusStack,
    /// Layer surface holding keyboard focus, overriding the stack.
    pub focused_layer: Option<LayerSurface>,
    /// Whether any keyboard focus is currently delivered at all (false while
    /// a session lock with no surface holds the seat).
    pub has_keyboard_focus: bool,
    /// Scene tree for this seat's drag icons.
    pub drag_icons: SceneId,
}

impl Seat {
    pub fn new(smithay: smithay::input::Seat<crate::state::State>, tree: &mut Tree) -> Self {
        let layer = tree.root_node().layers.seat;
        let drag_icons = tree.scene.create_tree(layer);
        Self {
            smithay,
            focus_stack: FocusStack::default(),
            focused_layer: None,
            has_keyboard_focus: false,
            drag_icons,
        }
    }

    /// Drop every reference to a freed node.
    pub fn purge_node(&mut self, node: NodeId) {
        self.focus_stack.remove(node);
    }

    /// The focused container, if the head of the stack is one.
    pub fn focused_container(&self, tree: &Tree) -> Option<NodeId> {
        self.focus_stack
            .head()
            .filter(|&n| tree.get(n).kind() == NodeKind::Container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::tree_with_output;
    use crate::tree::{container, workspace, Layout};

    fn leaf(tree: &mut Tree, ws: NodeId) -> NodeId {
        let con = container::create_split(tree, Layout::None);
        workspace::add_tiling(tree, ws, con);
        con
    }

    #[test]
    fn focus_moves_the_whole_ancestor_chain_to_the_head() {
        let (mut tree, _output, ws) = tree_with_output();
        let a = leaf(&mut tree, ws);
        let split = container::create_split(&mut tree, Layout::Vertical);
        workspace::add_tiling(&mut tree, ws, split);
        let b = container::create_split(&mut tree, Layout::None);
        container::add_child(&mut tree, split, b);

        let mut stack = FocusStack::default();
        prepare_focus(&mut tree, &mut stack, a);
        prepare_focus(&mut tree, &mut stack, b);

        let order: Vec<NodeId> = stack.iter().collect();
        assert_eq!(order, vec![b, split, ws, a]);
        assert!(tree.container(b).pending.focused);
        assert!(!tree.container(a).pending.focused);
        assert_eq!(
            tree.container(split).pending.focused_inactive_child,
            Some(b)
        );
        assert_eq!(
            tree.workspace(ws).pending.focused_inactive_child,
            Some(split)
        );
    }

    #[test]
    fn refocusing_the_focused_node_is_a_no_op() {
        let (mut tree, _output, ws) = tree_with_output();
        let a = leaf(&mut tree, ws);
        let mut stack = FocusStack::default();

        let first = prepare_focus(&mut tree, &mut stack, a);
        assert!(first.changed);

        crate::tree::test_support::clear_dirty(&mut tree);
        let second = prepare_focus(&mut tree, &mut stack, a);
        assert!(!second.changed);
        assert_eq!(second.focused, None);
        assert!(tree.dirty_nodes.is_empty(), "no dirt from a no-op focus");
    }

    #[test]
    fn focus_inactive_resolves_within_an_ancestor() {
        let (mut tree, output, ws1) = tree_with_output();
        let config = crate::config::Config::default();
        let ws2 = workspace::create(&mut tree, output, String::from("2"), &config);
        let a = leaf(&mut tree, ws1);
        let b = leaf(&mut tree, ws2);

        let mut stack = FocusStack::default();
        prepare_focus(&mut tree, &mut stack, a);
        prepare_focus(&mut tree, &mut stack, b);

        assert_eq!(stack.focus_inactive_in(&tree, ws1), Some(a));
        assert_eq!(stack.focus_inactive_in(&tree, ws2), Some(b));
        assert_eq!(stack.focused_workspace(&tree), Some(ws2));

        // Tiling resolution walks to the top-level tiling child; viewless
        // split containers never count as views.
        assert_eq!(stack.focus_inactive_tiling(&tree, ws1), Some(a));
        assert_eq!(stack.focus_inactive_view_in(&tree, ws1), None);
    }

    #[test]
    fn the_stack_never_keeps_a_freed_node() {
        let (mut tree, _output, ws) = tree_with_output();
        let a = leaf(&mut tree, ws);
        let b = leaf(&mut tree, ws);
        let mut stack = FocusStack::default();
        prepare_focus(&mut tree, &mut stack, a);
        prepare_focus(&mut tree, &mut stack, b);

        // Each node appears exactly once.
        let order: Vec<NodeId> = stack.iter().collect();
        let mut dedup = order.clone();
        dedup.dedup();
        assert_eq!(order, dedup);

        stack.remove(b);
        assert!(!stack.contains(b));
        assert_eq!(stack.focus_inactive_in(&tree, ws), Some(a));
    }
}
