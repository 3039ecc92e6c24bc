//! The window-management node tree.
//!
//! Four node variants — root, output, workspace, container — live in one
//! arena keyed by [`NodeId`]. Back-references (container → workspace → output
//! → root) are plain ids, which sidesteps the cyclic ownership the data model
//! would otherwise need.
//!
//! Every mutation of a node's *pending* state marks the node dirty and
//! enrolls it in the tree-wide dirty list; [`crate::transaction`] drains that
//! list into transactions. The *current* state of a node is only ever written
//! by the transaction apply phase.
//!
//! A node with `destroying` set is detached from the layout but kept in the
//! arena while transactions still reference it (`txnrefs > 0`); the last
//! transaction to release it frees the slot.

use smithay::utils::{Logical, Rectangle};

use crate::scene::SceneGraph;

pub mod arrange;
pub mod container;
pub mod output;
pub mod root;
pub mod workspace;

pub use container::{Border, Container, ContainerState, FullscreenMode, Layout};
pub use output::{OutputLayers, OutputNode, WorkspaceManager};
pub use root::{Root, RootLayers};
pub use workspace::{Workspace, WorkspaceState};

/// Handle to a [`Node`] inside the [`Tree`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Discriminant of [`NodePayload`], for logging and quick checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Output,
    Workspace,
    Container,
}

#[derive(Debug)]
pub enum NodePayload {
    Root(Root),
    Output(OutputNode),
    Workspace(Workspace),
    Container(Container),
}

#[derive(Debug)]
pub struct Node {
    /// Process-unique sequence number, for logging only. Slot indices get
    /// reused; this does not.
    pub seq: u64,
    pub dirty: bool,
    pub destroying: bool,
    /// Number of live transaction instructions referencing this node.
    pub txnrefs: usize,
    /// Index of this node's instruction inside the in-flight (queued)
    /// transaction, if any. A node appears at most once there, which is what
    /// limits each view to one outstanding configure.
    pub instruction: Option<usize>,
    pub payload: NodePayload,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match &self.payload {
            NodePayload::Root(_) => NodeKind::Root,
            NodePayload::Output(_) => NodeKind::Output,
            NodePayload::Workspace(_) => NodeKind::Workspace,
            NodePayload::Container(_) => NodeKind::Container,
        }
    }

    /// Whether this is a leaf container wrapping a mapped view.
    pub fn is_view(&self) -> bool {
        matches!(&self.payload, NodePayload::Container(c) if c.view.is_some())
    }
}

/// The arena of window-management nodes plus the scene graph they project
/// into.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    next_seq: u64,
    pub scene: SceneGraph,
    root: NodeId,
    /// Nodes whose pending state changed since the last transaction.
    /// Invariant: a node is in this list iff its `dirty` flag is set.
    pub dirty_nodes: Vec<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        let mut scene = SceneGraph::new();
        let root_payload = Root::new(&mut scene);
        let mut tree = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            next_seq: 0,
            scene,
            root: NodeId(0),
            dirty_nodes: Vec::new(),
        };
        let root = tree.alloc(NodePayload::Root(root_payload));
        debug_assert_eq!(root, NodeId(0));
        root::create_fallback_output(&mut tree);
        tree
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {

    pub(crate) fn alloc(&mut self, payload: NodePayload) -> NodeId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let node = Node {
            seq,
            dirty: false,
            destroying: false,
            txnrefs: 0,
            instruction: None,
            payload,
        };
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            NodeId(slot)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    /// Release a node slot. Only the transaction reaper and the direct
    /// destroy paths (`txnrefs == 0`) call this.
    pub(crate) fn free(&mut self, id: NodeId) {
        let node = self.nodes[id.0].take().expect("stale node id");
        debug_assert_eq!(node.txnrefs, 0, "freed a node with live txnrefs");
        self.free.push(id.0);
        self.dirty_nodes.retain(|&n| n != id);
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("stale node id")
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stale node id")
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(Option::is_some)
    }

    /// Mark a node's pending state as changed. Idempotent.
    pub fn set_dirty(&mut self, id: NodeId) {
        let node = self.get_mut(id);
        if !node.dirty {
            node.dirty = true;
            self.dirty_nodes.push(id);
        }
    }

    pub fn begin_destroy(&mut self, id: NodeId) {
        self.get_mut(id).destroying = true;
    }

    // Typed accessors. The callers know the variant; a mismatch is a logic
    // error, not a runtime condition.

    pub fn root_node(&self) -> &Root {
        match &self.get(self.root).payload {
            NodePayload::Root(root) => root,
            _ => unreachable!(),
        }
    }

    pub fn root_node_mut(&mut self) -> &mut Root {
        let root = self.root;
        match &mut self.get_mut(root).payload {
            NodePayload::Root(root) => root,
            _ => unreachable!(),
        }
    }

    pub fn output(&self, id: NodeId) -> &OutputNode {
        match &self.get(id).payload {
            NodePayload::Output(output) => output,
            other => unreachable!("expected output, got {:?}", other_kind(other)),
        }
    }

    pub fn output_mut(&mut self, id: NodeId) -> &mut OutputNode {
        match &mut self.get_mut(id).payload {
            NodePayload::Output(output) => output,
            other => unreachable!("expected output, got {:?}", other_kind(other)),
        }
    }

    pub fn workspace(&self, id: NodeId) -> &Workspace {
        match &self.get(id).payload {
            NodePayload::Workspace(workspace) => workspace,
            other => unreachable!("expected workspace, got {:?}", other_kind(other)),
        }
    }

    pub fn workspace_mut(&mut self, id: NodeId) -> &mut Workspace {
        match &mut self.get_mut(id).payload {
            NodePayload::Workspace(workspace) => workspace,
            other => unreachable!("expected workspace, got {:?}", other_kind(other)),
        }
    }

    pub fn container(&self, id: NodeId) -> &Container {
        match &self.get(id).payload {
            NodePayload::Container(container) => container,
            other => unreachable!("expected container, got {:?}", other_kind(other)),
        }
    }

    pub fn container_mut(&mut self, id: NodeId) -> &mut Container {
        match &mut self.get_mut(id).payload {
            NodePayload::Container(container) => container,
            other => unreachable!("expected container, got {:?}", other_kind(other)),
        }
    }

    pub fn try_container(&self, id: NodeId) -> Option<&Container> {
        match &self.get(id).payload {
            NodePayload::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn try_workspace(&self, id: NodeId) -> Option<&Workspace> {
        match &self.get(id).payload {
            NodePayload::Workspace(workspace) => Some(workspace),
            _ => None,
        }
    }

    /// Parent of a node in the layout tree, following pending state.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        match &self.get(id).payload {
            NodePayload::Root(_) => None,
            NodePayload::Output(_) => Some(self.root),
            NodePayload::Workspace(workspace) => workspace.output,
            NodePayload::Container(container) => container
                .pending
                .parent
                .or(container.pending.workspace),
        }
    }

    /// Whether `ancestor` is on `id`'s parent chain (or is `id` itself).
    pub fn is_self_or_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            if node == ancestor {
                return true;
            }
            cursor = self.parent_of(node);
        }
        false
    }

    /// The workspace a container (or workspace) node belongs to.
    pub fn workspace_of(&self, id: NodeId) -> Option<NodeId> {
        match &self.get(id).payload {
            NodePayload::Workspace(_) => Some(id),
            NodePayload::Container(container) => container.pending.workspace,
            _ => None,
        }
    }

    /// The output a node lives on, following pending state.
    pub fn output_of(&self, id: NodeId) -> Option<NodeId> {
        match &self.get(id).payload {
            NodePayload::Output(_) => Some(id),
            NodePayload::Workspace(workspace) => workspace.output,
            NodePayload::Container(_) => self
                .workspace_of(id)
                .and_then(|ws| self.workspace(ws).output),
            NodePayload::Root(_) => None,
        }
    }

    /// Geometry of a node in layout coordinates, from pending state.
    pub fn pending_box(&self, id: NodeId) -> Rectangle<i32, Logical> {
        match &self.get(id).payload {
            NodePayload::Root(root) => root.geometry,
            NodePayload::Output(output) => output.geometry(),
            NodePayload::Workspace(workspace) => workspace.pending.geometry,
            NodePayload::Container(container) => container.pending.geometry(),
        }
    }

    /// Iterate over all live node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i))
    }
}

fn other_kind(payload: &NodePayload) -> NodeKind {
    match payload {
        NodePayload::Root(_) => NodeKind::Root,
        NodePayload::Output(_) => NodeKind::Output,
        NodePayload::Workspace(_) => NodeKind::Workspace,
        NodePayload::Container(_) => NodeKind::Container,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use smithay::output::{Output, PhysicalProperties, Subpixel};
    use smithay::utils::Size;

    use super::*;
    use crate::config::Config;

    /// A tree with one enabled output and one empty workspace, the smallest
    /// useful fixture.
    pub fn tree_with_output() -> (Tree, NodeId, NodeId) {
        let mut tree = Tree::new();
        let output = Output::new(
            String::from("HEADLESS-1"),
            PhysicalProperties {
                size: Size::from((520, 290)),
                subpixel: Subpixel::Unknown,
                make: String::from("strata"),
                model: String::from("test"),
            },
        );
        output.change_current_state(
            Some(smithay::output::Mode {
                size: Size::from((1920, 1080)),
                refresh: 60_000,
            }),
            None,
            None,
            None,
        );
        let config = Config::default();
        let output_id = output::create(&mut tree, output);
        output::enable(&mut tree, output_id, &config);
        let ws = tree.output(output_id).workspace_manager.pending.active.unwrap();
        (tree, output_id, ws)
    }

    /// Drain the dirty list without going through the transaction engine,
    /// for tests that only care about pending-state arithmetic.
    pub fn clear_dirty(tree: &mut Tree) {
        let dirty = std::mem::take(&mut tree.dirty_nodes);
        for id in dirty {
            tree.get_mut(id).dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_flag_and_list_stay_in_sync() {
        let (mut tree, output, ws) = test_support::tree_with_output();
        test_support::clear_dirty(&mut tree);

        tree.set_dirty(ws);
        tree.set_dirty(ws);
        tree.set_dirty(output);
        assert_eq!(tree.dirty_nodes, vec![ws, output]);
        assert!(tree.get(ws).dirty);

        for id in tree.node_ids().collect::<Vec<_>>() {
            let in_list = tree.dirty_nodes.contains(&id);
            assert_eq!(tree.get(id).dirty, in_list);
        }
    }

    #[test]
    fn ancestry_follows_pending_links() {
        let (tree, output, ws) = test_support::tree_with_output();
        assert!(tree.is_self_or_ancestor(tree.root(), ws));
        assert!(tree.is_self_or_ancestor(output, ws));
        assert!(!tree.is_self_or_ancestor(ws, output));
        assert_eq!(tree.output_of(ws), Some(output));
    }
}
