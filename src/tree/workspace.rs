//! Workspaces: named collections of containers on one output.

use smithay::utils::{Logical, Rectangle};

use super::container::{FullscreenMode, Layout};
use super::{container, NodeId, NodePayload, Tree};
use crate::scene::SceneId;

/// One complete workspace state snapshot.
#[derive(Clone, Debug)]
pub struct WorkspaceState {
    /// Geometry in layout coordinates.
    pub geometry: Rectangle<i32, Logical>,
    pub layout: Layout,
    pub tiling: Vec<NodeId>,
    pub floating: Vec<NodeId>,
    /// Container fullscreened on this workspace, if any.
    pub fullscreen: Option<NodeId>,
    pub focused: bool,
    /// Direct tiling child that last held focus.
    pub focused_inactive_child: Option<NodeId>,
}

impl WorkspaceState {
    fn new(layout: Layout) -> Self {
        Self {
            geometry: Rectangle::default(),
            layout,
            tiling: Vec::new(),
            floating: Vec::new(),
            fullscreen: None,
            focused: false,
            focused_inactive_child: None,
        }
    }
}

#[derive(Debug)]
pub struct Workspace {
    pub name: String,
    /// Owning output. `None` only mid-evacuation.
    pub output: Option<NodeId>,
    pub pending: WorkspaceState,
    pub current: WorkspaceState,
    pub gaps_inner: i32,
    pub gaps_outer: i32,
    /// Preferred output names, most preferred first. A workspace returns to
    /// a preferred output when it reappears.
    pub output_priority: Vec<String>,
    /// Scene tree holding the tiled containers when not fullscreen.
    pub non_fullscreen_tree: SceneId,
    /// Scene tree the fullscreen container gets promoted into.
    pub fullscreen_tree: SceneId,
}

/// Create a workspace attached to `output`.
pub fn create(tree: &mut Tree, output: NodeId, name: String, config: &crate::config::Config) -> NodeId {
    let staging = tree.root_node().staging;
    let non_fullscreen_tree = tree.scene.create_tree(staging);
    let fullscreen_tree = tree.scene.create_tree(staging);

    let workspace = Workspace {
        name,
        output: Some(output),
        pending: WorkspaceState::new(config.default_layout),
        current: WorkspaceState::new(config.default_layout),
        gaps_inner: config.gaps_inner,
        gaps_outer: config.gaps_outer,
        output_priority: Vec::new(),
        non_fullscreen_tree,
        fullscreen_tree,
    };
    let id = tree.alloc(NodePayload::Workspace(workspace));

    let manager = &mut tree.output_mut(output).workspace_manager;
    manager.pending.workspaces.push(id);
    if manager.pending.active.is_none() {
        manager.pending.active = Some(id);
    }
    tree.set_dirty(output);
    tree.set_dirty(id);
    debug!(workspace = %tree.workspace(id).name, "Created workspace");
    id
}

/// Append a container to the tiling list.
pub fn add_tiling(tree: &mut Tree, ws: NodeId, con: NodeId) {
    debug_assert!(!tree.get(con).destroying, "cannot adopt a destroying node");
    debug_assert!(
        !tree.workspace(ws).pending.floating.contains(&con),
        "tiling and floating are disjoint"
    );
    tree.workspace_mut(ws).pending.tiling.push(con);
    let state = &mut tree.container_mut(con).pending;
    state.parent = None;
    state.workspace = Some(ws);
    link_children_to_workspace(tree, con, ws);
    if tree.workspace(ws).pending.focused_inactive_child.is_none() {
        tree.workspace_mut(ws).pending.focused_inactive_child = Some(con);
    }
    tree.set_dirty(ws);
    tree.set_dirty(con);
}

/// Append a container to the floating list.
pub fn add_floating(tree: &mut Tree, ws: NodeId, con: NodeId) {
    debug_assert!(!tree.get(con).destroying, "cannot adopt a destroying node");
    debug_assert!(
        !tree.workspace(ws).pending.tiling.contains(&con),
        "tiling and floating are disjoint"
    );
    tree.workspace_mut(ws).pending.floating.push(con);
    let state = &mut tree.container_mut(con).pending;
    state.parent = None;
    state.workspace = Some(ws);
    link_children_to_workspace(tree, con, ws);
    tree.set_dirty(ws);
    tree.set_dirty(con);
}

fn link_children_to_workspace(tree: &mut Tree, con: NodeId, ws: NodeId) {
    let children = tree.container(con).pending.children.clone();
    for child in children {
        tree.container_mut(child).pending.workspace = Some(ws);
        link_children_to_workspace(tree, child, ws);
    }
}

/// Remove a direct child from whichever list holds it.
pub fn remove_child(tree: &mut Tree, ws: NodeId, con: NodeId) {
    let state = &mut tree.workspace_mut(ws).pending;
    state.tiling.retain(|&c| c != con);
    state.floating.retain(|&c| c != con);
    if state.fullscreen == Some(con) {
        state.fullscreen = None;
    }
    if state.focused_inactive_child == Some(con) {
        state.focused_inactive_child = state.tiling.first().copied();
    }
    tree.set_dirty(ws);
}

pub fn set_layout(tree: &mut Tree, ws: NodeId, layout: Layout) {
    let state = &mut tree.workspace_mut(ws).pending;
    if state.layout != layout {
        state.layout = layout;
        tree.set_dirty(ws);
    }
}

pub fn is_empty(tree: &Tree, ws: NodeId) -> bool {
    let state = &tree.workspace(ws).pending;
    state.tiling.is_empty() && state.floating.is_empty()
}

/// Whether this workspace is the active workspace of its output.
pub fn is_visible(tree: &Tree, ws: NodeId) -> bool {
    tree.workspace(ws)
        .output
        .is_some_and(|o| tree.output(o).workspace_manager.pending.active == Some(ws))
}

/// Whether a sticky floater lives here (such a workspace must survive so the
/// floater has somewhere to return to mid-switch).
pub fn hosts_sticky(tree: &Tree, ws: NodeId) -> bool {
    tree.workspace(ws)
        .pending
        .floating
        .iter()
        .any(|&con| tree.container(con).sticky)
}

/// Destroy the workspace if the lifecycle rules allow it: empty, not
/// visible, not referenced by any focus stack, not hosting a sticky floater.
/// `in_focus_stack` is supplied by the seat layer.
pub fn consider_destroy(tree: &mut Tree, ws: NodeId, in_focus_stack: bool) -> bool {
    if tree.get(ws).destroying {
        return false;
    }
    if !is_empty(tree, ws) || is_visible(tree, ws) || in_focus_stack || hosts_sticky(tree, ws) {
        return false;
    }
    begin_destroy(tree, ws);
    true
}

/// Detach from the owning output and flag for destruction. Freed by the
/// transaction engine once unreferenced.
pub fn begin_destroy(tree: &mut Tree, ws: NodeId) {
    debug!(workspace = %tree.workspace(ws).name, "Destroying workspace");
    if let Some(output) = tree.workspace(ws).output {
        let manager = &mut tree.output_mut(output).workspace_manager;
        manager.pending.workspaces.retain(|&w| w != ws);
        if manager.pending.active == Some(ws) {
            manager.pending.active = manager.pending.workspaces.first().copied();
        }
        tree.set_dirty(output);
    }
    tree.workspace_mut(ws).output = None;
    tree.begin_destroy(ws);
    tree.set_dirty(ws);

    let staging = tree.root_node().staging;
    let (non_fs, fs) = {
        let workspace = tree.workspace(ws);
        (workspace.non_fullscreen_tree, workspace.fullscreen_tree)
    };
    tree.scene.reparent(non_fs, staging);
    tree.scene.reparent(fs, staging);
}

/// Record `output_name` as this workspace's most preferred output.
pub fn record_output_priority(tree: &mut Tree, ws: NodeId, output_name: &str) {
    let priority = &mut tree.workspace_mut(ws).output_priority;
    priority.retain(|name| name != output_name);
    priority.insert(0, output_name.to_string());
}

/// Find the highest-priority output (by recorded name) that is currently
/// enabled, if any.
pub fn highest_available_output(tree: &Tree, ws: NodeId) -> Option<NodeId> {
    let priority = &tree.workspace(ws).output_priority;
    for name in priority {
        let found = tree
            .root_node()
            .outputs
            .iter()
            .copied()
            .find(|&o| tree.output(o).output.name() == *name);
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Move every container of `ws` onto `target_ws`, used when an output goes
/// away. Sticky floaters and fullscreen state transfer too; fullscreen is
/// dropped if the target already has one.
pub fn carry_contents(tree: &mut Tree, ws: NodeId, target_ws: NodeId) {
    let old_box = tree.pending_box(ws);
    let new_box = tree
        .workspace(target_ws)
        .output
        .map(|o| tree.output(o).geometry())
        .unwrap_or_default();

    let tiling = tree.workspace(ws).pending.tiling.clone();
    for con in tiling {
        remove_child(tree, ws, con);
        tree.container_mut(con).pending.parent = None;
        add_tiling(tree, target_ws, con);
    }

    let floating = tree.workspace(ws).pending.floating.clone();
    for con in floating {
        remove_child(tree, ws, con);
        add_floating(tree, target_ws, con);
        container::floating_fix_coordinates(tree, con, old_box, new_box);
    }

    let fullscreen = tree.workspace_mut(ws).pending.fullscreen.take();
    if let Some(fs) = fullscreen {
        tree.set_dirty(ws);
        if tree.workspace(target_ws).pending.fullscreen.is_none()
            && tree.container(fs).pending.fullscreen_mode == FullscreenMode::Workspace
        {
            tree.workspace_mut(target_ws).pending.fullscreen = Some(fs);
        } else {
            container::set_fullscreen(tree, fs, FullscreenMode::None);
        }
    }
    tree.set_dirty(target_ws);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::tree_with_output;

    #[test]
    fn first_workspace_becomes_active() {
        let (tree, output, ws) = tree_with_output();
        let manager = &tree.output(output).workspace_manager;
        assert_eq!(manager.pending.workspaces, vec![ws]);
        assert_eq!(manager.pending.active, Some(ws));
    }

    #[test]
    fn destroy_rules_hold() {
        let (mut tree, output, ws) = tree_with_output();
        let config = crate::config::Config::default();

        // Visible (active) workspaces never die.
        assert!(!consider_destroy(&mut tree, ws, false));

        let other = create(&mut tree, output, String::from("2"), &config);
        assert!(is_visible(&tree, ws));
        assert!(!is_visible(&tree, other));

        // Referenced by a focus stack: survives.
        assert!(!consider_destroy(&mut tree, other, true));
        // Unreferenced, empty, hidden: dies.
        assert!(consider_destroy(&mut tree, other, false));
        assert!(tree.get(other).destroying);
        assert!(!tree
            .output(output)
            .workspace_manager
            .pending
            .workspaces
            .contains(&other));
    }

    #[test]
    fn output_priority_is_most_recent_first() {
        let (mut tree, output, ws) = tree_with_output();
        record_output_priority(&mut tree, ws, "DP-1");
        record_output_priority(&mut tree, ws, "HDMI-1");
        record_output_priority(&mut tree, ws, "DP-1");
        assert_eq!(tree.workspace(ws).output_priority, vec!["DP-1", "HDMI-1"]);

        // The only live output is HEADLESS-1, which is not in the list.
        assert_eq!(highest_available_output(&tree, ws), None);
        record_output_priority(&mut tree, ws, "HEADLESS-1");
        assert_eq!(highest_available_output(&tree, ws), Some(output));
    }
}
