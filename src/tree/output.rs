//! Output nodes: one per enabled head, plus the fallback.
//!
//! An output owns its workspaces through a [`WorkspaceManager`] (the
//! pending/current pair of workspace list + active pointer), the usable area
//! left after layer-shell exclusive zones, and the per-output scene layers
//! that get slotted into the matching global layers every arrange pass.

use smithay::output::Output;
use smithay::utils::{Logical, Rectangle, Size};
use smithay::wayland::session_lock::LockSurface;

use super::{workspace, NodeId, NodePayload, Tree};
use crate::config::Config;
use crate::scene::{SceneGraph, SceneId};

/// Per-output scene trees, bottom to top.
#[derive(Debug)]
pub struct OutputLayers {
    pub shell_background: SceneId,
    pub shell_bottom: SceneId,
    pub tiling: SceneId,
    pub fullscreen: SceneId,
    pub shell_top: SceneId,
    pub shell_overlay: SceneId,
    pub session_lock: SceneId,
    pub osd: SceneId,
    pub water_mark: SceneId,
    pub black_screen: SceneId,
}

impl OutputLayers {
    fn new(scene: &mut SceneGraph, parent: SceneId) -> Self {
        Self {
            shell_background: scene.create_tree(parent),
            shell_bottom: scene.create_tree(parent),
            tiling: scene.create_tree(parent),
            fullscreen: scene.create_tree(parent),
            shell_top: scene.create_tree(parent),
            shell_overlay: scene.create_tree(parent),
            session_lock: scene.create_tree(parent),
            osd: scene.create_tree(parent),
            water_mark: scene.create_tree(parent),
            black_screen: scene.create_tree(parent),
        }
    }
}

/// The pending/current snapshot pair of an output's workspace set.
#[derive(Clone, Debug, Default)]
pub struct WorkspaceManagerState {
    pub workspaces: Vec<NodeId>,
    pub active: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct WorkspaceManager {
    pub pending: WorkspaceManagerState,
    pub current: WorkspaceManagerState,
}

#[derive(Debug)]
pub struct OutputNode {
    /// The toolkit output this node wraps. The fallback output has no
    /// backing device and is never committed.
    pub output: Output,
    pub workspace_manager: WorkspaceManager,
    /// Area left for tiling after layer-shell exclusive reservations, in
    /// output-local coordinates.
    pub usable_area: Rectangle<i32, Logical>,
    pub layers: OutputLayers,
    /// Solid fill behind a fullscreen container.
    pub fullscreen_background: SceneId,
    /// Enabled after the first successful mode commit.
    pub enabled: bool,
    /// Session-lock surface assigned to this output, if locked.
    pub lock_surface: Option<LockSurface>,
    /// Lock backdrop rect inside the session_lock layer.
    pub lock_background: Option<SceneId>,
    /// A client updated the gamma LUT; rebuild output state next frame.
    pub gamma_lut_changed: bool,
}

impl OutputNode {
    /// Output box in layout coordinates.
    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        crate::output::OutputExt::geometry(&self.output)
    }
}

/// Create a node for a new (not yet enabled) output.
pub fn create(tree: &mut Tree, output: Output) -> NodeId {
    let staging = tree.root_node().staging;
    let layers = OutputLayers::new(&mut tree.scene, staging);
    let fullscreen_background =
        tree.scene
            .create_rect(layers.fullscreen, Size::default(), [0.0, 0.0, 0.0, 1.0]);
    tree.scene.lower_to_bottom(fullscreen_background);

    let node = OutputNode {
        output,
        workspace_manager: WorkspaceManager::default(),
        usable_area: Rectangle::default(),
        layers,
        fullscreen_background,
        enabled: false,
        lock_surface: None,
        lock_background: None,
        gamma_lut_changed: false,
    };
    let id = tree.alloc(NodePayload::Output(node));
    tree.root_node_mut().all_outputs.push(id);
    id
}

/// Enable an output after its first successful mode commit: join the root's
/// enabled list and guarantee at least one workspace.
pub fn enable(tree: &mut Tree, id: NodeId, config: &Config) {
    if tree.output(id).enabled {
        return;
    }
    tree.output_mut(id).enabled = true;
    tree.root_node_mut().outputs.push(id);
    let root = tree.root();
    tree.set_dirty(root);

    let geometry = tree.output(id).geometry();
    tree.output_mut(id).usable_area =
        Rectangle::new((0, 0).into(), geometry.size);

    // Reclaim workspaces that listed this output as their preferred home.
    let name = tree.output(id).output.name();
    let candidates: Vec<NodeId> = tree
        .root_node()
        .outputs
        .iter()
        .filter(|&&o| o != id)
        .flat_map(|&o| tree.output(o).workspace_manager.pending.workspaces.clone())
        .collect();
    for ws in candidates {
        if tree.workspace(ws).output_priority.first().map(String::as_str) == Some(name.as_str()) {
            reattach_workspace(tree, ws, id);
        }
    }

    if tree.output(id).workspace_manager.pending.workspaces.is_empty() {
        let ws_name = next_workspace_name(tree);
        workspace::create(tree, id, ws_name, config);
    }
    tree.set_dirty(id);
    info!(output = %name, "Enabled output");
}

/// Lowest unused numeric workspace name across all outputs.
fn next_workspace_name(tree: &Tree) -> String {
    let used: Vec<String> = tree
        .root_node()
        .all_outputs
        .iter()
        .flat_map(|&o| &tree.output(o).workspace_manager.pending.workspaces)
        .map(|&ws| tree.workspace(ws).name.clone())
        .collect();
    (1..)
        .map(|n: u32| n.to_string())
        .find(|name| !used.contains(name))
        .expect("unbounded name space")
}

/// Move a workspace (the node itself) onto another output.
pub fn reattach_workspace(tree: &mut Tree, ws: NodeId, target: NodeId) {
    let old_output = tree.workspace(ws).output;
    if old_output == Some(target) {
        return;
    }
    if let Some(old) = old_output {
        let manager = &mut tree.output_mut(old).workspace_manager;
        manager.pending.workspaces.retain(|&w| w != ws);
        if manager.pending.active == Some(ws) {
            manager.pending.active = manager.pending.workspaces.first().copied();
        }
        tree.set_dirty(old);
    }

    let old_box = tree.workspace(ws).pending.geometry;
    tree.workspace_mut(ws).output = Some(target);
    let manager = &mut tree.output_mut(target).workspace_manager;
    manager.pending.workspaces.push(ws);
    if manager.pending.active.is_none() {
        manager.pending.active = Some(ws);
    }
    tree.set_dirty(target);
    tree.set_dirty(ws);

    // Keep floaters where the user put them, relative to the output box.
    let new_box = tree.output(target).geometry();
    let floating = tree.workspace(ws).pending.floating.clone();
    for con in floating {
        super::container::floating_fix_coordinates(tree, con, old_box, new_box);
    }
}

/// Switch the active workspace. Sticky floaters follow onto the newly
/// active workspace of the same output.
pub fn switch_to_workspace(tree: &mut Tree, output: NodeId, ws: NodeId) {
    let manager = &tree.output(output).workspace_manager;
    debug_assert!(
        manager.pending.workspaces.contains(&ws),
        "active workspace must belong to its output"
    );
    let previous = manager.pending.active;
    if previous == Some(ws) {
        return;
    }
    tree.output_mut(output).workspace_manager.pending.active = Some(ws);
    tree.set_dirty(output);
    tree.set_dirty(ws);

    let output_name = tree.output(output).output.name();
    workspace::record_output_priority(tree, ws, &output_name);

    if let Some(previous) = previous {
        tree.set_dirty(previous);
        let sticky: Vec<NodeId> = tree
            .workspace(previous)
            .pending
            .floating
            .iter()
            .copied()
            .filter(|&con| tree.container(con).sticky)
            .collect();
        for con in sticky {
            workspace::remove_child(tree, previous, con);
            workspace::add_floating(tree, ws, con);
        }
    }
}

/// Disable an output: evacuate every workspace to a sibling output (or the
/// fallback), then leave the enabled list. The node itself stays until the
/// backend destroys the head.
pub fn disable(tree: &mut Tree, id: NodeId) {
    if !tree.output(id).enabled {
        return;
    }
    info!(output = %tree.output(id).output.name(), "Disabling output");
    evacuate(tree, id);
    tree.output_mut(id).enabled = false;
    tree.root_node_mut().outputs.retain(|&o| o != id);
    let root = tree.root();
    tree.set_dirty(root);
    tree.set_dirty(id);
}

/// Remove the node entirely (backend destroyed the head).
pub fn begin_destroy(tree: &mut Tree, id: NodeId) {
    disable(tree, id);
    tree.root_node_mut().all_outputs.retain(|&o| o != id);
    tree.begin_destroy(id);
    tree.set_dirty(id);
}

/// Move all workspaces away from `id`. Targets, in order: each workspace's
/// recorded preferred output, the first other enabled output, the fallback.
/// Empty workspaces that nothing pins are destroyed instead of moved.
pub fn evacuate(tree: &mut Tree, id: NodeId) {
    let fallback = tree.root_node().fallback_output;
    let sibling = tree
        .root_node()
        .outputs
        .iter()
        .copied()
        .find(|&o| o != id && Some(o) != fallback);

    let workspaces = tree.output(id).workspace_manager.pending.workspaces.clone();
    for ws in workspaces {
        if workspace::is_empty(tree, ws) && !workspace::hosts_sticky(tree, ws) {
            workspace::begin_destroy(tree, ws);
            continue;
        }

        let target_output = workspace::highest_available_output(tree, ws)
            .filter(|&o| o != id)
            .or(sibling)
            .or(fallback)
            .expect("the fallback output always exists");

        // If the target already shows a workspace, merge into it rather than
        // stacking another hidden workspace with the same name.
        let target_active = tree.output(target_output).workspace_manager.pending.active;
        let clashes = tree
            .output(target_output)
            .workspace_manager
            .pending
            .workspaces
            .iter()
            .any(|&w| tree.workspace(w).name == tree.workspace(ws).name);
        if clashes {
            if let Some(target_ws) = target_active {
                workspace::carry_contents(tree, ws, target_ws);
                workspace::begin_destroy(tree, ws);
                continue;
            }
        }
        reattach_workspace(tree, ws, target_output);
    }
}

#[cfg(test)]
mod tests {
    use smithay::output::{Output, PhysicalProperties, Subpixel};
    use smithay::utils::Size;

    use super::*;
    use crate::tree::test_support::tree_with_output;
    use crate::tree::{container, Tree};

    fn make_output(name: &str, w: i32, h: i32, x: i32) -> Output {
        let output = Output::new(
            String::from(name),
            PhysicalProperties {
                size: Size::from((520, 290)),
                subpixel: Subpixel::Unknown,
                make: String::from("strata"),
                model: String::from("test"),
            },
        );
        output.change_current_state(
            Some(smithay::output::Mode {
                size: Size::from((w, h)),
                refresh: 60_000,
            }),
            None,
            None,
            Some((x, 0).into()),
        );
        output
    }

    fn add_enabled_output(tree: &mut Tree, name: &str, x: i32) -> NodeId {
        let config = Config::default();
        let id = create(tree, make_output(name, 1920, 1080, x));
        enable(tree, id, &config);
        id
    }

    #[test]
    fn every_enabled_output_gets_a_workspace() {
        let (mut tree, _a, _ws) = tree_with_output();
        let b = add_enabled_output(&mut tree, "DP-2", 1920);
        let manager = &tree.output(b).workspace_manager;
        assert_eq!(manager.pending.workspaces.len(), 1);
        assert_eq!(manager.pending.active, manager.pending.workspaces.first().copied());
        // Names don't collide across outputs.
        let a_ws = tree.output(_a).workspace_manager.pending.workspaces[0];
        let b_ws = manager.pending.workspaces[0];
        assert_ne!(tree.workspace(a_ws).name, tree.workspace(b_ws).name);
    }

    #[test]
    fn hot_unplug_evacuates_to_the_sibling() {
        let (mut tree, a, ws_a) = tree_with_output();
        let b = add_enabled_output(&mut tree, "DP-2", 1920);

        // Put a window on A's workspace so it is worth evacuating.
        let con = container::create_split(&mut tree, container::Layout::None);
        workspace::add_tiling(&mut tree, ws_a, con);

        begin_destroy(&mut tree, a);

        assert!(tree.get(a).destroying);
        assert!(!tree.root_node().outputs.contains(&a));
        assert_eq!(tree.workspace(ws_a).output, Some(b));
        assert!(tree
            .output(b)
            .workspace_manager
            .pending
            .workspaces
            .contains(&ws_a));
        assert_eq!(tree.container(con).pending.workspace, Some(ws_a));
    }

    #[test]
    fn last_output_evacuates_to_the_fallback() {
        let (mut tree, a, ws_a) = tree_with_output();
        let con = container::create_split(&mut tree, container::Layout::None);
        workspace::add_tiling(&mut tree, ws_a, con);

        begin_destroy(&mut tree, a);

        let fallback = tree.root_node().fallback_output.unwrap();
        assert_eq!(tree.workspace(ws_a).output, Some(fallback));
    }

    #[test]
    fn workspace_switch_carries_sticky_floaters() {
        let (mut tree, output, ws1) = tree_with_output();
        let config = Config::default();
        let ws2 = workspace::create(&mut tree, output, String::from("9"), &config);

        let floater = container::create_split(&mut tree, container::Layout::None);
        workspace::add_floating(&mut tree, ws1, floater);
        tree.container_mut(floater).sticky = true;

        let normal = container::create_split(&mut tree, container::Layout::None);
        workspace::add_floating(&mut tree, ws1, normal);

        switch_to_workspace(&mut tree, output, ws2);

        assert_eq!(tree.container(floater).pending.workspace, Some(ws2));
        assert_eq!(tree.container(normal).pending.workspace, Some(ws1));
        assert_eq!(
            tree.output(output).workspace_manager.pending.active,
            Some(ws2)
        );
    }
}
