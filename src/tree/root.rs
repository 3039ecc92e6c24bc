//! The root node: global scene layers, outputs, scratchpad.

use smithay::output::{Output, PhysicalProperties, Subpixel};
use smithay::utils::{Logical, Point, Rectangle, Size};

use super::{container, output, workspace, NodeId, Tree};
use crate::scene::{SceneGraph, SceneId};

/// Global scene trees, bottom to top. Per-output trees get slotted into the
/// matching global layer (offset by the output position) each arrange pass.
#[derive(Debug)]
pub struct RootLayers {
    pub shell_background: SceneId,
    pub shell_bottom: SceneId,
    pub tiling: SceneId,
    pub floating: SceneId,
    pub shell_top: SceneId,
    pub fullscreen: SceneId,
    pub fullscreen_global: SceneId,
    /// XWayland override-redirect windows.
    #[cfg(feature = "xwayland")]
    pub unmanaged: SceneId,
    pub shell_overlay: SceneId,
    pub popup: SceneId,
    /// Drag icons of all seats.
    pub seat: SceneId,
    pub session_lock: SceneId,
}

impl RootLayers {
    fn new(scene: &mut SceneGraph) -> Self {
        let root = scene.root();
        Self {
            shell_background: scene.create_tree(root),
            shell_bottom: scene.create_tree(root),
            tiling: scene.create_tree(root),
            floating: scene.create_tree(root),
            shell_top: scene.create_tree(root),
            fullscreen: scene.create_tree(root),
            fullscreen_global: scene.create_tree(root),
            #[cfg(feature = "xwayland")]
            unmanaged: scene.create_tree(root),
            shell_overlay: scene.create_tree(root),
            popup: scene.create_tree(root),
            seat: scene.create_tree(root),
            session_lock: scene.create_tree(root),
        }
    }
}

#[derive(Debug)]
pub struct Root {
    pub layers: RootLayers,
    /// Scene nodes that exist but must not render live here.
    pub staging: SceneId,
    /// Enabled outputs, in layout order.
    pub outputs: Vec<NodeId>,
    /// Every live output node, enabled or not. Excludes the fallback.
    pub all_outputs: Vec<NodeId>,
    /// Headless home for workspaces when no real output is enabled.
    pub fallback_output: Option<NodeId>,
    /// Hidden containers, toggleable by user action.
    pub scratchpad: Vec<NodeId>,
    /// The single container allowed to be fullscreen over everything.
    pub fullscreen_global: Option<NodeId>,
    /// Extents of the output layout.
    pub geometry: Rectangle<i32, Logical>,
}

impl Root {
    pub fn new(scene: &mut SceneGraph) -> Self {
        let staging = scene.create_tree(scene.root());
        scene.set_enabled(staging, false);
        Self {
            layers: RootLayers::new(scene),
            staging,
            outputs: Vec::new(),
            all_outputs: Vec::new(),
            fallback_output: None,
            scratchpad: Vec::new(),
            fullscreen_global: None,
            geometry: Rectangle::default(),
        }
    }
}

/// Create the fallback output node. Called once at tree construction; the
/// fallback is never enabled, never committed, and not part of
/// `all_outputs`.
pub(super) fn create_fallback_output(tree: &mut Tree) {
    let output = Output::new(
        String::from("FALLBACK"),
        PhysicalProperties {
            size: Size::from((0, 0)),
            subpixel: Subpixel::Unknown,
            make: String::from("strata"),
            model: String::from("fallback"),
        },
    );
    let id = output::create(tree, output);
    tree.root_node_mut().all_outputs.retain(|&o| o != id);
    tree.root_node_mut().fallback_output = Some(id);
}

/// Enabled output under `point` in layout coordinates.
pub fn output_at(tree: &Tree, point: Point<f64, Logical>) -> Option<NodeId> {
    tree.root_node()
        .outputs
        .iter()
        .copied()
        .find(|&o| tree.output(o).geometry().to_f64().contains(point))
}

/// Recompute the root box as the extents of all enabled outputs.
pub fn update_geometry(tree: &mut Tree) {
    let mut extents: Option<Rectangle<i32, Logical>> = None;
    for &o in &tree.root_node().outputs {
        let geo = tree.output(o).geometry();
        extents = Some(match extents {
            Some(acc) => acc.merge(geo),
            None => geo,
        });
    }
    let geometry = extents.unwrap_or_default();
    if tree.root_node().geometry != geometry {
        tree.root_node_mut().geometry = geometry;
        let root = tree.root();
        tree.set_dirty(root);
    }
}

/// Hide a container into the scratchpad. First call adopts the container;
/// it stays a scratchpad member until shown and explicitly un-scratched.
pub fn scratchpad_hide(tree: &mut Tree, con: NodeId) {
    container::detach(tree, con);
    let root_node = tree.root_node_mut();
    if !root_node.scratchpad.contains(&con) {
        root_node.scratchpad.push(con);
    }
    let root = tree.root();
    tree.set_dirty(root);
    tree.set_dirty(con);
}

/// Show a scratchpad container on `ws` as a centered floater.
pub fn scratchpad_show(tree: &mut Tree, con: NodeId, ws: NodeId) {
    debug_assert!(tree.root_node().scratchpad.contains(&con));
    workspace::add_floating(tree, ws, con);

    let output_box = tree
        .workspace(ws)
        .output
        .map(|o| tree.output(o).geometry())
        .unwrap_or_default();
    let state = &mut tree.container_mut(con).pending;
    if state.width == 0 || state.height == 0 {
        state.width = output_box.size.w / 2;
        state.height = output_box.size.h / 2;
    }
    state.x = output_box.loc.x + (output_box.size.w - state.width) / 2;
    state.y = output_box.loc.y + (output_box.size.h - state.height) / 2;
    tree.set_dirty(con);
}

/// Toggle: hide if visible somewhere, show on the given workspace
/// otherwise.
pub fn scratchpad_toggle(tree: &mut Tree, con: NodeId, ws: NodeId) {
    if tree.container(con).pending.workspace.is_some() {
        scratchpad_hide(tree, con);
    } else {
        scratchpad_show(tree, con, ws);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::tree_with_output;

    #[test]
    fn scratchpad_round_trip() {
        let (mut tree, _output, ws) = tree_with_output();
        let con = container::create_split(&mut tree, container::Layout::None);
        workspace::add_floating(&mut tree, ws, con);
        tree.container_mut(con).pending.width = 600;
        tree.container_mut(con).pending.height = 400;

        scratchpad_hide(&mut tree, con);
        assert!(tree.root_node().scratchpad.contains(&con));
        assert_eq!(tree.container(con).pending.workspace, None);
        let staging = tree.root_node().staging;
        assert_eq!(
            tree.scene.get(tree.container(con).scene_tree).parent(),
            Some(staging)
        );

        scratchpad_show(&mut tree, con, ws);
        assert!(tree.root_node().scratchpad.contains(&con));
        assert_eq!(tree.container(con).pending.workspace, Some(ws));
        assert!(tree.workspace(ws).pending.floating.contains(&con));
        let state = &tree.container(con).pending;
        assert_eq!((state.x, state.y), ((1920 - 600) / 2, (1080 - 400) / 2));
    }

    #[test]
    fn output_at_respects_layout_positions() {
        let (tree, output, _ws) = tree_with_output();
        assert_eq!(output_at(&tree, (10.0, 10.0).into()), Some(output));
        assert_eq!(output_at(&tree, (5000.0, 10.0).into()), None);
    }
}
