//! Containers: the rectangles of the layout tree.
//!
//! A container is either a leaf wrapping a [`View`] or an internal node with
//! a child list and a layout. Every container carries two complete state
//! snapshots: `pending` (mutated by user/client operations) and `current`
//! (only written by the transaction apply phase). All mutators here touch
//! pending state and mark the node dirty.

use smithay::utils::{Logical, Point, Rectangle, Size};

use super::{workspace, NodeId, NodePayload, Tree};
use crate::scene::{Color, SceneDescriptor, SceneId};
use crate::view::View;

/// Layout of an internal container or a workspace's tiling list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Layout {
    #[default]
    None,
    Horizontal,
    Vertical,
    Stacked,
    Tabbed,
}

/// Server-side border policy of a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Border {
    /// No border at all.
    None,
    /// A plain border of `border_thickness` pixels.
    Pixel,
    /// Title bar plus border.
    Normal,
    /// The client draws its own decorations; the server draws nothing.
    Csd,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FullscreenMode {
    #[default]
    None,
    /// Claims the workspace's output.
    Workspace,
    /// Claims the entire compositor screen-space.
    Global,
}

/// One complete container state snapshot.
#[derive(Clone, Debug)]
pub struct ContainerState {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Content box: the rectangle handed to the client, inside borders and
    /// title bar. Computed by the arrange pass.
    pub content_x: i32,
    pub content_y: i32,
    pub content_width: i32,
    pub content_height: i32,
    /// Parent container, if nested inside a split.
    pub parent: Option<NodeId>,
    /// Owning workspace. `None` only while detached by a move operation or
    /// hidden in the scratchpad.
    pub workspace: Option<NodeId>,
    pub layout: Layout,
    pub children: Vec<NodeId>,
    pub border: Border,
    pub border_thickness: i32,
    pub fullscreen_mode: FullscreenMode,
    pub focused: bool,
    pub focused_inactive_child: Option<NodeId>,
    pub title: String,
}

impl ContainerState {
    fn new(border: Border, border_thickness: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            content_x: 0,
            content_y: 0,
            content_width: 0,
            content_height: 0,
            parent: None,
            workspace: None,
            layout: Layout::None,
            children: Vec::new(),
            border,
            border_thickness,
            fullscreen_mode: FullscreenMode::None,
            focused: false,
            focused_inactive_child: None,
            title: String::new(),
        }
    }

    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        Rectangle::new((self.x, self.y).into(), (self.width, self.height).into())
    }

    pub fn set_geometry(&mut self, rect: Rectangle<i32, Logical>) {
        self.x = rect.loc.x;
        self.y = rect.loc.y;
        self.width = rect.size.w;
        self.height = rect.size.h;
    }

    pub fn content_box(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(
            (self.content_x, self.content_y).into(),
            (self.content_width, self.content_height).into(),
        )
    }
}

/// Scene rects drawing the server-side border of one container.
#[derive(Debug)]
pub struct BorderRects {
    pub top: SceneId,
    pub bottom: SceneId,
    pub left: SceneId,
    pub right: SceneId,
}

#[derive(Debug)]
pub struct Container {
    /// `Some` for leaves, `None` for split containers.
    pub view: Option<View>,
    pub pending: ContainerState,
    pub current: ContainerState,
    /// Floater that stays on screen across workspace switches of its output.
    pub sticky: bool,
    /// Share of the parent's content rectangle along the layout axis.
    pub fraction: f64,
    /// Geometry to restore when leaving fullscreen.
    pub saved_geometry: Option<Rectangle<i32, Logical>>,
    /// Root of this container's scene presence; children below.
    pub scene_tree: SceneId,
    /// Where the view surface or child containers get parented.
    pub content_tree: SceneId,
    pub title_bar_tree: SceneId,
    /// Background fill of the title bar; text rendering is left to helpers
    /// outside the core.
    pub title_bar_rect: SceneId,
    pub border: BorderRects,
}

pub const BORDER_COLOR_INACTIVE: Color = [0.35, 0.35, 0.35, 1.0];
pub const BORDER_COLOR_FOCUSED: Color = [0.26, 0.41, 0.67, 1.0];
pub const BORDER_COLOR_URGENT: Color = [0.69, 0.18, 0.18, 1.0];

fn alloc_container(tree: &mut Tree, view: Option<View>, layout: Layout) -> NodeId {
    let staging = tree.root_node().staging;
    let scene_tree = tree.scene.create_tree(staging);
    let title_bar_tree = tree.scene.create_tree(scene_tree);
    let title_bar_rect =
        tree.scene
            .create_rect(title_bar_tree, Size::default(), BORDER_COLOR_INACTIVE);
    let border = BorderRects {
        top: tree.scene.create_rect(scene_tree, Size::default(), BORDER_COLOR_INACTIVE),
        bottom: tree.scene.create_rect(scene_tree, Size::default(), BORDER_COLOR_INACTIVE),
        left: tree.scene.create_rect(scene_tree, Size::default(), BORDER_COLOR_INACTIVE),
        right: tree.scene.create_rect(scene_tree, Size::default(), BORDER_COLOR_INACTIVE),
    };
    let content_tree = tree.scene.create_tree(scene_tree);

    let mut state = ContainerState::new(Border::Normal, 2);
    state.layout = layout;

    let container = Container {
        view,
        pending: state.clone(),
        current: state,
        sticky: false,
        fraction: 1.0,
        saved_geometry: None,
        scene_tree,
        content_tree,
        title_bar_tree,
        title_bar_rect,
        border,
    };

    let id = tree.alloc(NodePayload::Container(container));
    tree.scene
        .set_descriptor(scene_tree, SceneDescriptor::Container(id));

    // Reparent the view's surface tree under our content tree, and tag it so
    // input hits resolve to this container.
    let view_nodes = tree
        .container(id)
        .view
        .as_ref()
        .map(|view| (view.scene_tree, view.surface_node));
    if let Some((view_tree, surface_node)) = view_nodes {
        tree.scene.reparent(view_tree, content_tree);
        tree.scene.set_descriptor(view_tree, SceneDescriptor::View(id));
        tree.scene.set_descriptor(surface_node, SceneDescriptor::View(id));
    }

    tree.set_dirty(id);
    id
}

/// Create a leaf container for a freshly mapped view.
pub fn create_for_view(tree: &mut Tree, view: View) -> NodeId {
    let id = alloc_container(tree, Some(view), Layout::None);
    update_title(tree, id);
    id
}

/// Create an internal split container.
pub fn create_split(tree: &mut Tree, layout: Layout) -> NodeId {
    alloc_container(tree, None, layout)
}

/// Refresh the pending title from the view properties.
pub fn update_title(tree: &mut Tree, id: NodeId) {
    let container = tree.container(id);
    let Some(view) = &container.view else { return };
    let title = view.title().unwrap_or_default();
    if tree.container(id).pending.title != title {
        tree.container_mut(id).pending.title = title;
        tree.set_dirty(id);
    }
}

/// Whether the container sits in its workspace's floating list.
pub fn is_floating(tree: &Tree, id: NodeId) -> bool {
    let container = tree.container(id);
    if container.pending.parent.is_some() {
        return false;
    }
    container
        .pending
        .workspace
        .is_some_and(|ws| tree.workspace(ws).pending.floating.contains(&id))
}

/// Whether this container or an ancestor is fullscreen.
pub fn is_fullscreen_or_child(tree: &Tree, id: NodeId) -> bool {
    let mut cursor = Some(id);
    while let Some(con) = cursor {
        let container = tree.container(con);
        if container.pending.fullscreen_mode != FullscreenMode::None {
            return true;
        }
        cursor = container.pending.parent;
    }
    false
}

/// Detach a container from its parent split or workspace lists. The
/// container keeps existing (`pending.workspace` cleared) until re-attached
/// or destroyed.
pub fn detach(tree: &mut Tree, id: NodeId) {
    let (parent, workspace) = {
        let state = &tree.container(id).pending;
        (state.parent, state.workspace)
    };

    if let Some(parent) = parent {
        let pstate = &mut tree.container_mut(parent).pending;
        pstate.children.retain(|&c| c != id);
        if pstate.focused_inactive_child == Some(id) {
            pstate.focused_inactive_child = pstate.children.first().copied();
        }
        tree.set_dirty(parent);
    } else if let Some(ws) = workspace {
        workspace::remove_child(tree, ws, id);
    }

    let state = &mut tree.container_mut(id).pending;
    state.parent = None;
    state.workspace = None;
    tree.set_dirty(id);

    // Detached containers must not render.
    let staging = tree.root_node().staging;
    let scene_tree = tree.container(id).scene_tree;
    tree.scene.reparent(scene_tree, staging);
}

/// Append a child to a split container.
pub fn add_child(tree: &mut Tree, parent: NodeId, child: NodeId) {
    debug_assert!(tree.container(parent).view.is_none(), "leaf cannot adopt");
    debug_assert!(!tree.get(child).destroying, "cannot adopt a destroying node");
    let workspace = tree.container(parent).pending.workspace;
    let pstate = &mut tree.container_mut(parent).pending;
    pstate.children.push(child);
    if pstate.focused_inactive_child.is_none() {
        pstate.focused_inactive_child = Some(child);
    }
    let cstate = &mut tree.container_mut(child).pending;
    cstate.parent = Some(parent);
    cstate.workspace = workspace;
    set_workspace_recursive(tree, child, workspace);
    tree.set_dirty(parent);
    tree.set_dirty(child);
}

fn set_workspace_recursive(tree: &mut Tree, id: NodeId, workspace: Option<NodeId>) {
    tree.container_mut(id).pending.workspace = workspace;
    let children = tree.container(id).pending.children.clone();
    for child in children {
        set_workspace_recursive(tree, child, workspace);
    }
}

/// Move a floating container so its top-left lands on `(x, y)` in layout
/// coordinates. Crossing an output boundary moves the container to the
/// workspace under its new center.
pub fn floating_move_to(tree: &mut Tree, id: NodeId, x: i32, y: i32) {
    let state = &mut tree.container_mut(id).pending;
    state.x = x;
    state.y = y;
    tree.set_dirty(id);

    let center: Point<f64, Logical> = {
        let state = &tree.container(id).pending;
        (
            f64::from(state.x) + f64::from(state.width) / 2.0,
            f64::from(state.y) + f64::from(state.height) / 2.0,
        )
            .into()
    };

    let Some(old_ws) = tree.container(id).pending.workspace else {
        return;
    };
    let Some(target_output) = super::root::output_at(tree, center) else {
        return;
    };
    if tree.workspace(old_ws).output == Some(target_output) {
        return;
    }
    let Some(new_ws) = tree.output(target_output).workspace_manager.pending.active else {
        return;
    };
    workspace::remove_child(tree, old_ws, id);
    workspace::add_floating(tree, new_ws, id);
}

/// Re-map a floater's position from one output box to another, preserving
/// the relative position (used when a floater's workspace moves between
/// outputs).
pub fn floating_fix_coordinates(
    tree: &mut Tree,
    id: NodeId,
    old_box: Rectangle<i32, Logical>,
    new_box: Rectangle<i32, Logical>,
) {
    if old_box.size.w == 0 || old_box.size.h == 0 {
        // No reference frame; center instead.
        let size = {
            let state = &tree.container(id).pending;
            Size::from((state.width, state.height))
        };
        let state = &mut tree.container_mut(id).pending;
        state.x = new_box.loc.x + (new_box.size.w - size.w) / 2;
        state.y = new_box.loc.y + (new_box.size.h - size.h) / 2;
    } else {
        let state = &mut tree.container_mut(id).pending;
        let rel_x = f64::from(state.x - old_box.loc.x) / f64::from(old_box.size.w);
        let rel_y = f64::from(state.y - old_box.loc.y) / f64::from(old_box.size.h);
        state.x = new_box.loc.x + (rel_x * f64::from(new_box.size.w)) as i32;
        state.y = new_box.loc.y + (rel_y * f64::from(new_box.size.h)) as i32;
    }
    tree.set_dirty(id);
}

/// Toggle between floating and tiled.
///
/// Returning to tiling deliberately forgets any pre-floating geometry: the
/// container re-enters the parent layout and takes whatever allocation the
/// layout computes.
pub fn set_floating(tree: &mut Tree, id: NodeId, floating: bool) {
    if is_floating(tree, id) == floating {
        return;
    }
    let Some(ws) = tree.container(id).pending.workspace else {
        return;
    };

    detach(tree, id);
    if floating {
        let output_box = tree
            .workspace(ws)
            .output
            .map(|o| tree.output(o).geometry())
            .unwrap_or_default();
        let natural = tree
            .container(id)
            .view
            .as_ref()
            .map(|view| view.natural_size)
            .unwrap_or_default();
        {
            let state = &mut tree.container_mut(id).pending;
            if state.width == 0 || state.height == 0 {
                state.width = if natural.w > 0 { natural.w } else { output_box.size.w / 2 };
                state.height = if natural.h > 0 { natural.h } else { output_box.size.h / 2 };
            }
            state.x = output_box.loc.x + (output_box.size.w - state.width) / 2;
            state.y = output_box.loc.y + (output_box.size.h - state.height) / 2;
        }
        workspace::add_floating(tree, ws, id);
    } else {
        tree.container_mut(id).fraction = 1.0;
        workspace::add_tiling(tree, ws, id);
    }
    if let Some(view) = &tree.container(id).view {
        view.set_tiled(!floating);
    }
    tree.set_dirty(id);
}

/// Raise a floater above its floating siblings.
pub fn raise_floating(tree: &mut Tree, id: NodeId) {
    let Some(ws) = tree.container(id).pending.workspace else {
        return;
    };
    if !is_floating(tree, id) {
        return;
    }
    let floating = &mut tree.workspace_mut(ws).pending.floating;
    floating.retain(|&c| c != id);
    floating.push(id);
    tree.set_dirty(ws);
}

/// Enter or leave fullscreen. Enforces mutual exclusion: enabling disables
/// any other fullscreen on the same scope, ancestors are never fullscreen
/// themselves, and at most one global fullscreen exists.
pub fn set_fullscreen(tree: &mut Tree, id: NodeId, mode: FullscreenMode) {
    let previous = tree.container(id).pending.fullscreen_mode;
    if previous == mode {
        return;
    }

    if previous != FullscreenMode::None {
        fullscreen_disable(tree, id);
    }
    match mode {
        FullscreenMode::None => {}
        FullscreenMode::Workspace => {
            if let Some(ws) = tree.container(id).pending.workspace {
                if let Some(existing) = tree.workspace(ws).pending.fullscreen {
                    if existing != id {
                        fullscreen_disable(tree, existing);
                    }
                }
                tree.workspace_mut(ws).pending.fullscreen = Some(id);
                tree.set_dirty(ws);
            }
            fullscreen_enable_common(tree, id, FullscreenMode::Workspace);
        }
        FullscreenMode::Global => {
            if let Some(existing) = tree.root_node().fullscreen_global {
                if existing != id {
                    fullscreen_disable(tree, existing);
                }
            }
            tree.root_node_mut().fullscreen_global = Some(id);
            let root = tree.root();
            tree.set_dirty(root);
            fullscreen_enable_common(tree, id, FullscreenMode::Global);
        }
    }
}

fn fullscreen_enable_common(tree: &mut Tree, id: NodeId, mode: FullscreenMode) {
    debug_assert!(
        tree.container(id)
            .pending
            .parent
            .is_none_or(|p| !is_fullscreen_or_child(tree, p)),
        "fullscreen ancestors are mutually exclusive"
    );
    let geometry = tree.container(id).pending.geometry();
    let container = tree.container_mut(id);
    container.saved_geometry = Some(geometry);
    container.pending.fullscreen_mode = mode;
    if let Some(view) = &container.view {
        view.set_fullscreen(true);
    }
    tree.set_dirty(id);
}

fn fullscreen_disable(tree: &mut Tree, id: NodeId) {
    let mode = tree.container(id).pending.fullscreen_mode;
    match mode {
        FullscreenMode::None => return,
        FullscreenMode::Workspace => {
            if let Some(ws) = tree.container(id).pending.workspace {
                if tree.workspace(ws).pending.fullscreen == Some(id) {
                    tree.workspace_mut(ws).pending.fullscreen = None;
                    tree.set_dirty(ws);
                }
            }
        }
        FullscreenMode::Global => {
            if tree.root_node().fullscreen_global == Some(id) {
                tree.root_node_mut().fullscreen_global = None;
                let root = tree.root();
                tree.set_dirty(root);
            }
        }
    }

    let saved = tree.container_mut(id).saved_geometry.take();
    let container = tree.container_mut(id);
    container.pending.fullscreen_mode = FullscreenMode::None;
    if let Some(saved) = saved {
        // Tiled geometry gets recomputed by arrange anyway; floaters need the
        // stored rectangle back bit-exact.
        container.pending.set_geometry(saved);
    }
    if let Some(view) = &container.view {
        view.set_fullscreen(false);
    }
    tree.set_dirty(id);
}

/// Begin destroying a container: detach it and flag it. The node is freed by
/// the transaction engine once no instruction references it.
pub fn begin_destroy(tree: &mut Tree, id: NodeId) {
    if tree.container(id).pending.fullscreen_mode != FullscreenMode::None {
        fullscreen_disable(tree, id);
    }
    let root = tree.root();
    if tree.root_node().scratchpad.contains(&id) {
        tree.root_node_mut().scratchpad.retain(|&c| c != id);
        tree.set_dirty(root);
    }
    detach(tree, id);
    tree.begin_destroy(id);
    tree.set_dirty(id);
}

/// Descend to the most recently focused leaf inside `id`.
pub fn leaf_toward_focus(tree: &Tree, id: NodeId) -> NodeId {
    let mut cursor = id;
    loop {
        let container = tree.container(cursor);
        if container.view.is_some() {
            return cursor;
        }
        match container
            .pending
            .focused_inactive_child
            .or_else(|| container.pending.children.first().copied())
        {
            Some(next) => cursor = next,
            None => return cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::tree_with_output;

    fn leaf(tree: &mut Tree) -> NodeId {
        // A viewless leaf is good enough for geometry logic.
        alloc_container(tree, None, Layout::None)
    }

    #[test]
    fn tiling_and_floating_lists_stay_disjoint() {
        let (mut tree, _output, ws) = tree_with_output();
        let con = leaf(&mut tree);
        workspace::add_tiling(&mut tree, ws, con);
        assert!(tree.workspace(ws).pending.tiling.contains(&con));
        assert!(!tree.workspace(ws).pending.floating.contains(&con));

        set_floating(&mut tree, con, true);
        assert!(!tree.workspace(ws).pending.tiling.contains(&con));
        assert!(tree.workspace(ws).pending.floating.contains(&con));
        assert!(is_floating(&tree, con));

        set_floating(&mut tree, con, false);
        assert!(tree.workspace(ws).pending.tiling.contains(&con));
        assert!(!tree.workspace(ws).pending.floating.contains(&con));
    }

    #[test]
    fn refloating_centers_on_the_output() {
        let (mut tree, _output, ws) = tree_with_output();
        let con = leaf(&mut tree);
        workspace::add_tiling(&mut tree, ws, con);
        tree.container_mut(con).pending.width = 400;
        tree.container_mut(con).pending.height = 300;

        set_floating(&mut tree, con, true);
        let state = &tree.container(con).pending;
        assert_eq!((state.x, state.y), ((1920 - 400) / 2, (1080 - 300) / 2));
    }

    #[test]
    fn fullscreen_disable_restores_geometry_bit_exact() {
        let (mut tree, _output, ws) = tree_with_output();
        let con = leaf(&mut tree);
        workspace::add_floating(&mut tree, ws, con);
        tree.container_mut(con)
            .pending
            .set_geometry(Rectangle::new((123, 45).into(), (678, 910).into()));

        set_fullscreen(&mut tree, con, FullscreenMode::Workspace);
        assert_eq!(tree.workspace(ws).pending.fullscreen, Some(con));

        set_fullscreen(&mut tree, con, FullscreenMode::None);
        assert_eq!(tree.workspace(ws).pending.fullscreen, None);
        let state = &tree.container(con).pending;
        assert_eq!(
            state.geometry(),
            Rectangle::new((123, 45).into(), (678, 910).into())
        );
    }

    #[test]
    fn only_one_global_fullscreen_exists() {
        let (mut tree, _output, ws) = tree_with_output();
        let first = leaf(&mut tree);
        let second = leaf(&mut tree);
        workspace::add_tiling(&mut tree, ws, first);
        workspace::add_tiling(&mut tree, ws, second);

        set_fullscreen(&mut tree, first, FullscreenMode::Global);
        assert_eq!(tree.root_node().fullscreen_global, Some(first));

        set_fullscreen(&mut tree, second, FullscreenMode::Global);
        assert_eq!(tree.root_node().fullscreen_global, Some(second));
        assert_eq!(
            tree.container(first).pending.fullscreen_mode,
            FullscreenMode::None
        );
    }

    #[test]
    fn workspace_fullscreen_displaces_the_previous_one() {
        let (mut tree, _output, ws) = tree_with_output();
        let first = leaf(&mut tree);
        let second = leaf(&mut tree);
        workspace::add_tiling(&mut tree, ws, first);
        workspace::add_tiling(&mut tree, ws, second);

        set_fullscreen(&mut tree, first, FullscreenMode::Workspace);
        set_fullscreen(&mut tree, second, FullscreenMode::Workspace);
        assert_eq!(tree.workspace(ws).pending.fullscreen, Some(second));
        assert_eq!(
            tree.container(first).pending.fullscreen_mode,
            FullscreenMode::None
        );
    }

    #[test]
    fn detach_clears_links_and_stages_the_scene_node() {
        let (mut tree, _output, ws) = tree_with_output();
        let con = leaf(&mut tree);
        workspace::add_tiling(&mut tree, ws, con);

        detach(&mut tree, con);
        let state = &tree.container(con).pending;
        assert_eq!(state.workspace, None);
        assert_eq!(state.parent, None);
        assert!(!tree.workspace(ws).pending.tiling.contains(&con));

        let staging = tree.root_node().staging;
        let scene_tree = tree.container(con).scene_tree;
        assert_eq!(tree.scene.get(scene_tree).parent(), Some(staging));
    }

    #[test]
    fn split_children_follow_the_workspace_link() {
        let (mut tree, _output, ws) = tree_with_output();
        let split = create_split(&mut tree, Layout::Horizontal);
        let a = leaf(&mut tree);
        let b = leaf(&mut tree);
        workspace::add_tiling(&mut tree, ws, split);
        add_child(&mut tree, split, a);
        add_child(&mut tree, split, b);

        assert_eq!(tree.container(a).pending.workspace, Some(ws));
        assert_eq!(tree.container(a).pending.parent, Some(split));
        assert_eq!(tree.container(split).pending.children, vec![a, b]);
        assert_eq!(tree.container(split).pending.focused_inactive_child, Some(a));
    }
}
