//! Retained scene graph.
//!
//! The compositor keeps every visible (and hideable) piece of content in one
//! strictly Z-ordered tree of [`SceneNode`]s. Trees group and position their
//! children, surface leaves reference client [`WlSurface`]s, and rect leaves
//! are solid fills (borders, backdrops). The window-management code edits this
//! graph (reparent, enable, position) and the render path walks the enabled
//! subset into render elements each frame.
//!
//! Nodes live in an arena and are addressed by [`SceneId`]. A node that must
//! exist but not render (detached containers, scratchpad-hidden windows,
//! orphans of a destroyed output) is reparented under a staging tree that is
//! never walked for rendering or input.

use smithay::backend::renderer::element::solid::SolidColorBuffer;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point, Rectangle, Size};

/// Handle to a [`SceneNode`] inside a [`SceneGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SceneId(usize);

/// Solid color, RGBA, premultiplied.
pub type Color = [f32; 4];

/// What a [`SceneNode`] displays.
#[derive(Debug)]
pub enum SceneContent {
    /// Groups children; displays nothing itself.
    Tree,
    /// A mapped client surface (with its subsurface tree).
    Surface {
        surface: WlSurface,
        /// Committed surface size, kept up to date by the view code.
        size: Size<i32, Logical>,
        /// Visible region in node-local coordinates, if the surface must be
        /// clipped (a client that did not resize to its container yet).
        clip: Option<Rectangle<i32, Logical>>,
    },
    /// A solid rectangle.
    Rect {
        size: Size<i32, Logical>,
        color: Color,
        /// Retained buffer the renderer draws; kept in sync with size and
        /// color so damage tracking sees the changes.
        buffer: SolidColorBuffer,
    },
}

/// What domain object a scene node stands for. Used to resolve input hits
/// back into the window-management tree.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneDescriptor {
    /// A container of the layout tree (borders/titlebar included).
    Container(crate::tree::NodeId),
    /// The content surface of a view held by this container.
    View(crate::tree::NodeId),
    /// A layer-shell surface.
    LayerSurface(WlSurface),
    /// A lock surface of the active session lock.
    LockSurface(WlSurface),
    /// An xdg-popup, anchored to another scene node.
    Popup {
        surface: WlSurface,
        relative_to: SceneId,
    },
    /// An XWayland override-redirect window; input forwards to it but it
    /// never takes part in layout or focus bookkeeping.
    Unmanaged(WlSurface),
    /// A drag icon surface; never an input target.
    DragIcon(WlSurface),
}

#[derive(Debug)]
pub struct SceneNode {
    parent: Option<SceneId>,
    /// Children in paint order, bottom first.
    children: Vec<SceneId>,
    position: Point<i32, Logical>,
    enabled: bool,
    content: SceneContent,
    descriptor: Option<SceneDescriptor>,
}

impl SceneNode {
    pub fn position(&self) -> Point<i32, Logical> {
        self.position
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn parent(&self) -> Option<SceneId> {
        self.parent
    }

    pub fn children(&self) -> &[SceneId] {
        &self.children
    }

    pub fn content(&self) -> &SceneContent {
        &self.content
    }

    pub fn descriptor(&self) -> Option<&SceneDescriptor> {
        self.descriptor.as_ref()
    }
}

/// A hit found by [`SceneGraph::node_at`].
#[derive(Debug)]
pub struct SceneHit {
    pub node: SceneId,
    /// Hit position relative to the node origin.
    pub local: Point<f64, Logical>,
}

#[derive(Debug)]
pub struct SceneGraph {
    nodes: Vec<Option<SceneNode>>,
    free: Vec<usize>,
    root: SceneId,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let root = SceneNode {
            parent: None,
            children: Vec::new(),
            position: Point::default(),
            enabled: true,
            content: SceneContent::Tree,
            descriptor: None,
        };
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: SceneId(0),
        }
    }

    pub fn root(&self) -> SceneId {
        self.root
    }

    fn insert(&mut self, node: SceneNode) -> SceneId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            SceneId(slot)
        } else {
            self.nodes.push(Some(node));
            SceneId(self.nodes.len() - 1)
        }
    }

    pub fn get(&self, id: SceneId) -> &SceneNode {
        self.nodes[id.0].as_ref().expect("stale scene id")
    }

    fn get_mut(&mut self, id: SceneId) -> &mut SceneNode {
        self.nodes[id.0].as_mut().expect("stale scene id")
    }

    pub fn create_tree(&mut self, parent: SceneId) -> SceneId {
        self.create(parent, SceneContent::Tree)
    }

    pub fn create_surface(&mut self, parent: SceneId, surface: WlSurface) -> SceneId {
        self.create(
            parent,
            SceneContent::Surface {
                surface,
                size: Size::default(),
                clip: None,
            },
        )
    }

    pub fn create_rect(
        &mut self,
        parent: SceneId,
        size: Size<i32, Logical>,
        color: Color,
    ) -> SceneId {
        let buffer = SolidColorBuffer::new(size, color);
        self.create(parent, SceneContent::Rect { size, color, buffer })
    }

    fn create(&mut self, parent: SceneId, content: SceneContent) -> SceneId {
        let id = self.insert(SceneNode {
            parent: Some(parent),
            children: Vec::new(),
            position: Point::default(),
            enabled: true,
            content,
            descriptor: None,
        });
        self.get_mut(parent).children.push(id);
        id
    }

    /// Destroy a node and its whole subtree.
    pub fn destroy(&mut self, id: SceneId) {
        assert!(id != self.root, "cannot destroy the scene root");
        if let Some(parent) = self.get(id).parent {
            self.get_mut(parent).children.retain(|&c| c != id);
        }
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.nodes[id.0].take().expect("stale scene id");
            stack.extend(node.children);
            self.free.push(id.0);
        }
    }

    /// Move `id` under `new_parent`, on top of its existing children.
    ///
    /// Reparenting onto the current parent raises the node to the top of its
    /// siblings, matching the arrange code which re-asserts parenthood every
    /// pass.
    pub fn reparent(&mut self, id: SceneId, new_parent: SceneId) {
        assert!(id != self.root, "cannot reparent the scene root");
        debug_assert!(!self.is_ancestor(id, new_parent), "scene reparent cycle");
        let old_parent = self.get(id).parent.expect("non-root node has a parent");
        self.get_mut(old_parent).children.retain(|&c| c != id);
        self.get_mut(new_parent).children.push(id);
        self.get_mut(id).parent = Some(new_parent);
    }

    fn is_ancestor(&self, candidate: SceneId, of: SceneId) -> bool {
        let mut cursor = Some(of);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.get(id).parent;
        }
        false
    }

    pub fn set_enabled(&mut self, id: SceneId, enabled: bool) {
        self.get_mut(id).enabled = enabled;
    }

    pub fn set_position(&mut self, id: SceneId, position: Point<i32, Logical>) {
        self.get_mut(id).position = position;
    }

    pub fn raise_to_top(&mut self, id: SceneId) {
        let parent = self.get(id).parent.expect("non-root node has a parent");
        let children = &mut self.get_mut(parent).children;
        children.retain(|&c| c != id);
        children.push(id);
    }

    pub fn lower_to_bottom(&mut self, id: SceneId) {
        let parent = self.get(id).parent.expect("non-root node has a parent");
        let children = &mut self.get_mut(parent).children;
        children.retain(|&c| c != id);
        children.insert(0, id);
    }

    pub fn set_rect_size(&mut self, id: SceneId, size: Size<i32, Logical>) {
        match &mut self.get_mut(id).content {
            SceneContent::Rect {
                size: s,
                color,
                buffer,
            } => {
                if *s != size {
                    *s = size;
                    buffer.update(size, *color);
                }
            }
            _ => unreachable!("set_rect_size on a non-rect node"),
        }
    }

    pub fn set_rect_color(&mut self, id: SceneId, color: Color) {
        match &mut self.get_mut(id).content {
            SceneContent::Rect {
                size,
                color: c,
                buffer,
            } => {
                if *c != color {
                    *c = color;
                    buffer.update(*size, color);
                }
            }
            _ => unreachable!("set_rect_color on a non-rect node"),
        }
    }

    pub fn set_surface_size(&mut self, id: SceneId, new_size: Size<i32, Logical>) {
        match &mut self.get_mut(id).content {
            SceneContent::Surface { size, .. } => *size = new_size,
            _ => unreachable!("set_surface_size on a non-surface node"),
        }
    }

    pub fn set_surface_clip(&mut self, id: SceneId, new_clip: Option<Rectangle<i32, Logical>>) {
        match &mut self.get_mut(id).content {
            SceneContent::Surface { clip, .. } => *clip = new_clip,
            _ => unreachable!("set_surface_clip on a non-surface node"),
        }
    }

    pub fn set_descriptor(&mut self, id: SceneId, descriptor: SceneDescriptor) {
        self.get_mut(id).descriptor = Some(descriptor);
    }

    /// Find the closest descriptor at or above `id`.
    pub fn descriptor_at(&self, id: SceneId) -> Option<&SceneDescriptor> {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let node = self.get(id);
            if let Some(desc) = node.descriptor() {
                return Some(desc);
            }
            cursor = node.parent;
        }
        None
    }

    /// Position of a node in scene-global coordinates.
    pub fn absolute_position(&self, id: SceneId) -> Point<i32, Logical> {
        let mut acc = Point::default();
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let node = self.get(id);
            acc += node.position;
            cursor = node.parent;
        }
        acc
    }

    /// Whether a node and all its ancestors are enabled.
    pub fn is_visible(&self, id: SceneId) -> bool {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let node = self.get(id);
            if !node.enabled {
                return false;
            }
            cursor = node.parent;
        }
        true
    }

    /// Topmost displayable node containing `point` (scene-global), honoring
    /// enable flags and paint order.
    pub fn node_at(&self, point: Point<f64, Logical>) -> Option<SceneHit> {
        self.node_at_in(self.root, Point::default(), point)
    }

    fn node_at_in(
        &self,
        id: SceneId,
        origin: Point<i32, Logical>,
        point: Point<f64, Logical>,
    ) -> Option<SceneHit> {
        let node = self.get(id);
        if !node.enabled {
            return None;
        }
        let origin = origin + node.position;

        // Topmost child wins.
        for &child in node.children.iter().rev() {
            if let Some(hit) = self.node_at_in(child, origin, point) {
                return Some(hit);
            }
        }

        let size = match &node.content {
            SceneContent::Tree => return None,
            SceneContent::Surface { size, clip, .. } => {
                if let Some(clip) = clip {
                    let mut clip = *clip;
                    clip.loc += origin;
                    if !clip.to_f64().contains(point) {
                        return None;
                    }
                }
                *size
            }
            SceneContent::Rect { size, .. } => *size,
        };

        let rect = Rectangle::new(origin, size).to_f64();
        rect.contains(point).then(|| SceneHit {
            node: id,
            local: point - origin.to_f64(),
        })
    }

    /// Walk the enabled subset of a subtree in paint order (bottom first),
    /// yielding each displayable node with its scene-global origin.
    pub fn visit_enabled(
        &self,
        from: SceneId,
        visitor: &mut impl FnMut(SceneId, &SceneNode, Point<i32, Logical>),
    ) {
        let base = self
            .get(from)
            .parent
            .map(|p| self.absolute_position(p))
            .unwrap_or_default();
        self.visit_enabled_in(from, base, visitor);
    }

    fn visit_enabled_in(
        &self,
        id: SceneId,
        origin: Point<i32, Logical>,
        visitor: &mut impl FnMut(SceneId, &SceneNode, Point<i32, Logical>),
    ) {
        let node = self.get(id);
        if !node.enabled {
            return;
        }
        let origin = origin + node.position;
        if !matches!(node.content, SceneContent::Tree) {
            visitor(id, node, origin);
        }
        for &child in &node.children {
            self.visit_enabled_in(child, origin, visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = [1.0, 0.0, 0.0, 1.0];
    const BLUE: Color = [0.0, 0.0, 1.0, 1.0];

    #[test]
    fn paint_order_is_insertion_order() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let below = scene.create_rect(root, (100, 100).into(), RED);
        let above = scene.create_rect(root, (100, 100).into(), BLUE);

        let hit = scene.node_at((50.0, 50.0).into()).unwrap();
        assert_eq!(hit.node, above);

        scene.raise_to_top(below);
        let hit = scene.node_at((50.0, 50.0).into()).unwrap();
        assert_eq!(hit.node, below);
    }

    #[test]
    fn disabled_subtrees_are_invisible_to_hit_testing() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let group = scene.create_tree(root);
        let rect = scene.create_rect(group, (10, 10).into(), RED);

        assert!(scene.node_at((5.0, 5.0).into()).is_some());
        scene.set_enabled(group, false);
        assert!(scene.node_at((5.0, 5.0).into()).is_none());
        assert!(!scene.is_visible(rect));
    }

    #[test]
    fn reparent_moves_subtree_and_positions_compose() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let a = scene.create_tree(root);
        let b = scene.create_tree(root);
        scene.set_position(a, (100, 0).into());
        scene.set_position(b, (0, 100).into());

        let rect = scene.create_rect(a, (10, 10).into(), RED);
        scene.set_position(rect, (5, 5).into());
        assert_eq!(scene.absolute_position(rect), (105, 5).into());

        scene.reparent(rect, b);
        assert_eq!(scene.absolute_position(rect), (5, 105).into());
        assert_eq!(scene.get(a).children().len(), 0);
        assert_eq!(scene.get(b).children(), &[rect]);
    }

    #[test]
    fn reparent_to_same_parent_raises() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let below = scene.create_rect(root, (20, 20).into(), RED);
        let above = scene.create_rect(root, (20, 20).into(), BLUE);
        assert_eq!(scene.get(root).children(), &[below, above]);

        scene.reparent(below, root);
        assert_eq!(scene.get(root).children(), &[above, below]);
    }

    #[test]
    fn destroy_frees_subtree_slots_for_reuse() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let group = scene.create_tree(root);
        let _a = scene.create_rect(group, (1, 1).into(), RED);
        let _b = scene.create_rect(group, (1, 1).into(), RED);
        let live = scene.create_rect(root, (1, 1).into(), BLUE);

        scene.destroy(group);
        assert_eq!(scene.get(root).children(), &[live]);

        // Freed slots get reused before the arena grows.
        let len_before = scene.nodes.len();
        let _c = scene.create_tree(root);
        let _d = scene.create_tree(root);
        let _e = scene.create_tree(root);
        assert_eq!(scene.nodes.len(), len_before);
    }

    #[test]
    fn visit_enabled_skips_disabled_and_reports_origins() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let group = scene.create_tree(root);
        scene.set_position(group, (10, 10).into());
        let shown = scene.create_rect(group, (5, 5).into(), RED);
        scene.set_position(shown, (1, 1).into());
        let hidden = scene.create_rect(group, (5, 5).into(), BLUE);
        scene.set_enabled(hidden, false);

        let mut seen = Vec::new();
        scene.visit_enabled(root, &mut |id, _, origin| seen.push((id, origin)));
        assert_eq!(seen, vec![(shown, Point::from((11, 11)))]);
    }
}
