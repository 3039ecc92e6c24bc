//! Cursor state shared by every seat-op.
//!
//! The cursor tracks the pointer position in layout coordinates, the set of
//! currently pressed buttons, the touch→pointer simulation state and which
//! node the pointer last hovered (for focus-follows-mouse edge detection).
//! Resolving what sits under a point goes through the scene graph, so input
//! dispatch and rendering can never disagree about stacking.

use smithay::input::pointer::CursorImageStatus;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point};

use crate::scene::{SceneDescriptor, SceneHit};
use crate::tree::{NodeId, Tree};

/// What the pointer resolved to.
#[derive(Clone, Debug, PartialEq)]
pub enum HitTarget {
    /// Server-side decoration (border/title bar) of a container.
    Container(NodeId),
    /// Client content of a view container.
    View { container: NodeId, surface: WlSurface },
    Layer(WlSurface),
    LockSurface(WlSurface),
    Popup(WlSurface),
}

impl HitTarget {
    pub fn container(&self) -> Option<NodeId> {
        match self {
            Self::Container(id) | Self::View { container: id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// A resolved hit plus the surface-local position for event forwarding.
#[derive(Clone, Debug)]
pub struct Hit {
    pub target: HitTarget,
    pub local: Point<f64, Logical>,
}

#[derive(Debug)]
pub struct Cursor {
    /// Pointer position in layout coordinates.
    pub location: Point<f64, Logical>,
    /// The seat-op state machine.
    pub op: crate::input::seatop::SeatOp,
    /// Currently pressed buttons, ascending.
    pressed: Vec<u32>,
    pub image: CursorImageStatus,
    /// Touch slot currently driving the simulated pointer, if any.
    pub simulating_pointer_from_touch: Option<smithay::backend::input::TouchSlot>,
    /// Container the pointer hovered on the previous motion, for
    /// focus-follows-mouse edge detection.
    pub previous_hover: Option<NodeId>,
    /// Output the pointer was over on the previous motion.
    pub previous_output: Option<NodeId>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            location: Point::default(),
            op: crate::input::seatop::SeatOp::default(),
            pressed: Vec::new(),
            image: CursorImageStatus::default_named(),
            simulating_pointer_from_touch: None,
            previous_hover: None,
            previous_output: None,
        }
    }
}

impl Cursor {
    pub fn press_button(&mut self, button: u32) {
        if let Err(idx) = self.pressed.binary_search(&button) {
            self.pressed.insert(idx, button);
        }
    }

    pub fn release_button(&mut self, button: u32) {
        if let Ok(idx) = self.pressed.binary_search(&button) {
            self.pressed.remove(idx);
        }
    }

    pub fn pressed_button_count(&self) -> usize {
        self.pressed.len()
    }

    pub fn pressed_buttons(&self) -> &[u32] {
        &self.pressed
    }

    /// Forget a freed node.
    pub fn purge_node(&mut self, node: NodeId) {
        if self.previous_hover == Some(node) {
            self.previous_hover = None;
        }
        if self.previous_output == Some(node) {
            self.previous_output = None;
        }
    }
}

/// Resolve the topmost interactive node at `point` in layout coordinates.
pub fn node_at_coords(tree: &Tree, point: Point<f64, Logical>) -> Option<Hit> {
    let SceneHit { node, local } = tree.scene.node_at(point)?;
    let descriptor = tree.scene.descriptor_at(node)?;
    let target = match descriptor {
        SceneDescriptor::Container(id) => HitTarget::Container(*id),
        SceneDescriptor::View(id) => {
            let surface = tree.container(*id).view.as_ref()?.wl_surface()?;
            HitTarget::View {
                container: *id,
                surface,
            }
        }
        SceneDescriptor::LayerSurface(surface) => HitTarget::Layer(surface.clone()),
        SceneDescriptor::LockSurface(surface) => HitTarget::LockSurface(surface.clone()),
        SceneDescriptor::Popup { surface, .. } => HitTarget::Popup(surface.clone()),
        // Forwarded exactly like popups: raw events, no focus bookkeeping.
        SceneDescriptor::Unmanaged(surface) => HitTarget::Popup(surface.clone()),
        // Drag icons never receive input.
        SceneDescriptor::DragIcon(_) => return None,
    };
    Some(Hit { target, local })
}

/// The decision focus-follows-mouse takes on a pointer motion.
#[derive(Debug, PartialEq, Eq)]
pub enum FollowFocus {
    None,
    /// Pointer entered a keyboard-interactive layer surface.
    Layer,
    /// Pointer crossed onto another output: focus its last-focused node.
    OutputBoundary(NodeId),
    /// Pointer entered a different visible view container.
    View(NodeId),
}

/// Decide whether this motion moves focus, per the focus-follow rules.
/// `layer_interactive` tells whether the hit layer surface accepts keyboard
/// focus on hover.
pub fn follow_focus_decision(
    tree: &Tree,
    cursor: &Cursor,
    hit: Option<&HitTarget>,
    layer_interactive: bool,
) -> FollowFocus {
    let output = crate::tree::root::output_at(tree, cursor.location);

    if let Some(HitTarget::Layer(_)) = hit {
        if layer_interactive {
            return FollowFocus::Layer;
        }
    }

    if let (Some(output), Some(previous)) = (output, cursor.previous_output) {
        if output != previous {
            return FollowFocus::OutputBoundary(output);
        }
    }

    if let Some(HitTarget::View { container, .. }) = hit {
        if cursor.previous_hover != Some(*container)
            && tree.scene.is_visible(tree.container(*container).scene_tree)
        {
            return FollowFocus::View(*container);
        }
    }

    FollowFocus::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::tree_with_output;
    use crate::tree::{container, workspace, Layout};

    #[test]
    fn pressed_buttons_stay_sorted_and_deduplicated() {
        let mut cursor = Cursor::default();
        cursor.press_button(0x111);
        cursor.press_button(0x110);
        cursor.press_button(0x111);
        assert_eq!(cursor.pressed_buttons(), &[0x110, 0x111]);
        assert_eq!(cursor.pressed_button_count(), 2);

        cursor.release_button(0x110);
        cursor.release_button(0x110);
        assert_eq!(cursor.pressed_buttons(), &[0x111]);
    }

    #[test]
    fn hits_resolve_through_scene_descriptors() {
        let (mut tree, _output, ws) = tree_with_output();
        let con = container::create_split(&mut tree, Layout::None);
        workspace::add_floating(&mut tree, ws, con);
        tree.container_mut(con).pending.set_geometry(
            smithay::utils::Rectangle::new((100, 100).into(), (400, 300).into()),
        );
        tree.container_mut(con).current = tree.container(con).pending.clone();
        crate::transaction::sync_scene(&mut tree);

        // The border rects carry the container descriptor.
        let hit = node_at_coords(&tree, (101.0, 101.0).into()).expect("hit the border");
        assert_eq!(hit.target, HitTarget::Container(con));
        assert!(node_at_coords(&tree, (50.0, 50.0).into()).is_none());
    }

    #[test]
    fn crossing_an_output_boundary_triggers_follow_focus() {
        use smithay::output::{Mode, Output, PhysicalProperties, Subpixel};

        let (mut tree, output_a, _ws) = tree_with_output();
        let second = Output::new(
            String::from("DP-2"),
            PhysicalProperties {
                size: smithay::utils::Size::from((520, 290)),
                subpixel: Subpixel::Unknown,
                make: String::from("strata"),
                model: String::from("test"),
            },
        );
        second.change_current_state(
            Some(Mode {
                size: smithay::utils::Size::from((1920, 1080)),
                refresh: 60_000,
            }),
            None,
            None,
            Some((1920, 0).into()),
        );
        let output_b = crate::tree::output::create(&mut tree, second);
        crate::tree::output::enable(&mut tree, output_b, &crate::config::Config::default());

        let mut cursor = Cursor::default();
        cursor.previous_output = Some(output_a);

        // Motion within the same output: focus stays put.
        cursor.location = (500.0, 500.0).into();
        assert_eq!(
            follow_focus_decision(&tree, &cursor, None, false),
            FollowFocus::None
        );

        // Motion past the boundary: focus follows onto the other output.
        cursor.location = (2500.0, 500.0).into();
        assert_eq!(
            follow_focus_decision(&tree, &cursor, None, false),
            FollowFocus::OutputBoundary(output_b)
        );
    }
}
