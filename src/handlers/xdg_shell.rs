//! xdg-shell: toplevels and popups.

use smithay::delegate_xdg_shell;
use smithay::desktop::PopupKind;
use smithay::reexports::wayland_protocols::xdg::shell::server::xdg_toplevel as xdg_toplevel_protocol;
use smithay::reexports::wayland_server::protocol::wl_output::WlOutput;
use smithay::reexports::wayland_server::protocol::wl_seat::WlSeat;
use smithay::utils::Serial;
use smithay::wayland::shell::xdg::{
    Configure, PopupSurface, PositionerState, ToplevelSurface, XdgShellHandler, XdgShellState,
};

use crate::input::seatop::{self, ResizeEdge};
use crate::scene::SceneDescriptor;
use crate::state::{State, UnmappedView};
use crate::tree::container::{self, FullscreenMode};
use crate::tree::{arrange, NodeId};

impl XdgShellHandler for State {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.common.xdg_shell_state
    }

    fn new_toplevel(&mut self, toplevel: ToplevelSurface) {
        // Nothing maps before the first buffer; park it until then.
        self.common.unmapped_views.push(UnmappedView {
            toplevel,
            initial_configure_sent: false,
        });
    }

    fn toplevel_destroyed(&mut self, toplevel: ToplevelSurface) {
        self.common
            .unmapped_views
            .retain(|u| u.toplevel != toplevel);
        if let Some(node) = self.common.container_for_surface(toplevel.wl_surface()) {
            self.unmap_view(node);
        }
    }

    fn new_popup(&mut self, popup: PopupSurface, positioner: PositionerState) {
        let kind = PopupKind::Xdg(popup.clone());
        self.unconstrain_popup(&popup, positioner);
        if let Err(err) = self.common.popups.track_popup(kind) {
            warn!(?err, "Failed to track popup");
            return;
        }

        // Give the popup a scene presence in the global popup layer,
        // anchored to its parent's scene node.
        let Some(parent) = popup.get_parent_surface() else {
            return;
        };
        let anchor = self
            .common
            .container_for_surface(&parent)
            .and_then(|node| {
                self.common
                    .tree
                    .container(node)
                    .view
                    .as_ref()
                    .map(|view| view.scene_tree)
            });
        let layer = self.common.tree.root_node().layers.popup;
        let surface = popup.wl_surface().clone();
        let leaf = self.common.tree.scene.create_surface(layer, surface.clone());
        let relative_to = anchor.unwrap_or_else(|| self.common.tree.scene.root());
        self.common.tree.scene.set_descriptor(
            leaf,
            SceneDescriptor::Popup {
                surface,
                relative_to,
            },
        );
        let base = self.common.tree.scene.absolute_position(relative_to);
        let offset = popup.with_pending_state(|state| state.geometry.loc);
        self.common.tree.scene.set_position(leaf, base + offset);
    }

    fn popup_destroyed(&mut self, popup: PopupSurface) {
        let layer = self.common.tree.root_node().layers.popup;
        let children = self.common.tree.scene.get(layer).children().to_vec();
        for child in children {
            let matches = matches!(
                self.common.tree.scene.get(child).descriptor(),
                Some(SceneDescriptor::Popup { surface, .. }) if surface == popup.wl_surface()
            );
            if matches {
                self.common.tree.scene.destroy(child);
            }
        }
        self.queue_redraw_all();
    }

    fn reposition_request(
        &mut self,
        popup: PopupSurface,
        positioner: PositionerState,
        token: u32,
    ) {
        self.unconstrain_popup(&popup, positioner);
        popup.send_repositioned(token);
    }

    fn grab(&mut self, _popup: PopupSurface, _seat: WlSeat, _serial: Serial) {
        // Popup grabs dismiss on outside clicks through the default-op press
        // path; no dedicated grab machinery.
    }

    fn move_request(&mut self, surface: ToplevelSurface, _seat: WlSeat, serial: Serial) {
        let pointer = self.pointer();
        if !pointer.has_grab(serial) {
            return;
        }
        let Some(node) = self.common.container_for_surface(surface.wl_surface()) else {
            return;
        };
        let floater = top_level(self, node);
        if container::is_floating(&self.common.tree, floater) {
            seatop::move_floating::begin(self, floater);
        }
    }

    fn resize_request(
        &mut self,
        surface: ToplevelSurface,
        _seat: WlSeat,
        serial: Serial,
        edges: xdg_toplevel_protocol::ResizeEdge,
    ) {
        let pointer = self.pointer();
        if !pointer.has_grab(serial) {
            return;
        }
        let Some(node) = self.common.container_for_surface(surface.wl_surface()) else {
            return;
        };
        let floater = top_level(self, node);
        if container::is_floating(&self.common.tree, floater) {
            seatop::resize_floating::begin(self, floater, convert_edges(edges));
        }
    }

    fn fullscreen_request(&mut self, surface: ToplevelSurface, _output: Option<WlOutput>) {
        if let Some(node) = self.common.container_for_surface(surface.wl_surface()) {
            container::set_fullscreen(&mut self.common.tree, node, FullscreenMode::Workspace);
            arrange::arrange_root(&mut self.common.tree, &self.common.config);
            self.commit_dirty();
        } else {
            // Not mapped yet; remember the wish for map time.
            surface.with_pending_state(|state| {
                state.states.set(xdg_toplevel_protocol::State::Fullscreen);
            });
        }
    }

    fn unfullscreen_request(&mut self, surface: ToplevelSurface) {
        if let Some(node) = self.common.container_for_surface(surface.wl_surface()) {
            container::set_fullscreen(&mut self.common.tree, node, FullscreenMode::None);
            arrange::arrange_root(&mut self.common.tree, &self.common.config);
            self.commit_dirty();
        }
    }

    fn maximize_request(&mut self, surface: ToplevelSurface) {
        // Tiled layouts have no maximized state; ack so the client stops
        // waiting.
        surface.send_configure();
    }

    fn unmaximize_request(&mut self, _surface: ToplevelSurface) {}

    fn minimize_request(&mut self, surface: ToplevelSurface) {
        // Closest match in this model: hide into the scratchpad.
        if let Some(node) = self.common.container_for_surface(surface.wl_surface()) {
            let floater = top_level(self, node);
            crate::tree::root::scratchpad_hide(&mut self.common.tree, floater);
            arrange::arrange_root(&mut self.common.tree, &self.common.config);
            self.commit_dirty();
        }
    }

    fn ack_configure(&mut self, surface: smithay::reexports::wayland_server::protocol::wl_surface::WlSurface, configure: Configure) {
        // The transaction engine matches acks by serial.
        if let Configure::Toplevel(configure) = configure {
            if let Some(node) = self.common.container_for_surface(&surface) {
                self.transaction_ack_serial(node, configure.serial);
            }
        }
    }

    fn app_id_changed(&mut self, surface: ToplevelSurface) {
        if let Some(node) = self.common.container_for_surface(surface.wl_surface()) {
            container::update_title(&mut self.common.tree, node);
            self.refresh_foreign_toplevel(node);
            self.commit_dirty_client();
        }
    }

    fn title_changed(&mut self, surface: ToplevelSurface) {
        if let Some(node) = self.common.container_for_surface(surface.wl_surface()) {
            container::update_title(&mut self.common.tree, node);
            self.refresh_foreign_toplevel(node);
            self.commit_dirty_client();
        }
    }
}

fn top_level(state: &State, mut node: NodeId) -> NodeId {
    while let Some(parent) = state.common.tree.container(node).pending.parent {
        node = parent;
    }
    node
}

fn convert_edges(edges: xdg_toplevel_protocol::ResizeEdge) -> ResizeEdge {
    use xdg_toplevel_protocol::ResizeEdge as Xdg;
    match edges {
        Xdg::Top => ResizeEdge::TOP,
        Xdg::Bottom => ResizeEdge::BOTTOM,
        Xdg::Left => ResizeEdge::LEFT,
        Xdg::Right => ResizeEdge::RIGHT,
        Xdg::TopLeft => ResizeEdge::TOP | ResizeEdge::LEFT,
        Xdg::TopRight => ResizeEdge::TOP | ResizeEdge::RIGHT,
        Xdg::BottomLeft => ResizeEdge::BOTTOM | ResizeEdge::LEFT,
        Xdg::BottomRight => ResizeEdge::BOTTOM | ResizeEdge::RIGHT,
        _ => ResizeEdge::empty(),
    }
}

impl State {
    /// Constrain a popup's geometry to the output holding its parent.
    fn unconstrain_popup(&mut self, popup: &PopupSurface, positioner: PositionerState) {
        let Some(parent) = popup.get_parent_surface() else {
            return;
        };
        let Some(node) = self.common.container_for_surface(&parent) else {
            return;
        };
        let Some(output_node) = self.common.tree.output_of(node) else {
            return;
        };
        let output_box = self.common.tree.output(output_node).geometry();
        let content = self.common.tree.container(node).pending.content_box();

        // Geometry is parent-relative; bring the output box into that frame.
        let mut target = output_box;
        target.loc -= content.loc;
        let geometry = positioner.get_unconstrained_geometry(target);
        popup.with_pending_state(|state| {
            state.geometry = geometry;
        });
    }
}

delegate_xdg_shell!(State);
