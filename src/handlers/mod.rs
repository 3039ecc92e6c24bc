//! Wayland protocol handler implementations.
//!
//! The substantial ones get their own module; everything that is a line or
//! two of plumbing lives here.

use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::input::pointer::PointerHandle;
use smithay::reexports::wayland_server::protocol::wl_buffer::WlBuffer;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point, Rectangle};
use smithay::wayland::dmabuf::{DmabufGlobal, DmabufHandler, DmabufState, ImportNotifier};
use smithay::wayland::idle_inhibit::IdleInhibitHandler;
use smithay::wayland::idle_notify::{IdleNotifierHandler, IdleNotifierState};
use smithay::wayland::input_method::{InputMethodHandler, PopupSurface};
use smithay::wayland::keyboard_shortcuts_inhibit::{
    KeyboardShortcutsInhibitHandler, KeyboardShortcutsInhibitState, KeyboardShortcutsInhibitor,
};
use smithay::wayland::output::OutputHandler;
use smithay::wayland::pointer_constraints::{with_pointer_constraint, PointerConstraintsHandler};
use smithay::wayland::security_context::{
    SecurityContext, SecurityContextHandler, SecurityContextListenerSource,
};
use smithay::wayland::selection::data_device::{
    ClientDndGrabHandler, DataDeviceHandler, DataDeviceState, ServerDndGrabHandler,
};
use smithay::wayland::selection::primary_selection::{
    PrimarySelectionHandler, PrimarySelectionState,
};
use smithay::wayland::selection::wlr_data_control::{DataControlHandler, DataControlState};
use smithay::wayland::selection::SelectionHandler;
use smithay::wayland::shm::{ShmHandler, ShmState};
use smithay::wayland::tablet_manager::TabletSeatHandler;
use smithay::wayland::xdg_foreign::{XdgForeignHandler, XdgForeignState};
use smithay::{
    delegate_cursor_shape, delegate_data_control, delegate_data_device, delegate_dmabuf,
    delegate_fractional_scale, delegate_idle_inhibit, delegate_idle_notify,
    delegate_input_method_manager, delegate_keyboard_shortcuts_inhibit, delegate_kde_decoration,
    delegate_output, delegate_pointer_constraints, delegate_pointer_gestures,
    delegate_presentation, delegate_primary_selection, delegate_relative_pointer,
    delegate_security_context, delegate_shm, delegate_single_pixel_buffer,
    delegate_tablet_manager, delegate_text_input_manager, delegate_viewporter,
    delegate_virtual_keyboard_manager, delegate_xdg_foreign,
};

use crate::state::{ClientState, State};

mod compositor;
pub mod foreign_toplevel;
pub mod gamma_control;
mod layer_shell;
mod seat;
mod session_lock;
mod xdg_activation;
mod xdg_decoration;
mod xdg_shell;

impl smithay::wayland::buffer::BufferHandler for State {
    fn buffer_destroyed(&mut self, _buffer: &WlBuffer) {}
}

impl ShmHandler for State {
    fn shm_state(&self) -> &ShmState {
        &self.common.shm_state
    }
}
delegate_shm!(State);

impl DmabufHandler for State {
    fn dmabuf_state(&mut self) -> &mut DmabufState {
        &mut self.common.dmabuf_state
    }

    fn dmabuf_imported(
        &mut self,
        _global: &DmabufGlobal,
        dmabuf: Dmabuf,
        notifier: ImportNotifier,
    ) {
        self.backend.dmabuf_imported(&dmabuf, notifier);
    }
}
delegate_dmabuf!(State);

impl OutputHandler for State {}
delegate_output!(State);

impl SelectionHandler for State {
    type SelectionUserData = ();
}

impl DataDeviceHandler for State {
    fn data_device_state(&mut self) -> &mut DataDeviceState {
        &mut self.common.data_device_state
    }
}

impl ClientDndGrabHandler for State {
    fn started(
        &mut self,
        _source: Option<smithay::reexports::wayland_server::protocol::wl_data_source::WlDataSource>,
        icon: Option<WlSurface>,
        _seat: smithay::input::Seat<Self>,
    ) {
        // Track the drag icon in the seat's scene layer so it renders above
        // everything and follows the pointer.
        if let Some((_, node)) = self.common.dnd_icon.take() {
            self.common.tree.scene.destroy(node);
        }
        if let Some(surface) = icon {
            let layer = self.common.seat.drag_icons;
            let node = self
                .common
                .tree
                .scene
                .create_surface(layer, surface.clone());
            self.common.tree.scene.set_descriptor(
                node,
                crate::scene::SceneDescriptor::DragIcon(surface.clone()),
            );
            self.common
                .tree
                .scene
                .set_position(node, self.common.cursor.location.to_i32_round());
            self.common.dnd_icon = Some((surface, node));
        }
    }

    fn dropped(
        &mut self,
        _target: Option<WlSurface>,
        _validated: bool,
        _seat: smithay::input::Seat<Self>,
    ) {
        if let Some((_, node)) = self.common.dnd_icon.take() {
            self.common.tree.scene.destroy(node);
        }
        // The grab is gone; put pointer focus back where the cursor is.
        crate::input::seatop::rebase(self, 0);
    }
}

impl ServerDndGrabHandler for State {}
delegate_data_device!(State);

impl PrimarySelectionHandler for State {
    fn primary_selection_state(&mut self) -> &mut PrimarySelectionState {
        &mut self.common.primary_selection_state
    }
}
delegate_primary_selection!(State);

impl DataControlHandler for State {
    fn data_control_state(&mut self) -> &mut DataControlState {
        &mut self.common.data_control_state
    }
}
delegate_data_control!(State);

impl IdleNotifierHandler for State {
    fn idle_notifier_state(&mut self) -> &mut IdleNotifierState<Self> {
        &mut self.common.idle_notifier_state
    }
}
delegate_idle_notify!(State);

impl IdleInhibitHandler for State {
    fn inhibit(&mut self, surface: WlSurface) {
        self.common.idle_inhibiting_surfaces.push(surface);
        self.refresh_idle_inhibit();
    }

    fn uninhibit(&mut self, surface: WlSurface) {
        self.common
            .idle_inhibiting_surfaces
            .retain(|s| *s != surface);
        self.refresh_idle_inhibit();
    }
}
delegate_idle_inhibit!(State);

impl KeyboardShortcutsInhibitHandler for State {
    fn keyboard_shortcuts_inhibit_state(&mut self) -> &mut KeyboardShortcutsInhibitState {
        &mut self.common.keyboard_shortcuts_inhibit_state
    }

    fn new_inhibitor(&mut self, inhibitor: KeyboardShortcutsInhibitor) {
        // The core forwards every key anyway; honoring the request is free.
        inhibitor.activate();
    }
}
delegate_keyboard_shortcuts_inhibit!(State);

impl PointerConstraintsHandler for State {
    fn new_constraint(&mut self, surface: &WlSurface, pointer: &PointerHandle<Self>) {
        // Activate right away when the pointer already sits on the surface.
        let has_focus = pointer
            .current_focus()
            .map(|s| s == *surface)
            .unwrap_or(false);
        if has_focus {
            with_pointer_constraint(surface, pointer, |constraint| {
                if let Some(constraint) = constraint {
                    constraint.activate();
                }
            });
        }
    }

    fn cursor_position_hint(
        &mut self,
        surface: &WlSurface,
        pointer: &PointerHandle<Self>,
        location: Point<f64, Logical>,
    ) {
        let active = with_pointer_constraint(surface, pointer, |constraint| {
            constraint.is_some_and(|c| c.is_active())
        });
        if !active {
            return;
        }
        if let Some(node) = self.common.container_for_surface(surface) {
            let content = self.common.tree.container(node).current.content_box();
            self.common.cursor.location = content.loc.to_f64() + location;
            pointer.set_location(self.common.cursor.location);
        }
    }
}
delegate_pointer_constraints!(State);

impl TabletSeatHandler for State {
    fn tablet_tool_image(
        &mut self,
        _tool: &smithay::backend::input::TabletToolDescriptor,
        image: smithay::input::pointer::CursorImageStatus,
    ) {
        if self.common.cursor.op.allows_set_cursor() {
            self.common.cursor.image = image;
        }
    }
}
delegate_tablet_manager!(State);

impl InputMethodHandler for State {
    fn new_popup(&mut self, surface: PopupSurface) {
        if let Err(err) = self
            .common
            .popups
            .track_popup(smithay::desktop::PopupKind::from(surface))
        {
            warn!(?err, "Failed to track input-method popup");
        }
    }

    fn popup_repositioned(&mut self, _surface: PopupSurface) {}

    fn dismiss_popup(&mut self, surface: PopupSurface) {
        if let Some(parent) = surface.get_parent().map(|parent| parent.surface.clone()) {
            let _ = smithay::desktop::PopupManager::dismiss_popup(
                &parent,
                &smithay::desktop::PopupKind::from(surface),
            );
        }
    }

    fn parent_geometry(&self, parent: &WlSurface) -> Rectangle<i32, Logical> {
        self.common
            .container_for_surface(parent)
            .map(|node| self.common.tree.container(node).current.content_box())
            .unwrap_or_default()
    }
}
delegate_input_method_manager!(State);

impl SecurityContextHandler for State {
    fn context_created(&mut self, source: SecurityContextListenerSource, context: SecurityContext) {
        // Clients arriving through this listener carry the context and get
        // the privileged globals filtered away.
        self.common
            .loop_handle
            .insert_source(source, move |client_stream, _, state| {
                let client_state = ClientState {
                    security_context: Some(context.clone()),
                    ..ClientState::default()
                };
                if let Err(err) = state
                    .common
                    .display_handle
                    .insert_client(client_stream, std::sync::Arc::new(client_state))
                {
                    warn!(?err, "Failed to add wayland client to display");
                }
            })
            .expect("Failed to init the security context listener source");
    }
}
delegate_security_context!(State);

impl XdgForeignHandler for State {
    fn xdg_foreign_state(&mut self) -> &mut XdgForeignState {
        &mut self.common.xdg_foreign_state
    }
}
delegate_xdg_foreign!(State);

#[cfg(feature = "udev-backend")]
mod drm_lease {
    use smithay::backend::drm::DrmNode;
    use smithay::wayland::drm_lease::{
        DrmLease, DrmLeaseBuilder, DrmLeaseHandler, DrmLeaseRequest, DrmLeaseState, LeaseRejected,
    };

    use crate::state::State;

    impl DrmLeaseHandler for State {
        fn drm_lease_state(&mut self, node: DrmNode) -> &mut DrmLeaseState {
            self.backend
                .udev()
                .devices
                .get_mut(&node)
                .expect("lease request for unknown device")
                .lease_state
                .as_mut()
                .expect("leasing is initialized for the device")
        }

        fn lease_request(
            &mut self,
            node: DrmNode,
            request: DrmLeaseRequest,
        ) -> Result<DrmLeaseBuilder, LeaseRejected> {
            let device = self
                .backend
                .udev()
                .devices
                .get(&node)
                .ok_or_else(LeaseRejected::default)?;

            let mut builder = DrmLeaseBuilder::new(device.drm());
            for conn in request.connectors {
                let Some((_, crtc)) = device
                    .non_desktop_connectors
                    .iter()
                    .find(|(handle, _)| *handle == conn)
                else {
                    warn!(?conn, "Lease requested for desktop connector, denying");
                    return Err(LeaseRejected::default());
                };
                builder.add_connector(conn);
                builder.add_crtc(*crtc);
                let planes = device.drm().planes(crtc).map_err(LeaseRejected::with_cause)?;
                let (primary_plane, primary_claim) = planes
                    .primary
                    .iter()
                    .find_map(|plane| {
                        device
                            .drm()
                            .claim_plane(plane.handle, *crtc)
                            .map(|claim| (plane, claim))
                    })
                    .ok_or_else(LeaseRejected::default)?;
                builder.add_plane(primary_plane.handle, primary_claim);
                if let Some((cursor, claim)) = planes.cursor.iter().find_map(|plane| {
                    device
                        .drm()
                        .claim_plane(plane.handle, *crtc)
                        .map(|claim| (plane, claim))
                }) {
                    builder.add_plane(cursor.handle, claim);
                }
            }
            Ok(builder)
        }

        fn new_active_lease(&mut self, node: DrmNode, lease: DrmLease) {
            if let Some(device) = self.backend.udev().devices.get_mut(&node) {
                device.active_leases.push(lease);
            }
        }

        fn lease_destroyed(&mut self, node: DrmNode, lease_id: u32) {
            if let Some(device) = self.backend.udev().devices.get_mut(&node) {
                device.active_leases.retain(|l| l.id() != lease_id);
            }
        }
    }

    smithay::delegate_drm_lease!(State);
}

delegate_cursor_shape!(State);
delegate_fractional_scale!(State);
delegate_kde_decoration!(State);
delegate_pointer_gestures!(State);
delegate_presentation!(State);
delegate_relative_pointer!(State);
delegate_single_pixel_buffer!(State);
delegate_text_input_manager!(State);
delegate_viewporter!(State);
delegate_virtual_keyboard_manager!(State);

use smithay::wayland::fractional_scale::FractionalScaleHandler;

impl FractionalScaleHandler for State {
    fn new_fractional_scale(&mut self, surface: WlSurface) {
        // Tell the client the scale of the output its (future) container
        // will land on; refined again on map and on output changes.
        let scale = self
            .common
            .tree
            .root_node()
            .outputs
            .first()
            .map(|&o| {
                self.common
                    .tree
                    .output(o)
                    .output
                    .current_scale()
                    .fractional_scale()
            })
            .unwrap_or(1.0);
        smithay::wayland::compositor::with_states(&surface, |states| {
            smithay::wayland::fractional_scale::with_fractional_scale(states, |fractional| {
                fractional.set_preferred_scale(scale);
            });
        });
    }
}

use smithay::wayland::shell::kde::decoration::KdeDecorationHandler;

impl KdeDecorationHandler for State {
    fn kde_decoration_state(&self) -> &smithay::wayland::shell::kde::decoration::KdeDecorationState
    {
        &self.common.kde_decoration_state
    }
}
