//! The XWayland bridge: X11 windows as views.
//!
//! Managed windows get a container like any Wayland toplevel; since X11 has
//! no configure serials, their transaction acks match by integer-truncated
//! geometry instead. Override-redirect windows bypass management entirely
//! and render in the dedicated unmanaged layer.

use std::process::Stdio;

use smithay::utils::{Logical, Rectangle};
use smithay::wayland::selection::data_device::{
    clear_data_device_selection, current_data_device_selection_userdata,
    request_data_device_client_selection, set_data_device_selection,
};
use smithay::wayland::selection::primary_selection::{
    clear_primary_selection, current_primary_selection_userdata,
    request_primary_client_selection, set_primary_selection,
};
use smithay::wayland::selection::SelectionTarget;
use smithay::xwayland::xwm::{Reorder, ResizeEdge as X11ResizeEdge, XwmId};
use smithay::xwayland::{X11Surface, X11Wm, XWayland, XWaylandEvent, XwmHandler};

use crate::input::seatop::{self, ResizeEdge};
use crate::scene::SceneDescriptor;
use crate::state::State;
use crate::tree::container::{self, FullscreenMode};
use crate::tree::{arrange, NodeId};
use crate::view::{Shell, View};

pub fn start(state: &mut State) -> anyhow::Result<()> {
    let (xwayland, client) = XWayland::spawn(
        &state.common.display_handle,
        None,
        std::iter::empty::<(String, String)>(),
        true,
        Stdio::null(),
        Stdio::null(),
        |_| (),
    )?;

    state
        .common
        .loop_handle
        .insert_source(xwayland, move |event, _, state| match event {
            XWaylandEvent::Ready {
                x11_socket,
                display_number,
            } => {
                let wm = match X11Wm::start_wm(
                    state.common.loop_handle.clone(),
                    x11_socket,
                    client.clone(),
                ) {
                    Ok(wm) => wm,
                    Err(err) => {
                        error!(?err, "Failed to start the X11 window manager");
                        return;
                    }
                };
                state.common.xwm = Some(wm);
                let display_name = format!(":{display_number}");
                info!(display = display_name, "XWayland is ready");
                // SAFETY: single-threaded event loop.
                unsafe {
                    std::env::set_var("DISPLAY", display_name);
                }
            }
            XWaylandEvent::Error => {
                error!("XWayland exited unexpectedly");
                state.common.xwm = None;
            }
        })
        .map_err(|err| anyhow::anyhow!("Failed to insert the XWayland source: {err}"))?;

    Ok(())
}

impl State {
    /// Map X11 windows whose wl_surface just got associated. Called from
    /// the commit hook.
    pub fn map_pending_x11_windows(&mut self) {
        let ready: Vec<X11Surface> = self
            .common
            .unmapped_x11
            .iter()
            .filter(|window| window.wl_surface().is_some())
            .cloned()
            .collect();
        self.common
            .unmapped_x11
            .retain(|window| window.wl_surface().is_none());

        for window in ready {
            let Some(surface) = window.wl_surface() else {
                continue;
            };
            let surface = surface.into_owned();

            if window.is_override_redirect() {
                // Unmanaged: straight into the dedicated layer at the
                // window's own coordinates.
                let layer = self.common.tree.root_node().layers.unmanaged;
                let geometry = window.geometry();
                let leaf = self
                    .common
                    .tree
                    .scene
                    .create_surface(layer, surface.clone());
                self.common
                    .tree
                    .scene
                    .set_descriptor(leaf, SceneDescriptor::Unmanaged(surface));
                self.common.tree.scene.set_position(leaf, geometry.loc);
                self.common.tree.scene.set_surface_size(leaf, geometry.size);
                self.common.unmanaged_x11.push((window, leaf));
                self.queue_redraw_all();
                continue;
            }

            let staging = self.common.tree.root_node().staging;
            let scene_tree = self.common.tree.scene.create_tree(staging);
            let surface_node = self.common.tree.scene.create_surface(scene_tree, surface);
            let mut view = View::new(Shell::XWayland(window.clone()), scene_tree, surface_node);
            view.natural_size = window.geometry().size;
            let size = view.natural_size;
            self.common.tree.scene.set_surface_size(surface_node, size);
            let handle = self.common.foreign_toplevel_list_state.new_toplevel::<State>(
                view.title().unwrap_or_default(),
                view.app_id().unwrap_or_default(),
            );
            view.foreign_handle = Some(handle);
            self.map_view(view);
        }
    }

    fn x11_container(&self, window: &X11Surface) -> Option<NodeId> {
        self.common.tree.node_ids().find(|&id| {
            self.common
                .tree
                .try_container(id)
                .and_then(|c| c.view.as_ref())
                .is_some_and(|view| matches!(view.shell(), Shell::XWayland(w) if w == window))
        })
    }
}

impl XwmHandler for State {
    fn xwm_state(&mut self, _xwm: XwmId) -> &mut X11Wm {
        self.common.xwm.as_mut().expect("xwm events imply a wm")
    }

    fn new_window(&mut self, _xwm: XwmId, _window: X11Surface) {}

    fn new_override_redirect_window(&mut self, _xwm: XwmId, _window: X11Surface) {}

    fn map_window_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Err(err) = window.set_mapped(true) {
            warn!(?err, "Failed to map X11 window");
            return;
        }
        self.common.unmapped_x11.push(window);
        // The wl_surface may already be associated.
        self.map_pending_x11_windows();
    }

    fn mapped_override_redirect_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.common.unmapped_x11.push(window);
        self.map_pending_x11_windows();
    }

    fn unmapped_window(&mut self, _xwm: XwmId, window: X11Surface) {
        self.common.unmapped_x11.retain(|w| w != &window);
        if let Some(idx) = self
            .common
            .unmanaged_x11
            .iter()
            .position(|(w, _)| w == &window)
        {
            let (_, leaf) = self.common.unmanaged_x11.swap_remove(idx);
            self.common.tree.scene.destroy(leaf);
            self.queue_redraw_all();
            return;
        }
        if let Some(node) = self.x11_container(&window) {
            self.unmap_view(node);
        }
    }

    fn destroyed_window(&mut self, xwm: XwmId, window: X11Surface) {
        self.unmapped_window(xwm, window);
    }

    fn configure_request(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        x: Option<i32>,
        y: Option<i32>,
        w: Option<u32>,
        h: Option<u32>,
        _reorder: Option<Reorder>,
    ) {
        let Some(node) = self.x11_container(&window) else {
            // Unmapped or unmanaged windows may move freely.
            let mut geometry = window.geometry();
            if let Some(x) = x {
                geometry.loc.x = x;
            }
            if let Some(y) = y {
                geometry.loc.y = y;
            }
            if let Some(w) = w {
                geometry.size.w = w as i32;
            }
            if let Some(h) = h {
                geometry.size.h = h as i32;
            }
            let _ = window.configure(Some(geometry));
            return;
        };

        // Managed windows: floaters may resize themselves, tiled geometry
        // stays ours.
        if container::is_floating(&self.common.tree, node) {
            {
                let state = &mut self.common.tree.container_mut(node).pending;
                if let Some(w) = w {
                    state.width = w as i32;
                }
                if let Some(h) = h {
                    state.height = h as i32;
                }
            }
            self.common.tree.set_dirty(node);
            arrange::arrange_container(&mut self.common.tree, node, &self.common.config);
            self.commit_dirty_client();
        } else {
            let content = self.common.tree.container(node).current.content_box();
            let _ = window.configure(Some(content));
        }
    }

    fn configure_notify(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        geometry: Rectangle<i32, Logical>,
        _above: Option<smithay::reexports::x11rb::protocol::xproto::Window>,
    ) {
        // X11 has no configure serials; this is the ack path (matched on
        // truncated coordinates).
        if let Some(node) = self.x11_container(&window) {
            self.transaction_ack_geometry(node, geometry);
        } else if let Some((_, leaf)) = self
            .common
            .unmanaged_x11
            .iter()
            .find(|(w, _)| w == &window)
        {
            let leaf = *leaf;
            self.common.tree.scene.set_position(leaf, geometry.loc);
            self.common.tree.scene.set_surface_size(leaf, geometry.size);
            self.queue_redraw_all();
        }
    }

    fn resize_request(
        &mut self,
        _xwm: XwmId,
        window: X11Surface,
        _button: u32,
        edges: X11ResizeEdge,
    ) {
        let Some(node) = self.x11_container(&window) else {
            return;
        };
        if container::is_floating(&self.common.tree, node) {
            seatop::resize_floating::begin(self, node, convert_edges(edges));
        }
    }

    fn move_request(&mut self, _xwm: XwmId, window: X11Surface, _button: u32) {
        let Some(node) = self.x11_container(&window) else {
            return;
        };
        if container::is_floating(&self.common.tree, node) {
            seatop::move_floating::begin(self, node);
        }
    }

    fn fullscreen_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(node) = self.x11_container(&window) {
            container::set_fullscreen(&mut self.common.tree, node, FullscreenMode::Workspace);
            arrange::arrange_root(&mut self.common.tree, &self.common.config);
            self.commit_dirty();
        }
    }

    fn unfullscreen_request(&mut self, _xwm: XwmId, window: X11Surface) {
        if let Some(node) = self.x11_container(&window) {
            container::set_fullscreen(&mut self.common.tree, node, FullscreenMode::None);
            arrange::arrange_root(&mut self.common.tree, &self.common.config);
            self.commit_dirty();
        }
    }

    // X selections bridge into the Wayland clipboard.

    fn allow_selection_access(&mut self, _xwm: XwmId, _selection: SelectionTarget) -> bool {
        true
    }

    fn send_selection(
        &mut self,
        _xwm: XwmId,
        selection: SelectionTarget,
        mime_type: String,
        fd: std::os::fd::OwnedFd,
    ) {
        let seat = self.common.seat.smithay.clone();
        let res = match selection {
            SelectionTarget::Clipboard => {
                request_data_device_client_selection(&seat, mime_type, fd)
            }
            SelectionTarget::Primary => request_primary_client_selection(&seat, mime_type, fd),
        };
        if let Err(err) = res {
            warn!(?err, "Failed to bridge selection to X11");
        }
    }

    fn new_selection(&mut self, _xwm: XwmId, selection: SelectionTarget, mime_types: Vec<String>) {
        let seat = self.common.seat.smithay.clone();
        match selection {
            SelectionTarget::Clipboard => {
                set_data_device_selection(&self.common.display_handle, &seat, mime_types, ());
            }
            SelectionTarget::Primary => {
                set_primary_selection(&self.common.display_handle, &seat, mime_types, ());
            }
        }
    }

    fn cleared_selection(&mut self, _xwm: XwmId, selection: SelectionTarget) {
        let seat = self.common.seat.smithay.clone();
        match selection {
            SelectionTarget::Clipboard => {
                if current_data_device_selection_userdata(&seat).is_some() {
                    clear_data_device_selection(&self.common.display_handle, &seat);
                }
            }
            SelectionTarget::Primary => {
                if current_primary_selection_userdata(&seat).is_some() {
                    clear_primary_selection(&self.common.display_handle, &seat);
                }
            }
        }
    }
}

fn convert_edges(edges: X11ResizeEdge) -> ResizeEdge {
    match edges {
        X11ResizeEdge::Top => ResizeEdge::TOP,
        X11ResizeEdge::Bottom => ResizeEdge::BOTTOM,
        X11ResizeEdge::Left => ResizeEdge::LEFT,
        X11ResizeEdge::Right => ResizeEdge::RIGHT,
        X11ResizeEdge::TopLeft => ResizeEdge::TOP | ResizeEdge::LEFT,
        X11ResizeEdge::TopRight => ResizeEdge::TOP | ResizeEdge::RIGHT,
        X11ResizeEdge::BottomLeft => ResizeEdge::BOTTOM | ResizeEdge::LEFT,
        X11ResizeEdge::BottomRight => ResizeEdge::BOTTOM | ResizeEdge::RIGHT,
    }
}
