//! wl_compositor: the commit hook, where everything client-side starts.

use smithay::backend::renderer::utils::{on_commit_buffer_handler, with_renderer_surface_state};
use smithay::delegate_compositor;
use smithay::desktop::{layer_map_for_output, PopupKind, WindowSurfaceType};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::Client;
use smithay::wayland::compositor::{
    get_parent, is_sync_subsurface, with_states, CompositorClientState, CompositorHandler,
    CompositorState,
};

use crate::state::{ClientState, State};
use crate::tree::container;
use crate::view::{Shell, View};

impl CompositorHandler for State {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.common.compositor_state
    }

    fn client_compositor_state<'a>(&self, client: &'a Client) -> &'a CompositorClientState {
        &client
            .get_data::<ClientState>()
            .expect("every client has ClientState")
            .compositor_state
    }

    fn commit(&mut self, surface: &WlSurface) {
        on_commit_buffer_handler::<Self>(surface);
        self.backend.early_import(surface);
        #[cfg(feature = "xwayland")]
        self.map_pending_x11_windows();

        if is_sync_subsurface(surface) {
            return;
        }
        let mut root_surface = surface.clone();
        while let Some(parent) = get_parent(&root_surface) {
            root_surface = parent;
        }

        // A toplevel waiting to map?
        if let Some(idx) = self
            .common
            .unmapped_views
            .iter()
            .position(|u| u.toplevel.wl_surface() == &root_surface)
        {
            let has_buffer =
                with_renderer_surface_state(&root_surface, |state| state.buffer().is_some())
                    .unwrap_or(false);

            if !self.common.unmapped_views[idx].initial_configure_sent {
                let unmapped = &mut self.common.unmapped_views[idx];
                unmapped.toplevel.send_configure();
                unmapped.initial_configure_sent = true;
                return;
            }

            if has_buffer {
                let unmapped = self.common.unmapped_views.swap_remove(idx);
                let toplevel = unmapped.toplevel;

                // Build the view's scene presence and hand it to the tree.
                let staging = self.common.tree.root_node().staging;
                let scene_tree = self.common.tree.scene.create_tree(staging);
                let surface_node = self
                    .common
                    .tree
                    .scene
                    .create_surface(scene_tree, toplevel.wl_surface().clone());
                let mut view = View::new(Shell::Xdg(toplevel.clone()), scene_tree, surface_node);
                view.natural_size = with_renderer_surface_state(&root_surface, |state| {
                    state.surface_size().unwrap_or_default()
                })
                .unwrap_or_default();
                let size = view.natural_size;
                self.common.tree.scene.set_surface_size(surface_node, size);

                // Publish a foreign-toplevel handle for panels/docks.
                let handle = self
                    .common
                    .foreign_toplevel_list_state
                    .new_toplevel::<State>(
                        view.title().unwrap_or_default(),
                        view.app_id().unwrap_or_default(),
                    );
                view.foreign_handle = Some(handle);

                self.map_view(view);
                return;
            }
            return;
        }

        // A mapped view committing new content.
        if let Some(node) = self.common.container_for_surface(&root_surface) {
            let new_size = with_renderer_surface_state(&root_surface, |state| {
                state.surface_size().unwrap_or_default()
            })
            .unwrap_or_default();
            let surface_node = self
                .common
                .tree
                .container(node)
                .view
                .as_ref()
                .map(|view| view.surface_node);
            if let Some(surface_node) = surface_node {
                self.common.tree.scene.set_surface_size(surface_node, new_size);
            }
            container::update_title(&mut self.common.tree, node);
            self.refresh_foreign_toplevel(node);

            if let Some(output) = self.common.tree.output_of(node) {
                let output = self.common.tree.output(output).output.clone();
                self.queue_redraw(&output);
            }
            return;
        }

        // Popup commits: send the initial configure when needed.
        if let Some(popup) = self.common.popups.find_popup(surface) {
            match popup {
                PopupKind::Xdg(ref xdg) => {
                    if !xdg.is_initial_configure_sent() {
                        if let Err(err) = xdg.send_configure() {
                            warn!(?err, "Initial popup configure failed");
                        }
                    }
                }
                PopupKind::InputMethod(_) => {}
            }
            self.queue_redraw_all();
            return;
        }

        // Layer-shell surface commits re-run the layer arrange (exclusive
        // zones may have changed).
        let layer_output = self.common.tree.root_node().outputs.iter().copied().find(|&o| {
            let output = &self.common.tree.output(o).output;
            layer_map_for_output(output)
                .layer_for_surface(&root_surface, WindowSurfaceType::TOPLEVEL)
                .is_some()
        });
        if let Some(output_node) = layer_output {
            let initial_configure_sent = with_states(&root_surface, |states| {
                states
                    .data_map
                    .get::<smithay::wayland::shell::wlr_layer::LayerSurfaceData>()
                    .map(|data| data.lock().unwrap().initial_configure_sent)
            })
            .unwrap_or(true);
            let smithay_output = self.common.tree.output(output_node).output.clone();
            if !initial_configure_sent {
                layer_map_for_output(&smithay_output)
                    .layer_for_surface(&root_surface, WindowSurfaceType::TOPLEVEL)
                    .expect("just found")
                    .layer_surface()
                    .send_configure();
            }
            self.arrange_layer_shell(output_node);
            self.queue_redraw(&smithay_output);
            return;
        }

        // Session-lock surfaces and drag icons only need a repaint.
        self.queue_redraw_all();
    }
}

delegate_compositor!(State);
