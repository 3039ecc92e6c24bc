//! wlr-layer-shell: panels, wallpapers, lock screens.

use smithay::delegate_layer_shell;
use smithay::desktop::{layer_map_for_output, LayerSurface};
use smithay::output::Output;
use smithay::reexports::wayland_server::protocol::wl_output::WlOutput;
use smithay::wayland::shell::wlr_layer::{
    KeyboardInteractivity, Layer, LayerSurface as WlrLayerSurface, WlrLayerShellHandler,
    WlrLayerShellState,
};

use crate::state::State;

impl WlrLayerShellHandler for State {
    fn shell_state(&mut self) -> &mut WlrLayerShellState {
        &mut self.common.layer_shell_state
    }

    fn new_layer_surface(
        &mut self,
        surface: WlrLayerSurface,
        wl_output: Option<WlOutput>,
        _layer: Layer,
        namespace: String,
    ) {
        let output = wl_output
            .as_ref()
            .and_then(Output::from_resource)
            .or_else(|| {
                let tree = &self.common.tree;
                crate::tree::root::output_at(tree, self.common.cursor.location)
                    .or_else(|| tree.root_node().outputs.first().copied())
                    .map(|id| tree.output(id).output.clone())
            });
        let Some(output) = output else {
            warn!(namespace, "No output for layer surface");
            surface.send_close();
            return;
        };

        let layer_surface = LayerSurface::new(surface, namespace);
        if let Err(err) = layer_map_for_output(&output).map_layer(&layer_surface) {
            warn!(?err, "Failed to map layer surface");
            return;
        }

        // An exclusive layer takes keyboard focus the moment it maps.
        if layer_surface.cached_state().keyboard_interactivity
            == KeyboardInteractivity::Exclusive
        {
            self.set_focus_layer(Some(layer_surface));
        }

        if let Some(node) = self.common.output_node(&output) {
            self.arrange_layer_shell(node);
        }
    }

    fn layer_destroyed(&mut self, surface: WlrLayerSurface) {
        let mut affected_output = None;
        for &node in &self.common.tree.root_node().outputs {
            let output = self.common.tree.output(node).output.clone();
            let mut map = layer_map_for_output(&output);
            let layer = map
                .layers()
                .find(|l| l.layer_surface() == &surface)
                .cloned();
            if let Some(layer) = layer {
                map.unmap_layer(&layer);
                drop(map);

                // Focus falls back to the stack if this layer held it.
                if self
                    .common
                    .seat
                    .focused_layer
                    .as_ref()
                    .is_some_and(|focused| focused == &layer)
                {
                    affected_output = Some((node, true));
                } else {
                    affected_output = Some((node, false));
                }
                break;
            }
        }

        if let Some((node, had_focus)) = affected_output {
            if had_focus {
                self.set_focus_layer(None);
            }
            self.arrange_layer_shell(node);
        }
    }
}

delegate_layer_shell!(State);
