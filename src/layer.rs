//! Layer-shell surface bookkeeping.
//!
//! Smithay's `LayerMap` owns the layer-shell arrangement (anchors, margins,
//! exclusive zones); this module mirrors the result into the per-output
//! scene layers and folds the non-exclusive zone into the output's usable
//! area, which drives the tiling arrange.

use smithay::desktop::{layer_map_for_output, LayerSurface, WindowSurfaceType};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Rectangle};
use smithay::wayland::shell::wlr_layer::Layer as WlrLayer;

use crate::scene::{SceneDescriptor, SceneId};
use crate::state::State;
use crate::tree::{arrange, NodeId, Tree};

impl State {
    /// The mapped layer surface owning `surface`, searched across outputs.
    pub fn layer_for_surface_global(&self, surface: &WlSurface) -> Option<LayerSurface> {
        for &output in &self.common.tree.root_node().outputs {
            let smithay_output = &self.common.tree.output(output).output;
            let map = layer_map_for_output(smithay_output);
            if let Some(layer) = map.layer_for_surface(surface, WindowSurfaceType::ALL) {
                return Some(layer.clone());
            }
        }
        None
    }

    /// Re-arrange the layer shell of one output: recompute exclusive zones,
    /// rebuild the shell scene layers, and re-tile if the usable area moved.
    pub fn arrange_layer_shell(&mut self, output: NodeId) {
        let smithay_output = self.common.tree.output(output).output.clone();

        let (usable, surfaces) = {
            let mut map = layer_map_for_output(&smithay_output);
            map.arrange();
            let usable = map.non_exclusive_zone();
            let surfaces: Vec<(WlrLayer, WlSurface, Rectangle<i32, Logical>)> = map
                .layers()
                .filter_map(|layer| {
                    let geometry = map.layer_geometry(layer)?;
                    Some((layer.layer(), layer.wl_surface().clone(), geometry))
                })
                .collect();
            (usable, surfaces)
        };

        let tree = &mut self.common.tree;
        rebuild_layer_scene(tree, output, &surfaces);

        if tree.output(output).usable_area != usable {
            tree.output_mut(output).usable_area = usable;
            tree.set_dirty(output);
            arrange::arrange_output(tree, output, &self.common.config);
        }
        self.commit_dirty();
    }
}

fn rebuild_layer_scene(
    tree: &mut Tree,
    output: NodeId,
    surfaces: &[(WlrLayer, WlSurface, Rectangle<i32, Logical>)],
) {
    let layers = {
        let node = tree.output(output);
        [
            (WlrLayer::Background, node.layers.shell_background),
            (WlrLayer::Bottom, node.layers.shell_bottom),
            (WlrLayer::Top, node.layers.shell_top),
            (WlrLayer::Overlay, node.layers.shell_overlay),
        ]
    };

    for (wlr_layer, scene_layer) in layers {
        clear_children(tree, scene_layer);
        for (layer, surface, geometry) in surfaces {
            if *layer != wlr_layer {
                continue;
            }
            let leaf = tree.scene.create_surface(scene_layer, surface.clone());
            tree.scene.set_position(leaf, geometry.loc);
            tree.scene.set_surface_size(leaf, geometry.size);
            tree.scene
                .set_descriptor(leaf, SceneDescriptor::LayerSurface(surface.clone()));
        }
    }
}

fn clear_children(tree: &mut Tree, layer: SceneId) {
    let children: Vec<SceneId> = tree.scene.get(layer).children().to_vec();
    for child in children {
        tree.scene.destroy(child);
    }
}
