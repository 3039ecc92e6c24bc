//! Walk the scene graph into render elements.
//!
//! Rendering policy (damage, scan-out) belongs to the backends; this module
//! only translates the enabled subset of the scene into the element list a
//! damage tracker consumes, topmost first.

use smithay::backend::renderer::element::solid::SolidColorRenderElement;
use smithay::backend::renderer::element::surface::{
    render_elements_from_surface_tree, WaylandSurfaceRenderElement,
};
use smithay::backend::renderer::element::{Kind, RenderElement};
use smithay::backend::renderer::{ImportAll, Renderer, Texture};
use smithay::output::Output;
use smithay::render_elements;
use smithay::utils::Scale;

use crate::output::OutputExt;
use crate::scene::SceneContent;
use crate::tree::Tree;

render_elements! {
    pub SceneRenderElement<R> where R: ImportAll;
    Surface = WaylandSurfaceRenderElement<R>,
    Solid = SolidColorRenderElement,
}

/// Collect the render elements visible on `output`, topmost first.
pub fn scene_elements<R>(
    renderer: &mut R,
    tree: &Tree,
    output: &Output,
) -> Vec<SceneRenderElement<R>>
where
    R: Renderer + ImportAll,
    <R as Renderer>::TextureId: Texture + Clone + 'static,
    SceneRenderElement<R>: RenderElement<R>,
{
    let output_geometry = output.geometry();
    let scale: Scale<f64> = Scale::from(output.current_scale().fractional_scale());

    let mut elements: Vec<SceneRenderElement<R>> = Vec::new();
    tree.scene
        .visit_enabled(tree.scene.root(), &mut |_, node, origin| {
            match node.content() {
                SceneContent::Tree => {}
                SceneContent::Surface { surface, size, .. } => {
                    let bounds = smithay::utils::Rectangle::new(origin, *size);
                    if bounds.intersection(output_geometry).is_none() {
                        return;
                    }
                    let location = (origin - output_geometry.loc)
                        .to_f64()
                        .to_physical_precise_round(scale);
                    elements.extend(
                        render_elements_from_surface_tree(
                            renderer,
                            surface,
                            location,
                            scale,
                            1.0,
                            Kind::Unspecified,
                        )
                        .into_iter()
                        .map(SceneRenderElement::Surface),
                    );
                }
                SceneContent::Rect { size, buffer, .. } => {
                    let bounds = smithay::utils::Rectangle::new(origin, *size);
                    if size.w <= 0 || size.h <= 0 {
                        return;
                    }
                    if bounds.intersection(output_geometry).is_none() {
                        return;
                    }
                    let location = (origin - output_geometry.loc)
                        .to_f64()
                        .to_physical_precise_round(scale);
                    elements.push(SceneRenderElement::Solid(
                        SolidColorRenderElement::from_buffer(
                            buffer,
                            location,
                            scale,
                            1.0,
                            Kind::Unspecified,
                        ),
                    ));
                }
            }
        });

    // The scene walk paints bottom-up; damage tracking wants the topmost
    // element first.
    elements.reverse();
    elements
}
