//! Interactive resize of a floating container.

use smithay::input::pointer::{ButtonEvent, CursorIcon, CursorImageStatus};
use smithay::utils::{Logical, Point, Rectangle, Size};

use super::{ResizeEdge, SeatOp};
use crate::state::State;
use crate::tree::{arrange, NodeId};
use crate::view::SizeHints;

#[derive(Clone, Copy, Debug)]
pub struct Data {
    pub container: NodeId,
    /// Cursor position at grab time.
    pub ref_point: Point<f64, Logical>,
    /// Container geometry at grab time.
    pub ref_geometry: Rectangle<i32, Logical>,
    pub edges: ResizeEdge,
    /// Shift held: keep the aspect ratio of the reference geometry.
    pub preserve_ratio: bool,
}

pub fn begin(state: &mut State, con: NodeId, edges: ResizeEdge) {
    super::end(state);

    let preserve_ratio = state
        .common
        .seat
        .smithay
        .get_keyboard()
        .is_some_and(|kbd| kbd.modifier_state().shift);
    let data = Data {
        container: con,
        ref_point: state.common.cursor.location,
        ref_geometry: state.common.tree.container(con).pending.geometry(),
        edges,
        preserve_ratio,
    };
    state.common.cursor.op = SeatOp::ResizeFloating(data);

    if let Some(view) = &state.common.tree.container(con).view {
        view.set_resizing(true);
    }

    let icon = match (
        edges.contains(ResizeEdge::TOP) || edges.contains(ResizeEdge::BOTTOM),
        edges.contains(ResizeEdge::LEFT) || edges.contains(ResizeEdge::RIGHT),
    ) {
        (true, true) => CursorIcon::NwseResize,
        (true, false) => CursorIcon::NsResize,
        _ => CursorIcon::EwResize,
    };
    state.common.cursor.image = CursorImageStatus::Named(icon);
    state.clear_pointer_focus();
}

pub fn pointer_motion(state: &mut State, data: &Data) {
    let cursor = state.common.cursor.location;
    let delta = Point::from((cursor.x - data.ref_point.x, cursor.y - data.ref_point.y));

    let hints = state
        .common
        .tree
        .container(data.container)
        .view
        .as_ref()
        .map(|view| view.size_hints())
        .unwrap_or_default();
    let geometry = calculate_geometry(
        data.ref_geometry,
        delta,
        data.edges,
        data.preserve_ratio,
        state.common.config.floating_minimum,
        state.common.config.floating_maximum,
        hints,
    );

    let changed = {
        let pending = &mut state.common.tree.container_mut(data.container).pending;
        let changed = pending.geometry() != geometry;
        pending.set_geometry(geometry);
        changed
    };
    if changed {
        let con = data.container;
        state.common.tree.set_dirty(con);
        arrange::arrange_container(&mut state.common.tree, con, &state.common.config);
        state.commit_dirty_client();
    }
}

pub fn button(state: &mut State, data: &Data, _event: &ButtonEvent) {
    if state.common.cursor.pressed_button_count() == 0 {
        let data = *data;
        state.common.cursor.op = SeatOp::Default;
        end(state, &data);
        state.common.cursor.image = CursorImageStatus::Named(CursorIcon::Default);
        super::rebase(state, 0);
    }
}

/// Leave resize mode: drop the resizing hint and send one final configure
/// without it.
pub fn end(state: &mut State, data: &Data) {
    if !state.common.tree.exists(data.container) {
        return;
    }
    if let Some(view) = &state.common.tree.container(data.container).view {
        view.set_resizing(false);
    }
    arrange::arrange_container(&mut state.common.tree, data.container, &state.common.config);
    state.commit_dirty();
}

/// Pure resize arithmetic: grow the grabbed edges by the pointer delta,
/// clamped to the configured floating bounds and the client's size hints.
/// The anchor edges (the ones not grabbed) never move.
pub fn calculate_geometry(
    reference: Rectangle<i32, Logical>,
    delta: Point<f64, Logical>,
    edges: ResizeEdge,
    preserve_ratio: bool,
    minimum: Size<i32, Logical>,
    maximum: Size<i32, Logical>,
    hints: SizeHints,
) -> Rectangle<i32, Logical> {
    let mut move_x = delta.x;
    let mut move_y = delta.y;
    if !edges.intersects(ResizeEdge::LEFT | ResizeEdge::RIGHT) {
        move_x = 0.0;
    }
    if !edges.intersects(ResizeEdge::TOP | ResizeEdge::BOTTOM) {
        move_y = 0.0;
    }

    let mut grow_width = if edges.contains(ResizeEdge::LEFT) {
        -move_x
    } else {
        move_x
    };
    let mut grow_height = if edges.contains(ResizeEdge::TOP) {
        -move_y
    } else {
        move_y
    };

    if preserve_ratio {
        let x_multiplier = grow_width / f64::from(reference.size.w);
        let y_multiplier = grow_height / f64::from(reference.size.h);
        let multiplier = x_multiplier.max(y_multiplier);
        grow_width = f64::from(reference.size.w) * multiplier;
        grow_height = f64::from(reference.size.h) * multiplier;
    }

    let mut width = f64::from(reference.size.w) + grow_width;
    let mut height = f64::from(reference.size.h) + grow_height;

    let clamp = |value: f64, min: i32, max: i32| -> f64 {
        let mut value = value;
        if max > 0 {
            value = value.min(f64::from(max));
        }
        if min > 0 {
            value = value.max(f64::from(min));
        }
        value.max(1.0)
    };
    width = clamp(width, minimum.w, maximum.w);
    height = clamp(height, minimum.h, maximum.h);
    width = clamp(width, hints.min_width, hints.max_width);
    height = clamp(height, hints.min_height, hints.max_height);

    let width = width as i32;
    let height = height as i32;
    let mut x = reference.loc.x;
    let mut y = reference.loc.y;
    if edges.contains(ResizeEdge::LEFT) {
        x = reference.loc.x + reference.size.w - width;
    }
    if edges.contains(ResizeEdge::TOP) {
        y = reference.loc.y + reference.size.h - height;
    }

    Rectangle::new((x, y).into(), (width, height).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_limit() -> Size<i32, Logical> {
        Size::from((0, 0))
    }

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
        Rectangle::new((x, y).into(), (w, h).into())
    }

    #[test]
    fn growing_the_right_bottom_keeps_the_origin() {
        let out = calculate_geometry(
            rect(100, 100, 400, 300),
            (50.0, 20.0).into(),
            ResizeEdge::RIGHT | ResizeEdge::BOTTOM,
            false,
            no_limit(),
            no_limit(),
            SizeHints::default(),
        );
        assert_eq!(out, rect(100, 100, 450, 320));
    }

    #[test]
    fn growing_the_left_top_moves_the_origin() {
        let out = calculate_geometry(
            rect(100, 100, 400, 300),
            (-30.0, -10.0).into(),
            ResizeEdge::LEFT | ResizeEdge::TOP,
            false,
            no_limit(),
            no_limit(),
            SizeHints::default(),
        );
        // Dragging the top-left outward grows by the same amount and the
        // bottom-right corner stays pinned at (500, 400).
        assert_eq!(out, rect(70, 90, 430, 310));
    }

    #[test]
    fn a_single_edge_ignores_the_other_axis() {
        let out = calculate_geometry(
            rect(0, 0, 200, 200),
            (37.0, 99.0).into(),
            ResizeEdge::RIGHT,
            false,
            no_limit(),
            no_limit(),
            SizeHints::default(),
        );
        assert_eq!(out, rect(0, 0, 237, 200));
    }

    #[test]
    fn client_hints_and_floating_minimum_clamp() {
        let hints = SizeHints {
            min_width: 150,
            min_height: 0,
            max_width: 0,
            max_height: 260,
        };
        let out = calculate_geometry(
            rect(0, 0, 200, 200),
            (-500.0, 500.0).into(),
            ResizeEdge::RIGHT | ResizeEdge::BOTTOM,
            false,
            Size::from((75, 50)),
            no_limit(),
            hints,
        );
        assert_eq!(out.size.w, 150);
        assert_eq!(out.size.h, 260);
    }

    #[test]
    fn preserve_ratio_scales_both_axes_together() {
        let out = calculate_geometry(
            rect(0, 0, 400, 200),
            (100.0, 0.0).into(),
            ResizeEdge::RIGHT | ResizeEdge::BOTTOM,
            true,
            no_limit(),
            no_limit(),
            SizeHints::default(),
        );
        // 25% growth on the dominant axis applies to both.
        assert_eq!(out, rect(0, 0, 500, 250));
    }
}
