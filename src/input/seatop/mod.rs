//! Seat operations: the mode the seat is in.
//!
//! The seat is always in exactly one op. `Default` routes events to clients
//! and watches for triggers; the other ops capture the pointer (or a touch
//! point) for one interaction and end when the last button or touch lifts,
//! returning to `Default`.

use smithay::input::pointer::{AxisFrame, ButtonEvent};
use smithay::utils::{Logical, Point};

use crate::state::State;
use crate::tree::NodeId;

pub mod default;
pub mod down;
pub mod move_floating;
pub mod resize_floating;
pub mod touch_down;

bitflags::bitflags! {
    /// Which edges of a container a resize drags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ResizeEdge: u32 {
        const TOP = 0b0001;
        const BOTTOM = 0b0010;
        const LEFT = 0b0100;
        const RIGHT = 0b1000;
    }
}

pub const BTN_LEFT: u32 = 0x110;

#[derive(Debug, Default)]
pub enum SeatOp {
    #[default]
    Default,
    MoveFloating(move_floating::Data),
    ResizeFloating(resize_floating::Data),
    Down(down::Data),
    TouchDown(touch_down::Data),
}

impl SeatOp {
    /// Whether clients may set the cursor image in this op. Interactive
    /// move/resize own the cursor shape.
    pub fn allows_set_cursor(&self) -> bool {
        matches!(self, Self::Default | Self::Down(_) | Self::TouchDown(_))
    }
}

/// End the current op unconditionally and fall back to `Default`.
pub fn end(state: &mut State) {
    match std::mem::take(&mut state.common.cursor.op) {
        SeatOp::ResizeFloating(data) => resize_floating::end(state, &data),
        SeatOp::Default
        | SeatOp::MoveFloating(_)
        | SeatOp::Down(_)
        | SeatOp::TouchDown(_) => {}
    }
}

/// A container is going away; any op holding it must stop.
pub fn unref(state: &mut State, container: NodeId) {
    let holds = match &state.common.cursor.op {
        SeatOp::MoveFloating(data) => data.container == container,
        SeatOp::ResizeFloating(data) => data.container == container,
        SeatOp::Down(data) => data.container == Some(container),
        SeatOp::Default | SeatOp::TouchDown(_) => false,
    };
    if holds {
        end(state);
    }
}

pub fn button(state: &mut State, event: &ButtonEvent) {
    match &state.common.cursor.op {
        SeatOp::Default => default::button(state, event),
        SeatOp::MoveFloating(data) => {
            let data = *data;
            move_floating::button(state, &data, event);
        }
        SeatOp::ResizeFloating(data) => {
            let data = *data;
            resize_floating::button(state, &data, event);
        }
        SeatOp::Down(data) => {
            let data = data.clone();
            down::button(state, &data, event);
        }
        SeatOp::TouchDown(_) => {}
    }
}

pub fn pointer_motion(state: &mut State, time_msec: u32) {
    match &state.common.cursor.op {
        SeatOp::Default => default::pointer_motion(state, time_msec),
        SeatOp::MoveFloating(data) => {
            let data = *data;
            move_floating::pointer_motion(state, &data);
        }
        SeatOp::ResizeFloating(data) => {
            let data = *data;
            resize_floating::pointer_motion(state, &data);
        }
        SeatOp::Down(data) => {
            let data = data.clone();
            down::pointer_motion(state, &data, time_msec);
        }
        SeatOp::TouchDown(_) => {}
    }
}

pub fn pointer_axis(state: &mut State, frame: AxisFrame) {
    match &state.common.cursor.op {
        SeatOp::Default => default::pointer_axis(state, frame),
        // Captured ops swallow scroll.
        _ => {}
    }
}

/// Tablet tool tip down/up acts as the button of a capture op: a tip-up
/// ends move/resize the same way the last pointer release does. The default
/// op routes tips through the tablet-v2 tool instead, so it never lands
/// here.
pub fn tablet_tool_tip(state: &mut State, down: bool, time_msec: u32) {
    let event = ButtonEvent {
        serial: smithay::utils::SERIAL_COUNTER.next_serial(),
        time: time_msec,
        button: BTN_LEFT,
        state: if down {
            smithay::backend::input::ButtonState::Pressed
        } else {
            smithay::backend::input::ButtonState::Released
        },
    };
    match &state.common.cursor.op {
        SeatOp::MoveFloating(data) => {
            let data = *data;
            move_floating::button(state, &data, &event);
        }
        SeatOp::ResizeFloating(data) => {
            let data = *data;
            resize_floating::button(state, &data, &event);
        }
        SeatOp::Down(data) => {
            let data = data.clone();
            down::button(state, &data, &event);
        }
        SeatOp::Default | SeatOp::TouchDown(_) => {}
    }
}

pub fn touch_down(
    state: &mut State,
    slot: smithay::backend::input::TouchSlot,
    position: Point<f64, Logical>,
    time_msec: u32,
) {
    if matches!(&state.common.cursor.op, SeatOp::Default) {
        default::touch_down(state, slot, position, time_msec);
    }
}

pub fn touch_motion(
    state: &mut State,
    slot: smithay::backend::input::TouchSlot,
    position: Point<f64, Logical>,
    time_msec: u32,
) {
    if let SeatOp::TouchDown(data) = &state.common.cursor.op {
        let data = data.clone();
        touch_down::motion(state, &data, slot, position, time_msec);
    }
}

pub fn touch_up(state: &mut State, slot: smithay::backend::input::TouchSlot, time_msec: u32) {
    if let SeatOp::TouchDown(data) = &state.common.cursor.op {
        let data = data.clone();
        touch_down::up(state, &data, slot, time_msec);
    }
}

pub fn touch_cancel(state: &mut State) {
    if matches!(&state.common.cursor.op, SeatOp::TouchDown(_)) {
        state.common.cursor.simulating_pointer_from_touch = None;
        state.common.cursor.op = SeatOp::Default;
    }
}

/// Recompute pointer focus without any device event (scene changed under a
/// stationary cursor). Only meaningful in ops that track hover.
pub fn rebase(state: &mut State, time_msec: u32) {
    if matches!(&state.common.cursor.op, SeatOp::Default) {
        default::pointer_motion(state, time_msec);
    }
}

/// Compute which edges a point inside `geometry` is close to, for
/// mod+press resize. The quadrant of the press decides.
pub fn edges_for_point(
    geometry: smithay::utils::Rectangle<i32, Logical>,
    point: Point<f64, Logical>,
) -> ResizeEdge {
    let center_x = f64::from(geometry.loc.x) + f64::from(geometry.size.w) / 2.0;
    let center_y = f64::from(geometry.loc.y) + f64::from(geometry.size.h) / 2.0;
    let mut edges = ResizeEdge::empty();
    if point.x < center_x {
        edges |= ResizeEdge::LEFT;
    } else {
        edges |= ResizeEdge::RIGHT;
    }
    if point.y < center_y {
        edges |= ResizeEdge::TOP;
    } else {
        edges |= ResizeEdge::BOTTOM;
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_quadrant_decides_the_resize_edges() {
        let geometry = smithay::utils::Rectangle::new((0, 0).into(), (100, 100).into());
        assert_eq!(
            edges_for_point(geometry, (10.0, 10.0).into()),
            ResizeEdge::LEFT | ResizeEdge::TOP
        );
        assert_eq!(
            edges_for_point(geometry, (90.0, 10.0).into()),
            ResizeEdge::RIGHT | ResizeEdge::TOP
        );
        assert_eq!(
            edges_for_point(geometry, (90.0, 90.0).into()),
            ResizeEdge::RIGHT | ResizeEdge::BOTTOM
        );
    }
}
