//! A touch point is held on a surface, or is driving the simulated pointer.

use smithay::backend::input::{ButtonState, TouchSlot};
use smithay::input::pointer::{ButtonEvent, MotionEvent};
use smithay::input::touch::{DownEvent, MotionEvent as TouchMotionEvent, UpEvent};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point, SERIAL_COUNTER};

use super::{SeatOp, BTN_LEFT};
use crate::state::State;

#[derive(Clone, Debug)]
pub struct Data {
    pub surface: WlSurface,
    /// The touch slot that owns this op; other touch points pass through.
    pub slot: TouchSlot,
    /// Scene-global origin of the surface at touch-down time.
    pub surface_origin: Point<f64, Logical>,
    /// The surface takes no touch input; we drive the pointer instead.
    pub simulating_pointer: bool,
}

pub fn forward_down(
    state: &mut State,
    slot: TouchSlot,
    position: Point<f64, Logical>,
    time_msec: u32,
) {
    let Some(touch) = state.common.seat.smithay.get_touch() else {
        return;
    };
    let (surface, origin) = match &state.common.cursor.op {
        SeatOp::TouchDown(data) => (data.surface.clone(), data.surface_origin),
        _ => return,
    };
    touch.down(
        state,
        Some((surface, origin)),
        &DownEvent {
            slot,
            location: position,
            serial: SERIAL_COUNTER.next_serial(),
            time: time_msec,
        },
    );
}

pub fn motion(
    state: &mut State,
    data: &Data,
    slot: TouchSlot,
    position: Point<f64, Logical>,
    time_msec: u32,
) {
    if slot != data.slot {
        return;
    }

    if data.simulating_pointer {
        state.common.cursor.location = position;
        let pointer = state.pointer();
        pointer.motion(
            state,
            None,
            &MotionEvent {
                location: position,
                serial: SERIAL_COUNTER.next_serial(),
                time: time_msec,
            },
        );
        pointer.frame(state);
        return;
    }

    let Some(touch) = state.common.seat.smithay.get_touch() else {
        return;
    };
    touch.motion(
        state,
        Some((data.surface.clone(), data.surface_origin)),
        &TouchMotionEvent {
            slot,
            location: position,
            time: time_msec,
        },
    );
}

pub fn up(state: &mut State, data: &Data, slot: TouchSlot, time_msec: u32) {
    if slot != data.slot {
        return;
    }

    if data.simulating_pointer {
        state.common.cursor.simulating_pointer_from_touch = None;
        state.common.cursor.release_button(BTN_LEFT);
        let event = ButtonEvent {
            serial: SERIAL_COUNTER.next_serial(),
            time: time_msec,
            button: BTN_LEFT,
            state: ButtonState::Released,
        };
        let pointer = state.pointer();
        pointer.button(state, &event);
        pointer.frame(state);
    } else if let Some(touch) = state.common.seat.smithay.get_touch() {
        touch.up(
            state,
            &UpEvent {
                slot,
                serial: SERIAL_COUNTER.next_serial(),
                time: time_msec,
            },
        );
    }

    state.common.cursor.op = SeatOp::Default;
    super::rebase(state, time_msec);
}
