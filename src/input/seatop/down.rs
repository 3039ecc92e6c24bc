//! A button is held on a client surface: keep routing events to it until
//! every button lifts, even if the pointer wanders off the surface.

use smithay::input::pointer::{ButtonEvent, MotionEvent};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point};

use super::SeatOp;
use crate::state::State;
use crate::tree::NodeId;

#[derive(Clone, Debug)]
pub struct Data {
    /// Container the press landed in, if it was a view (drives unref).
    pub container: Option<NodeId>,
    pub surface: WlSurface,
    /// Scene-global origin of the surface at press time.
    pub surface_origin: Point<f64, Logical>,
}

pub fn button(state: &mut State, _data: &Data, event: &ButtonEvent) {
    let pointer = state.pointer();
    pointer.button(state, event);
    pointer.frame(state);

    if state.common.cursor.pressed_button_count() == 0 {
        state.common.cursor.op = SeatOp::Default;
        super::rebase(state, event.time);
    }
}

pub fn pointer_motion(state: &mut State, data: &Data, time_msec: u32) {
    let location = state.common.cursor.location;
    let pointer = state.pointer();
    pointer.motion(
        state,
        Some((data.surface.clone(), data.surface_origin)),
        &MotionEvent {
            location,
            serial: smithay::utils::SERIAL_COUNTER.next_serial(),
            time: time_msec,
        },
    );
    pointer.frame(state);
}
