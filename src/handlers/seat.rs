//! wl_seat plumbing: focus side effects and cursor images.

use std::borrow::Cow;

use smithay::delegate_seat;
use smithay::input::pointer::CursorImageStatus;
use smithay::input::{Seat, SeatHandler, SeatState};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::Resource;
use smithay::wayland::seat::WaylandFocus;
use smithay::wayland::selection::data_device::set_data_device_focus;
use smithay::wayland::selection::primary_selection::set_primary_focus;
use smithay::wayland::text_input::TextInputSeatTrait;

use crate::focus_target::KeyboardFocusTarget;
use crate::state::State;

impl SeatHandler for State {
    type KeyboardFocus = KeyboardFocusTarget;
    type PointerFocus = WlSurface;
    type TouchFocus = WlSurface;

    fn seat_state(&mut self) -> &mut SeatState<Self> {
        &mut self.common.seat_state
    }

    fn focus_changed(&mut self, seat: &Seat<Self>, target: Option<&KeyboardFocusTarget>) {
        let dh = &self.common.display_handle;
        let wl_surface = target.and_then(WaylandFocus::wl_surface).map(Cow::into_owned);

        // Selections follow keyboard focus.
        let client = wl_surface
            .as_ref()
            .and_then(|surface| dh.get_client(surface.id()).ok());
        set_data_device_focus(dh, seat, client.clone());
        set_primary_focus(dh, seat, client);

        // So does text input: moving its focus emits enter/leave on the
        // text-input objects, which is what activates and deactivates the
        // input method for the new surface.
        let text_input = seat.text_input();
        text_input.set_focus(wl_surface.as_ref());
    }

    fn cursor_image(&mut self, _seat: &Seat<Self>, image: CursorImageStatus) {
        if self.common.cursor.op.allows_set_cursor() {
            self.common.cursor.image = image;
        }
    }

    fn led_state_changed(
        &mut self,
        _seat: &Seat<Self>,
        led_state: smithay::input::keyboard::LedState,
    ) {
        let _ = led_state;
    }
}

delegate_seat!(State);
