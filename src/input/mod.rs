//! Input device management and event routing.
//!
//! Every backend input event lands in [`State::process_input_event`]. The
//! pointer path resolves constraints, clamps the cursor to the output
//! layout, then hands the event to the active seat-op; the keyboard path
//! forwards keys to the focused surface; touch and tablet route through
//! their seat handles with the seat-op getting the first look.

use smithay::backend::input::{
    AbsolutePositionEvent, Axis, AxisSource, Device, DeviceCapability, Event, InputBackend,
    InputEvent, KeyboardKeyEvent, PointerAxisEvent, PointerButtonEvent, PointerMotionEvent,
    TouchEvent,
};
use smithay::input::keyboard::FilterResult;
use smithay::input::pointer::{
    AxisFrame, ButtonEvent, GestureHoldBeginEvent, GestureHoldEndEvent, GesturePinchBeginEvent,
    GesturePinchEndEvent, GesturePinchUpdateEvent, GestureSwipeBeginEvent, GestureSwipeEndEvent,
    GestureSwipeUpdateEvent, RelativeMotionEvent,
};
use smithay::utils::{Logical, Point, SERIAL_COUNTER};
use smithay::wayland::pointer_constraints::{with_pointer_constraint, PointerConstraint};
use smithay::wayland::tablet_manager::{TabletDescriptor, TabletSeatTrait};

use crate::state::State;

pub mod cursor;
pub mod seat;
pub mod seatop;
pub mod tablet;

impl State {
    pub fn process_input_event<B: InputBackend>(&mut self, event: InputEvent<B>) {
        match event {
            InputEvent::DeviceAdded { device } => {
                if device.has_capability(DeviceCapability::TabletTool) {
                    self.common
                        .seat
                        .smithay
                        .tablet_seat()
                        .add_tablet::<Self>(&self.common.display_handle, &TabletDescriptor::from(&device));
                }
                if device.has_capability(DeviceCapability::Touch)
                    && self.common.seat.smithay.get_touch().is_none()
                {
                    self.common.seat.smithay.add_touch();
                }
            }
            InputEvent::DeviceRemoved { device } => {
                if device.has_capability(DeviceCapability::TabletTool) {
                    let tablet_seat = self.common.seat.smithay.tablet_seat();
                    tablet_seat.remove_tablet(&TabletDescriptor::from(&device));
                    if tablet_seat.count_tablets() == 0 {
                        tablet_seat.clear_tools();
                    }
                }
            }
            InputEvent::Keyboard { event } => {
                let Some(keyboard) = self.common.seat.smithay.get_keyboard() else {
                    return;
                };
                self.notify_activity();
                let serial = SERIAL_COUNTER.next_serial();
                let time = event.time_msec();
                // Bindings are the outer shell's concern; the core forwards
                // every key to the focused client.
                keyboard.input::<(), _>(
                    self,
                    event.key_code(),
                    event.state(),
                    serial,
                    time,
                    |_, _, _| FilterResult::Forward,
                );
            }
            InputEvent::PointerMotion { event } => self.on_pointer_motion::<B>(event),
            InputEvent::PointerMotionAbsolute { event } => {
                self.notify_activity();
                let output_geometry = self.active_output_geometry();
                let location =
                    event.position_transformed(output_geometry.size) + output_geometry.loc.to_f64();
                self.common.cursor.location = location;
                seatop::pointer_motion(self, event.time_msec());
                self.activate_pointer_constraint();
            }
            InputEvent::PointerButton { event } => {
                self.notify_activity();
                let state = event.state();
                let button = event.button_code();
                match state {
                    smithay::backend::input::ButtonState::Pressed => {
                        self.common.cursor.press_button(button);
                    }
                    smithay::backend::input::ButtonState::Released => {
                        self.common.cursor.release_button(button);
                    }
                }
                let button_event = ButtonEvent {
                    serial: SERIAL_COUNTER.next_serial(),
                    time: event.time_msec(),
                    button,
                    state,
                };
                seatop::button(self, &button_event);
            }
            InputEvent::PointerAxis { event } => {
                self.notify_activity();
                let horizontal_discrete = event.amount_v120(Axis::Horizontal);
                let vertical_discrete = event.amount_v120(Axis::Vertical);
                let horizontal = event
                    .amount(Axis::Horizontal)
                    .unwrap_or_else(|| horizontal_discrete.unwrap_or(0.0) * 3.0 / 120.0);
                let vertical = event
                    .amount(Axis::Vertical)
                    .unwrap_or_else(|| vertical_discrete.unwrap_or(0.0) * 3.0 / 120.0);

                let mut frame = AxisFrame::new(event.time_msec()).source(event.source());
                if horizontal != 0.0 {
                    frame = frame.value(Axis::Horizontal, horizontal);
                    if let Some(discrete) = horizontal_discrete {
                        frame = frame.v120(Axis::Horizontal, discrete as i32);
                    }
                }
                if vertical != 0.0 {
                    frame = frame.value(Axis::Vertical, vertical);
                    if let Some(discrete) = vertical_discrete {
                        frame = frame.v120(Axis::Vertical, discrete as i32);
                    }
                }
                if event.source() == AxisSource::Finger {
                    if event.amount(Axis::Horizontal) == Some(0.0) {
                        frame = frame.stop(Axis::Horizontal);
                    }
                    if event.amount(Axis::Vertical) == Some(0.0) {
                        frame = frame.stop(Axis::Vertical);
                    }
                }
                seatop::pointer_axis(self, frame);
            }
            InputEvent::TouchDown { event } => {
                self.notify_activity();
                let position = self.transform_absolute_position::<B, _>(&event);
                seatop::touch_down(self, event.slot(), position, event.time_msec());
            }
            InputEvent::TouchMotion { event } => {
                let position = self.transform_absolute_position::<B, _>(&event);
                seatop::touch_motion(self, event.slot(), position, event.time_msec());
            }
            InputEvent::TouchUp { event } => {
                seatop::touch_up(self, event.slot(), event.time_msec());
            }
            InputEvent::TouchCancel { event: _ } => {
                seatop::touch_cancel(self);
                if let Some(touch) = self.common.seat.smithay.get_touch() {
                    touch.cancel(self);
                }
            }
            InputEvent::TouchFrame { event: _ } => {
                if let Some(touch) = self.common.seat.smithay.get_touch() {
                    touch.frame(self);
                }
            }
            InputEvent::TabletToolAxis { event } => self.on_tablet_tool_axis::<B>(event),
            InputEvent::TabletToolProximity { event } => {
                self.on_tablet_tool_proximity::<B>(event);
            }
            InputEvent::TabletToolTip { event } => self.on_tablet_tool_tip::<B>(event),
            InputEvent::TabletToolButton { event } => self.on_tablet_tool_button::<B>(event),
            InputEvent::TabletPadButton { .. }
            | InputEvent::TabletPadRing { .. }
            | InputEvent::TabletPadStrip { .. } => {
                // The toolkit has no tablet-v2 pad objects to route these
                // into yet.
                debug!("Dropping tablet pad event: no toolkit pad support");
            }
            InputEvent::GestureSwipeBegin { event } => {
                let pointer = self.pointer();
                pointer.gesture_swipe_begin(
                    self,
                    &GestureSwipeBeginEvent {
                        serial: SERIAL_COUNTER.next_serial(),
                        time: event.time_msec(),
                        fingers: event.fingers(),
                    },
                );
            }
            InputEvent::GestureSwipeUpdate { event } => {
                let pointer = self.pointer();
                pointer.gesture_swipe_update(
                    self,
                    &GestureSwipeUpdateEvent {
                        time: event.time_msec(),
                        delta: event.delta(),
                    },
                );
            }
            InputEvent::GestureSwipeEnd { event } => {
                let pointer = self.pointer();
                pointer.gesture_swipe_end(
                    self,
                    &GestureSwipeEndEvent {
                        serial: SERIAL_COUNTER.next_serial(),
                        time: event.time_msec(),
                        cancelled: event.cancelled(),
                    },
                );
            }
            InputEvent::GesturePinchBegin { event } => {
                let pointer = self.pointer();
                pointer.gesture_pinch_begin(
                    self,
                    &GesturePinchBeginEvent {
                        serial: SERIAL_COUNTER.next_serial(),
                        time: event.time_msec(),
                        fingers: event.fingers(),
                    },
                );
            }
            InputEvent::GesturePinchUpdate { event } => {
                let pointer = self.pointer();
                pointer.gesture_pinch_update(
                    self,
                    &GesturePinchUpdateEvent {
                        time: event.time_msec(),
                        delta: event.delta(),
                        scale: event.scale(),
                        rotation: event.rotation(),
                    },
                );
            }
            InputEvent::GesturePinchEnd { event } => {
                let pointer = self.pointer();
                pointer.gesture_pinch_end(
                    self,
                    &GesturePinchEndEvent {
                        serial: SERIAL_COUNTER.next_serial(),
                        time: event.time_msec(),
                        cancelled: event.cancelled(),
                    },
                );
            }
            InputEvent::GestureHoldBegin { event } => {
                let pointer = self.pointer();
                pointer.gesture_hold_begin(
                    self,
                    &GestureHoldBeginEvent {
                        serial: SERIAL_COUNTER.next_serial(),
                        time: event.time_msec(),
                        fingers: event.fingers(),
                    },
                );
            }
            InputEvent::GestureHoldEnd { event } => {
                let pointer = self.pointer();
                pointer.gesture_hold_end(
                    self,
                    &GestureHoldEndEvent {
                        serial: SERIAL_COUNTER.next_serial(),
                        time: event.time_msec(),
                        cancelled: event.cancelled(),
                    },
                );
            }
            _ => {}
        }
    }

    fn on_pointer_motion<B: InputBackend>(&mut self, event: B::PointerMotionEvent) {
        self.notify_activity();
        let pointer = self.pointer();
        let location = self.common.cursor.location;
        let under = cursor::node_at_coords(&self.common.tree, location);

        // An active constraint on the hovered surface limits where the
        // pointer may go: a lock pins it, a confine region fences it.
        let mut pointer_locked = false;
        let mut confine_region = None;
        let under_surface = under.as_ref().and_then(|hit| match &hit.target {
            cursor::HitTarget::View { surface, .. }
            | cursor::HitTarget::Layer(surface)
            | cursor::HitTarget::LockSurface(surface)
            | cursor::HitTarget::Popup(surface) => {
                Some((surface.clone(), location - hit.local))
            }
            cursor::HitTarget::Container(_) => None,
        });
        if let Some((surface, surface_loc)) = &under_surface {
            with_pointer_constraint(surface, &pointer, |constraint| match constraint {
                Some(constraint) if constraint.is_active() => {
                    if !constraint.region().is_none_or(|region| {
                        region.contains((location - *surface_loc).to_i32_round())
                    }) {
                        return;
                    }
                    match &*constraint {
                        PointerConstraint::Locked(_) => pointer_locked = true,
                        PointerConstraint::Confined(confine) => {
                            confine_region = confine.region().cloned();
                        }
                    }
                }
                _ => {}
            });
        }

        pointer.relative_motion(
            self,
            under_surface.clone(),
            &RelativeMotionEvent {
                delta: event.delta(),
                delta_unaccel: event.delta_unaccel(),
                utime: event.time(),
            },
        );

        if pointer_locked {
            pointer.frame(self);
            return;
        }

        let new_location = self.clamp_to_outputs(location + event.delta());

        // A confine region keeps the pointer on the constrained surface.
        if confine_region.is_some() {
            if let Some((surface, surface_loc)) = &under_surface {
                let new_under = cursor::node_at_coords(&self.common.tree, new_location);
                let same_surface = new_under.as_ref().is_some_and(|hit| match &hit.target {
                    cursor::HitTarget::View { surface: s, .. }
                    | cursor::HitTarget::Layer(s)
                    | cursor::HitTarget::LockSurface(s)
                    | cursor::HitTarget::Popup(s) => s == surface,
                    cursor::HitTarget::Container(_) => false,
                });
                if !same_surface
                    || confine_region.is_some_and(|region| {
                        !region.contains((new_location - *surface_loc).to_i32_round())
                    })
                {
                    pointer.frame(self);
                    return;
                }
            }
        }

        self.common.cursor.location = new_location;
        seatop::pointer_motion(self, event.time_msec());
        self.activate_pointer_constraint();
    }

    /// Keep the cursor somewhere on an output.
    fn clamp_to_outputs(&self, location: Point<f64, Logical>) -> Point<f64, Logical> {
        if crate::tree::root::output_at(&self.common.tree, location).is_some() {
            return location;
        }
        let geometry = self.active_output_geometry();
        Point::from((
            location.x.clamp(
                f64::from(geometry.loc.x),
                f64::from(geometry.loc.x + geometry.size.w - 1),
            ),
            location.y.clamp(
                f64::from(geometry.loc.y),
                f64::from(geometry.loc.y + geometry.size.h - 1),
            ),
        ))
    }

    /// Map an absolute device position onto the active output's box.
    fn transform_absolute_position<B: InputBackend, E: AbsolutePositionEvent<B>>(
        &self,
        event: &E,
    ) -> Point<f64, Logical> {
        let geometry = self.active_output_geometry();
        event.position_transformed(geometry.size) + geometry.loc.to_f64()
    }

    /// Activate the pointer constraint of the surface under the cursor, if
    /// its client is focused there.
    pub fn activate_pointer_constraint(&mut self) {
        let pointer = self.pointer();
        let location = self.common.cursor.location;
        let Some(hit) = cursor::node_at_coords(&self.common.tree, location) else {
            return;
        };
        let surface = match &hit.target {
            cursor::HitTarget::View { surface, .. } | cursor::HitTarget::Layer(surface) => {
                surface.clone()
            }
            _ => return,
        };
        with_pointer_constraint(&surface, &pointer, |constraint| {
            if let Some(constraint) = constraint {
                if !constraint.is_active() {
                    let region_ok = constraint
                        .region()
                        .is_none_or(|region| region.contains(hit.local.to_i32_round()));
                    if region_ok {
                        constraint.activate();
                    }
                }
            }
        });
    }
}
