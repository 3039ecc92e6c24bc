//! Tablet tool routing.
//!
//! Tools are first-class tablet-v2 citizens: proximity registers the tool on
//! the seat, axis events carry pressure/tilt/rotation to the surface under
//! the tool, and tip down/up doubles as the button that drives focus and the
//! capture ops. The pointer mirrors tool motion so focus-follows-mouse and
//! the seat-op machine see tablet input like any other pointing device.
//!
//! Tablet *pads* (rings, strips, mode groups) have no tablet-v2 objects in
//! the toolkit yet; their backend events are dropped with a debug note in
//! the input dispatch.

use smithay::backend::input::{
    AbsolutePositionEvent, Event, InputBackend, ProximityState, TabletToolButtonEvent,
    TabletToolEvent, TabletToolProximityEvent, TabletToolTipEvent, TabletToolTipState,
};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{Logical, Point, SERIAL_COUNTER};
use smithay::wayland::tablet_manager::{TabletDescriptor, TabletSeatTrait};

use crate::input::cursor::{self, Hit, HitTarget};
use crate::input::seatop::{self, SeatOp};
use crate::state::State;
use crate::tree::container;

/// The client surface under the cursor and its scene-global origin, for
/// tool event delivery.
fn surface_under(state: &State) -> Option<(WlSurface, Point<f64, Logical>)> {
    let location = state.common.cursor.location;
    let hit = cursor::node_at_coords(&state.common.tree, location)?;
    match hit.target {
        HitTarget::View { surface, .. }
        | HitTarget::Layer(surface)
        | HitTarget::LockSurface(surface)
        | HitTarget::Popup(surface) => Some((surface, location - hit.local)),
        HitTarget::Container(_) => None,
    }
}

impl State {
    pub fn on_tablet_tool_axis<B: InputBackend>(&mut self, event: B::TabletToolAxisEvent) {
        self.notify_activity();
        let location = self.transform_absolute_position::<B, _>(&event);
        self.common.cursor.location = location;

        // The seat-op machine sees the motion first: a capture op (move,
        // resize) consumes it and clients get nothing.
        seatop::pointer_motion(self, event.time_msec());
        if !matches!(self.common.cursor.op, SeatOp::Default) {
            return;
        }

        let under = surface_under(self);
        let tablet_seat = self.common.seat.smithay.tablet_seat();
        let tablet = tablet_seat.get_tablet(&TabletDescriptor::from(&event.device()));
        let tool = tablet_seat.get_tool(&event.tool());
        if let (Some(tablet), Some(tool)) = (tablet, tool) {
            if event.pressure_has_changed() {
                tool.pressure(event.pressure());
            }
            if event.distance_has_changed() {
                tool.distance(event.distance());
            }
            if event.tilt_has_changed() {
                tool.tilt(event.tilt());
            }
            if event.slider_has_changed() {
                tool.slider_position(event.slider_position());
            }
            if event.rotation_has_changed() {
                tool.rotation(event.rotation());
            }
            if event.wheel_has_changed() {
                tool.wheel(event.wheel_delta(), event.wheel_delta_discrete());
            }
            tool.motion(
                location,
                under,
                &tablet,
                SERIAL_COUNTER.next_serial(),
                event.time_msec(),
            );
        }
    }

    pub fn on_tablet_tool_proximity<B: InputBackend>(
        &mut self,
        event: B::TabletToolProximityEvent,
    ) {
        self.notify_activity();
        let location = self.transform_absolute_position::<B, _>(&event);
        self.common.cursor.location = location;

        let dh = self.common.display_handle.clone();
        let tool_descriptor = event.tool();
        self.common
            .seat
            .smithay
            .tablet_seat()
            .add_tool::<Self>(self, &dh, &tool_descriptor);

        seatop::pointer_motion(self, event.time_msec());

        let under = surface_under(self);
        let tablet_seat = self.common.seat.smithay.tablet_seat();
        let tablet = tablet_seat.get_tablet(&TabletDescriptor::from(&event.device()));
        let tool = tablet_seat.get_tool(&tool_descriptor);
        if let (Some(under), Some(tablet), Some(tool)) = (under, tablet, tool) {
            match event.state() {
                ProximityState::In => tool.proximity_in(
                    location,
                    under,
                    &tablet,
                    SERIAL_COUNTER.next_serial(),
                    event.time_msec(),
                ),
                ProximityState::Out => tool.proximity_out(event.time_msec()),
            }
        }
    }

    pub fn on_tablet_tool_tip<B: InputBackend>(&mut self, event: B::TabletToolTipEvent) {
        self.notify_activity();
        let down = event.tip_state() == TabletToolTipState::Down;
        let time_msec = event.time_msec();

        if down {
            self.common.cursor.press_button(seatop::BTN_LEFT);
        } else {
            self.common.cursor.release_button(seatop::BTN_LEFT);
        }

        // A capture op in progress: the tip acts as its button (tip-up ends
        // move/resize like the last release).
        if !matches!(self.common.cursor.op, SeatOp::Default) {
            seatop::tablet_tool_tip(self, down, time_msec);
            return;
        }

        if down {
            let location = self.common.cursor.location;
            let hit = cursor::node_at_coords(&self.common.tree, location);
            match &hit {
                Some(Hit {
                    target: HitTarget::View { container, .. },
                    ..
                }) => {
                    let leaf = container::leaf_toward_focus(&self.common.tree, *container);
                    self.set_focus(Some(leaf));
                    self.commit_dirty();
                }
                Some(Hit {
                    target: HitTarget::Container(con),
                    local,
                }) => {
                    // Tip on server-side chrome: same triggers as a pointer
                    // press, delivered to no client.
                    let con = *con;
                    let on_title_bar = local.y < f64::from(self.common.config.title_bar_height);
                    let leaf = container::leaf_toward_focus(&self.common.tree, con);
                    self.set_focus(Some(leaf));
                    self.commit_dirty();

                    let floater = top_level(self, con);
                    if container::is_floating(&self.common.tree, floater) {
                        if on_title_bar {
                            seatop::move_floating::begin(self, floater);
                        } else {
                            let geometry =
                                self.common.tree.container(floater).pending.geometry();
                            let edges = seatop::edges_for_point(
                                geometry,
                                self.common.cursor.location,
                            );
                            seatop::resize_floating::begin(self, floater, edges);
                        }
                    }
                    return;
                }
                _ => {}
            }
        }

        if let Some(tool) = self.common.seat.smithay.tablet_seat().get_tool(&event.tool()) {
            if down {
                tool.tip_down(SERIAL_COUNTER.next_serial(), time_msec);
            } else {
                tool.tip_up(time_msec);
            }
        }
    }

    pub fn on_tablet_tool_button<B: InputBackend>(&mut self, event: B::TabletToolButtonEvent) {
        self.notify_activity();
        if let Some(tool) = self.common.seat.smithay.tablet_seat().get_tool(&event.tool()) {
            tool.button(
                event.button(),
                event.button_state(),
                SERIAL_COUNTER.next_serial(),
                event.time_msec(),
            );
        }
    }
}

fn top_level(state: &State, mut con: crate::tree::NodeId) -> crate::tree::NodeId {
    while let Some(parent) = state.common.tree.container(con).pending.parent {
        con = parent;
    }
    con
}
