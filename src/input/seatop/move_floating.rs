//! Interactive move of a floating container.

use smithay::input::pointer::{ButtonEvent, CursorIcon, CursorImageStatus};

use super::SeatOp;
use crate::state::State;
use crate::tree::{arrange, container, NodeId};

/// Anchor data: the cursor offset inside the container at grab time.
#[derive(Clone, Copy, Debug)]
pub struct Data {
    pub container: NodeId,
    pub dx: f64,
    pub dy: f64,
}

pub fn begin(state: &mut State, con: NodeId) {
    super::end(state);

    let cursor = &state.common.cursor;
    let pending = &state.common.tree.container(con).pending;
    let data = Data {
        container: con,
        dx: cursor.location.x - f64::from(pending.x),
        dy: cursor.location.y - f64::from(pending.y),
    };
    state.common.cursor.op = SeatOp::MoveFloating(data);

    container::raise_floating(&mut state.common.tree, con);
    state.commit_dirty();

    state.common.cursor.image = CursorImageStatus::Named(CursorIcon::Grabbing);
    state.clear_pointer_focus();
}

pub fn pointer_motion(state: &mut State, data: &Data) {
    let cursor = state.common.cursor.location;
    move_to(
        state,
        data.container,
        (cursor.x - data.dx) as i32,
        (cursor.y - data.dy) as i32,
    );
}

pub fn button(state: &mut State, data: &Data, _event: &ButtonEvent) {
    if state.common.cursor.pressed_button_count() == 0 {
        finalize(state, data);
    }
}

fn finalize(state: &mut State, data: &Data) {
    let (x, y) = {
        let pending = &state.common.tree.container(data.container).pending;
        (pending.x, pending.y)
    };
    move_to(state, data.container, x, y);
    state.common.cursor.op = SeatOp::Default;
    state.common.cursor.image = CursorImageStatus::Named(CursorIcon::Default);
    super::rebase(state, 0);
}

fn move_to(state: &mut State, con: NodeId, x: i32, y: i32) {
    container::floating_move_to(&mut state.common.tree, con, x, y);
    arrange::arrange_container(&mut state.common.tree, con, &state.common.config);
    state.commit_dirty();
}
