//! ext-session-lock: full-seat takeover by a lock client.
//!
//! While locked, each output carries an opaque backdrop in its session_lock
//! scene layer (black normally, red once the lock client died without
//! unlocking) and keyboard focus belongs to the lock surfaces alone. An
//! abandoned lock persists until another client replaces it.

use smithay::delegate_session_lock;
use smithay::output::Output;
use smithay::reexports::wayland_server::protocol::wl_output::WlOutput;
use smithay::utils::IsAlive;
use smithay::wayland::compositor::{send_surface_state, with_states};
use smithay::wayland::fractional_scale::with_fractional_scale;
use smithay::wayland::session_lock::{
    LockSurface, SessionLockHandler, SessionLocker, SessionLockManagerState,
};

use crate::focus_target::KeyboardFocusTarget;
use crate::scene::{Color, SceneDescriptor};
use crate::state::{LockState, State};
use crate::tree::NodeId;

const LOCKED_BACKDROP_COLOR: Color = [0.0, 0.0, 0.0, 1.0];
const ABANDONED_BACKDROP_COLOR: Color = [0.55, 0.05, 0.05, 1.0];

impl SessionLockHandler for State {
    fn lock_state(&mut self) -> &mut SessionLockManagerState {
        &mut self.common.session_lock_manager_state
    }

    fn lock(&mut self, locker: SessionLocker) {
        // A live lock refuses replacement; an abandoned one yields (S4).
        match &self.common.lock_state {
            LockState::Locked { abandoned: false } | LockState::Pending(_) => {
                debug!("Denying session lock: already locked");
                return;
            }
            LockState::Locked { abandoned: true } => {
                info!("Replacing abandoned session lock");
            }
            LockState::Unlocked => {}
        }

        // Clear seat focus; only the lock client may talk to the keyboard.
        self.common.seat.focused_layer = None;
        if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
            keyboard.set_focus(self, None, smithay::utils::SERIAL_COUNTER.next_serial());
        }

        // Grow a backdrop on every output, then confirm.
        let outputs: Vec<NodeId> = self.common.tree.root_node().outputs.clone();
        for node in outputs {
            ensure_backdrop(self, node, LOCKED_BACKDROP_COLOR);
        }
        locker.lock();
        self.common.lock_state = LockState::Locked { abandoned: false };
        self.queue_redraw_all();
    }

    fn unlock(&mut self) {
        info!("Session unlocked");
        self.common.lock_state = LockState::Unlocked;

        let outputs: Vec<NodeId> = self.common.tree.root_node().outputs.clone();
        for node in outputs {
            remove_backdrop_and_surface(self, node);
        }

        // Each seat returns to what it focused before the lock.
        self.refocus_from_stack();
        self.queue_redraw_all();
    }

    fn new_surface(&mut self, lock_surface: LockSurface, wl_output: WlOutput) {
        let Some(output) = Output::from_resource(&wl_output) else {
            return;
        };
        let Some(node) = self.common.output_node(&output) else {
            return;
        };

        let output_size = self.common.tree.output(node).geometry().size;
        lock_surface.with_pending_state(|state| {
            state.size = Some((output_size.w as u32, output_size.h as u32).into());
        });
        let scale = output.current_scale();
        let transform = output.current_transform();
        let wl_surface = lock_surface.wl_surface();
        with_states(wl_surface, |data| {
            send_surface_state(wl_surface, data, scale.integer_scale(), transform);
            with_fractional_scale(data, |fractional| {
                fractional.set_preferred_scale(scale.fractional_scale());
            });
        });
        lock_surface.send_configure();

        // Scene: the lock surface sits above the backdrop in the lock layer.
        let layer = self.common.tree.output(node).layers.session_lock;
        let surface = wl_surface.clone();
        let leaf = self.common.tree.scene.create_surface(layer, surface.clone());
        self.common
            .tree
            .scene
            .set_surface_size(leaf, output_size);
        self.common
            .tree
            .scene
            .set_descriptor(leaf, SceneDescriptor::LockSurface(surface));

        self.common.tree.output_mut(node).lock_surface = Some(lock_surface.clone());

        // The lock surface of the active output takes the keyboard.
        self.common.seat.has_keyboard_focus = true;
        if let Some(keyboard) = self.common.seat.smithay.get_keyboard() {
            keyboard.set_focus(
                self,
                Some(KeyboardFocusTarget::from(lock_surface)),
                smithay::utils::SERIAL_COUNTER.next_serial(),
            );
        }
        self.queue_redraw(&output);
    }
}

impl State {
    /// Detect a lock client that died without unlocking: its lock surfaces
    /// go away, the takeover stays, the backdrops turn red.
    pub fn check_lock_abandoned(&mut self) {
        if !matches!(
            self.common.lock_state,
            LockState::Locked { abandoned: false }
        ) {
            return;
        }
        let any_alive = self
            .common
            .tree
            .root_node()
            .all_outputs
            .iter()
            .filter_map(|&node| self.common.tree.output(node).lock_surface.as_ref())
            .any(|surface| surface.wl_surface().alive());
        let ever_had_surface = self
            .common
            .tree
            .root_node()
            .all_outputs
            .iter()
            .any(|&node| self.common.tree.output(node).lock_surface.is_some());

        if ever_had_surface && !any_alive {
            warn!("Session lock abandoned; holding the lock with a red backdrop");
            self.common.lock_state = LockState::Locked { abandoned: true };
            let outputs: Vec<NodeId> = self.common.tree.root_node().outputs.clone();
            for node in outputs {
                ensure_backdrop(self, node, ABANDONED_BACKDROP_COLOR);
            }
            self.queue_redraw_all();
        }
    }

    /// Backdrops for outputs that appeared while locked.
    pub fn lock_new_output(&mut self, node: NodeId) {
        if !self.common.is_locked() {
            return;
        }
        let color = match self.common.lock_state {
            LockState::Locked { abandoned: true } => ABANDONED_BACKDROP_COLOR,
            _ => LOCKED_BACKDROP_COLOR,
        };
        ensure_backdrop(self, node, color);
    }
}

fn ensure_backdrop(state: &mut State, node: NodeId, color: Color) {
    let size = state.common.tree.output(node).geometry().size;
    let existing = state.common.tree.output(node).lock_background;
    match existing {
        Some(rect) => {
            state.common.tree.scene.set_rect_size(rect, size);
            state.common.tree.scene.set_rect_color(rect, color);
        }
        None => {
            let layer = state.common.tree.output(node).layers.session_lock;
            let rect = state.common.tree.scene.create_rect(layer, size, color);
            state.common.tree.scene.lower_to_bottom(rect);
            state.common.tree.output_mut(node).lock_background = Some(rect);
        }
    }
}

fn remove_backdrop_and_surface(state: &mut State, node: NodeId) {
    if let Some(rect) = state.common.tree.output_mut(node).lock_background.take() {
        state.common.tree.scene.destroy(rect);
    }
    let _ = state.common.tree.output_mut(node).lock_surface.take();
    // Drop any lock-surface leaves left in the layer.
    let layer = state.common.tree.output(node).layers.session_lock;
    let children = state.common.tree.scene.get(layer).children().to_vec();
    for child in children {
        state.common.tree.scene.destroy(child);
    }
}

delegate_session_lock!(State);
