//! Keyboard focus target: the one enum the seat's keyboard can point at.

use std::borrow::Cow;

use smithay::desktop::{LayerSurface, PopupKind};
use smithay::input::keyboard::{KeyboardTarget, KeysymHandle, ModifiersState};
use smithay::input::Seat;
use smithay::reexports::wayland_server::backend::ObjectId;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::utils::{IsAlive, Serial};
use smithay::wayland::seat::WaylandFocus;
use smithay::wayland::session_lock::LockSurface;

use crate::state::State;

#[derive(Clone, Debug, PartialEq)]
pub enum KeyboardFocusTarget {
    /// The toplevel surface of a focused view.
    View(WlSurface),
    LayerSurface(LayerSurface),
    LockSurface(LockSurface),
    Popup(PopupKind),
}

impl KeyboardFocusTarget {
    fn surface(&self) -> &WlSurface {
        match self {
            Self::View(surface) => surface,
            Self::LayerSurface(layer) => layer.wl_surface(),
            Self::LockSurface(lock) => lock.wl_surface(),
            Self::Popup(popup) => popup.wl_surface(),
        }
    }
}

impl From<LayerSurface> for KeyboardFocusTarget {
    fn from(value: LayerSurface) -> Self {
        Self::LayerSurface(value)
    }
}

impl From<LockSurface> for KeyboardFocusTarget {
    fn from(value: LockSurface) -> Self {
        Self::LockSurface(value)
    }
}

impl WaylandFocus for KeyboardFocusTarget {
    fn wl_surface(&self) -> Option<Cow<'_, WlSurface>> {
        Some(Cow::Borrowed(self.surface()))
    }

    fn same_client_as(&self, object_id: &ObjectId) -> bool {
        self.surface().same_client_as(object_id)
    }
}

impl IsAlive for KeyboardFocusTarget {
    fn alive(&self) -> bool {
        match self {
            Self::View(surface) => surface.alive(),
            Self::LayerSurface(layer) => layer.alive(),
            Self::LockSurface(lock) => lock.alive(),
            Self::Popup(popup) => popup.alive(),
        }
    }
}

impl KeyboardTarget<State> for KeyboardFocusTarget {
    fn enter(
        &self,
        seat: &Seat<State>,
        data: &mut State,
        keys: Vec<KeysymHandle<'_>>,
        serial: Serial,
    ) {
        KeyboardTarget::enter(self.surface(), seat, data, keys, serial);
    }

    fn leave(&self, seat: &Seat<State>, data: &mut State, serial: Serial) {
        KeyboardTarget::leave(self.surface(), seat, data, serial);
    }

    fn key(
        &self,
        seat: &Seat<State>,
        data: &mut State,
        key: KeysymHandle<'_>,
        state: smithay::backend::input::KeyState,
        serial: Serial,
        time: u32,
    ) {
        KeyboardTarget::key(self.surface(), seat, data, key, state, serial, time);
    }

    fn modifiers(
        &self,
        seat: &Seat<State>,
        data: &mut State,
        modifiers: ModifiersState,
        serial: Serial,
    ) {
        KeyboardTarget::modifiers(self.surface(), seat, data, modifiers, serial);
    }
}
