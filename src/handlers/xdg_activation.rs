//! xdg-activation: clients asking for focus with a token.

use smithay::delegate_xdg_activation;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::wayland::xdg_activation::{
    XdgActivationHandler, XdgActivationState, XdgActivationToken, XdgActivationTokenData,
};

use crate::state::State;
use crate::tree::container;

impl XdgActivationHandler for State {
    fn activation_state(&mut self) -> &mut XdgActivationState {
        &mut self.common.xdg_activation_state
    }

    fn token_created(&mut self, _token: XdgActivationToken, data: XdgActivationTokenData) -> bool {
        // A token is trustworthy when it was minted from a recent input
        // serial on our seat.
        data.serial.is_some_and(|(serial, seat)| {
            smithay::input::Seat::<State>::from_resource(&seat)
                .is_some_and(|seat| seat == self.common.seat.smithay)
                && self
                    .common
                    .seat
                    .smithay
                    .get_keyboard()
                    .is_some_and(|keyboard| keyboard.last_enter().is_some_and(|s| serial >= s))
        })
    }

    fn request_activation(
        &mut self,
        _token: XdgActivationToken,
        token_data: XdgActivationTokenData,
        surface: WlSurface,
    ) {
        let Some(node) = self.common.container_for_surface(&surface) else {
            return;
        };

        if token_data.serial.is_some() {
            // Validated token: focus the container.
            let leaf = container::leaf_toward_focus(&self.common.tree, node);
            self.set_focus(Some(leaf));
            self.commit_dirty();
        } else {
            // Stale or missing serial: only flag urgency.
            if let Some(view) = self.common.tree.container_mut(node).view.as_mut() {
                view.urgent = true;
            }
            self.common.tree.set_dirty(node);
            self.commit_dirty_client();
        }
    }
}

delegate_xdg_activation!(State);
