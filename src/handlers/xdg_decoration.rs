//! xdg-decoration: the CSD/SSD negotiation, mapped onto the container
//! border policy.

use smithay::delegate_xdg_decoration;
use smithay::reexports::wayland_protocols::xdg::decoration::zv1::server::zxdg_toplevel_decoration_v1::Mode;
use smithay::wayland::shell::xdg::decoration::XdgDecorationHandler;
use smithay::wayland::shell::xdg::ToplevelSurface;

use crate::state::State;
use crate::tree::container::Border;

impl XdgDecorationHandler for State {
    fn new_decoration(&mut self, toplevel: ToplevelSurface) {
        // Server-side by default; the border policy already is.
        toplevel.with_pending_state(|state| {
            state.decoration_mode = Some(Mode::ServerSide);
        });
        toplevel.send_pending_configure();
    }

    fn request_mode(&mut self, toplevel: ToplevelSurface, mode: Mode) {
        toplevel.with_pending_state(|state| {
            state.decoration_mode = Some(mode);
        });
        toplevel.send_pending_configure();

        if let Some(node) = self.common.container_for_surface(toplevel.wl_surface()) {
            let border = match mode {
                Mode::ClientSide => Border::Csd,
                _ => Border::Normal,
            };
            if self.common.tree.container(node).pending.border != border {
                self.common.tree.container_mut(node).pending.border = border;
                self.common.tree.set_dirty(node);
                crate::tree::arrange::arrange_root(&mut self.common.tree, &self.common.config);
                self.commit_dirty();
            }
        }
    }

    fn unset_mode(&mut self, toplevel: ToplevelSurface) {
        self.request_mode(toplevel, Mode::ServerSide);
    }
}

delegate_xdg_decoration!(State);
