//! wlr-gamma-control: clients pushing gamma LUTs per output.
//!
//! The LUT lands in the backend on the next frame; a failed commit (or an
//! output that cannot do gamma at all) invalidates the client's control by
//! sending `failed`.

use std::collections::HashMap;
use std::io::Read;
use std::os::fd::OwnedFd;

use smithay::output::Output;
use smithay::reexports::wayland_protocols_wlr::gamma_control::v1::server::{
    zwlr_gamma_control_manager_v1::{self, ZwlrGammaControlManagerV1},
    zwlr_gamma_control_v1::{self, ZwlrGammaControlV1},
};
use smithay::reexports::wayland_server::backend::GlobalId;
use smithay::reexports::wayland_server::{
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New,
};

use crate::state::{Common, State};

#[derive(Debug)]
pub struct GammaControlState {
    _global: GlobalId,
    /// Live controls, one per output at most, with the LUT size advertised
    /// to each.
    controls: HashMap<Output, (ZwlrGammaControlV1, u32)>,
}

impl GammaControlState {
    pub fn new(dh: &DisplayHandle) -> Self {
        let global = dh.create_global::<State, ZwlrGammaControlManagerV1, _>(1, ());
        Self {
            _global: global,
            controls: HashMap::new(),
        }
    }
}

/// Tell the client its gamma control no longer works (failed commit,
/// output gone).
pub fn notify_gamma_failed(common: &mut Common, output: &Output) {
    if let Some((control, _)) = common.gamma_control_state.controls.remove(output) {
        control.failed();
    }
}

impl GlobalDispatch<ZwlrGammaControlManagerV1, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZwlrGammaControlManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }

    fn can_view(client: Client, _global_data: &()) -> bool {
        // Privileged: hidden from sandboxed (security-context) clients.
        client
            .get_data::<crate::state::ClientState>()
            .is_none_or(|data| data.security_context.is_none())
    }
}

impl Dispatch<ZwlrGammaControlManagerV1, ()> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        _manager: &ZwlrGammaControlManagerV1,
        request: zwlr_gamma_control_manager_v1::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwlr_gamma_control_manager_v1::Request::GetGammaControl { id, output } => {
                let Some(output) = Output::from_resource(&output) else {
                    let control = data_init.init(id, Option::<Output>::None);
                    control.failed();
                    return;
                };

                let gamma_size = state.gamma_size_for(&output);
                let Some(gamma_size) = gamma_size else {
                    let control = data_init.init(id, Option::<Output>::None);
                    control.failed();
                    return;
                };

                // One control per output; a second claimant loses.
                if state
                    .common
                    .gamma_control_state
                    .controls
                    .contains_key(&output)
                {
                    let control = data_init.init(id, Option::<Output>::None);
                    control.failed();
                    return;
                }

                let control = data_init.init(id, Some(output.clone()));
                control.gamma_size(gamma_size);
                state
                    .common
                    .gamma_control_state
                    .controls
                    .insert(output, (control, gamma_size));
            }
            zwlr_gamma_control_manager_v1::Request::Destroy => {}
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwlrGammaControlV1, Option<Output>> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        control: &ZwlrGammaControlV1,
        request: zwlr_gamma_control_v1::Request,
        data: &Option<Output>,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(output) = data else { return };
        match request {
            zwlr_gamma_control_v1::Request::SetGamma { fd } => {
                let Some((_, size)) = state.common.gamma_control_state.controls.get(output)
                else {
                    control.failed();
                    return;
                };
                match read_gamma_ramp(fd, *size) {
                    Ok(ramp) => {
                        if !state.set_gamma_ramp(output, Some(ramp)) {
                            notify_gamma_failed(&mut state.common, output);
                        } else {
                            state.queue_redraw(output);
                        }
                    }
                    Err(err) => {
                        debug!(?err, "Invalid gamma ramp from client");
                        notify_gamma_failed(&mut state.common, output);
                    }
                }
            }
            zwlr_gamma_control_v1::Request::Destroy => {
                state.common.gamma_control_state.controls.remove(output);
                let _ = state.set_gamma_ramp(output, None);
                state.queue_redraw(output);
            }
            _ => unreachable!(),
        }
    }
}

fn read_gamma_ramp(fd: OwnedFd, size: u32) -> anyhow::Result<Vec<u16>> {
    let len = size as usize * 3 * 2;
    let mut bytes = vec![0u8; len];
    let mut file = std::fs::File::from(fd);
    file.read_exact(&mut bytes)?;
    let ramp = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    Ok(ramp)
}

impl State {
    fn gamma_size_for(&mut self, output: &Output) -> Option<u32> {
        match &self.backend {
            #[cfg(feature = "udev-backend")]
            #[allow(irrefutable_let_patterns)]
            crate::backend::Backend::Udev(data) => {
                crate::backend::udev::gamma_size_for_output(data, output)
            }
            #[cfg(feature = "winit-backend")]
            #[allow(irrefutable_let_patterns)]
            crate::backend::Backend::Winit(_) => None,
        }
    }

    fn set_gamma_ramp(&mut self, output: &Output, ramp: Option<Vec<u16>>) -> bool {
        match &mut self.backend {
            #[cfg(feature = "udev-backend")]
            #[allow(irrefutable_let_patterns)]
            crate::backend::Backend::Udev(data) => {
                let accepted = crate::backend::udev::set_pending_gamma(data, output, ramp);
                if accepted {
                    if let Some(node) = self.common.output_node(output) {
                        self.common.tree.output_mut(node).gamma_lut_changed = true;
                    }
                }
                accepted
            }
            #[cfg(feature = "winit-backend")]
            #[allow(irrefutable_let_patterns)]
            crate::backend::Backend::Winit(_) => false,
        }
    }
}
