//! Backends: where outputs and input devices come from.

use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::output::Output;
use smithay::wayland::dmabuf::ImportNotifier;

use crate::output_config::PendingOutputState;
use crate::state::{Common, State};

#[cfg(feature = "udev-backend")]
pub mod udev;
#[cfg(feature = "winit-backend")]
pub mod winit;

pub enum Backend {
    #[cfg(feature = "winit-backend")]
    Winit(winit::WinitData),
    #[cfg(feature = "udev-backend")]
    Udev(udev::UdevData),
}

#[cfg(feature = "winit-backend")]
impl From<winit::WinitData> for Backend {
    fn from(value: winit::WinitData) -> Self {
        Self::Winit(value)
    }
}

#[cfg(feature = "udev-backend")]
impl From<udev::UdevData> for Backend {
    fn from(value: udev::UdevData) -> Self {
        Self::Udev(value)
    }
}

impl Backend {
    #[cfg(feature = "winit-backend")]
    pub fn winit(&mut self) -> &mut winit::WinitData {
        #[allow(irrefutable_let_patterns)]
        if let Self::Winit(data) = self {
            return data;
        }
        unreachable!("Tried to get winit backend data on non-winit backend")
    }

    #[cfg(feature = "udev-backend")]
    pub fn udev(&mut self) -> &mut udev::UdevData {
        #[allow(irrefutable_let_patterns)]
        if let Self::Udev(data) = self {
            return data;
        }
        unreachable!("Tried to get udev backend data on non-udev backend")
    }

    /// Render one output now.
    pub fn render(&mut self, common: &mut Common, output: &Output) -> anyhow::Result<bool> {
        match self {
            #[cfg(feature = "winit-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Winit(data) => data.render(common),
            #[cfg(feature = "udev-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Udev(data) => data.render(common, output),
        }
    }

    /// Test or commit a whole set of desired output states atomically.
    /// `test_only` leaves every output untouched. Failure keeps the previous
    /// state on all outputs.
    pub fn apply_output_states(
        &mut self,
        common: &mut Common,
        states: &[PendingOutputState],
        test_only: bool,
    ) -> anyhow::Result<()> {
        match self {
            #[cfg(feature = "winit-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Winit(data) => data.apply_output_states(common, states, test_only),
            #[cfg(feature = "udev-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Udev(data) => data.apply_output_states(common, states, test_only),
        }
    }

    pub fn dmabuf_imported(&mut self, dmabuf: &Dmabuf, notifier: ImportNotifier) {
        match self {
            #[cfg(feature = "winit-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Winit(data) => data.dmabuf_imported(dmabuf, notifier),
            #[cfg(feature = "udev-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Udev(data) => data.dmabuf_imported(dmabuf, notifier),
        }
    }

    pub fn early_import(&mut self, surface: &smithay::reexports::wayland_server::protocol::wl_surface::WlSurface) {
        match self {
            #[cfg(feature = "winit-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Winit(_) => (),
            #[cfg(feature = "udev-backend")]
            #[allow(irrefutable_let_patterns)]
            Self::Udev(data) => data.early_import(surface),
        }
    }
}

/// Run the full output-configuration pipeline (§ output pipeline): matched
/// configs, per-output state resolution, swapchain-aware test, atomic
/// commit, then finalize positions/scales and re-arrange.
impl State {
    pub fn reconfigure_outputs(&mut self) {
        let matched =
            crate::output_config::build_matched_configs(&self.common.tree, &self.common.config);
        if matched.is_empty() {
            return;
        }

        let states: Vec<PendingOutputState> = {
            let common = &self.common;
            matched
                .iter()
                .map(|entry| {
                    let (modes, preferred, orientation) = match &self.backend {
                        #[cfg(feature = "winit-backend")]
                        #[allow(irrefutable_let_patterns)]
                        Backend::Winit(data) => (data.available_modes(), data.preferred_mode(), None),
                        #[cfg(feature = "udev-backend")]
                        #[allow(irrefutable_let_patterns)]
                        Backend::Udev(data) => data.connector_modes(common, entry.output),
                    };
                    crate::output_config::resolve_output_state(
                        &common.tree,
                        entry,
                        &modes,
                        preferred,
                        orientation,
                    )
                })
                .collect()
        };

        if let Err(err) = self
            .backend
            .apply_output_states(&mut self.common, &states, false)
        {
            // Tolerated: outputs keep their previous state.
            error!(?err, "Output configuration failed, keeping previous state");
            return;
        }

        self.finalize_output_states(&states);
    }

    fn finalize_output_states(&mut self, states: &[PendingOutputState]) {
        for pending in states {
            if !self.common.tree.exists(pending.output) {
                continue;
            }
            let (output, was_enabled) = {
                let node = self.common.tree.output(pending.output);
                (node.output.clone(), node.enabled)
            };

            if !pending.enabled {
                if was_enabled {
                    crate::tree::output::disable(&mut self.common.tree, pending.output);
                }
                continue;
            }

            let mode = match pending.mode {
                Some(crate::output_config::ModeRequest::Fixed(mode)) => Some(mode),
                Some(crate::output_config::ModeRequest::Custom { size, refresh_mhz }) => {
                    Some(smithay::output::Mode {
                        size,
                        refresh: if refresh_mhz > 0 { refresh_mhz } else { 60_000 },
                    })
                }
                None => None,
            };
            output.change_current_state(
                mode,
                Some(pending.transform),
                Some(smithay::output::Scale::Fractional(pending.scale)),
                pending.position,
            );
            if let Some(mode) = mode {
                output.set_preferred(mode);
            }
            if let Some(state) = self.common.output_state.get_mut(&output) {
                state.max_render_time = pending.max_render_time;
            }

            if !was_enabled {
                crate::tree::output::enable(&mut self.common.tree, pending.output, &self.common.config);
            }
        }

        crate::tree::root::update_geometry(&mut self.common.tree);
        crate::tree::arrange::arrange_root(&mut self.common.tree, &self.common.config);

        // Outputs that appeared mid-lock still need their opaque backdrop.
        if self.common.is_locked() {
            let outputs = self.common.tree.root_node().outputs.clone();
            for node in outputs {
                self.lock_new_output(node);
            }
        }

        self.commit_dirty();
        self.queue_redraw_all();
    }
}
