//! The winit backend: one output inside a host compositor's window. A
//! development convenience, not a deployment target.

use anyhow::Context;
use smithay::backend::allocator::dmabuf::Dmabuf;
use smithay::backend::egl::EGLDevice;
use smithay::backend::renderer::damage::OutputDamageTracker;
use smithay::backend::renderer::glow::GlowRenderer;
use smithay::backend::renderer::{ImportDma, ImportEgl, ImportMemWl};
use smithay::backend::winit::{self, WinitGraphicsBackend};
use smithay::output::{Mode, Output, PhysicalProperties, Scale, Subpixel};
use smithay::reexports::calloop::RegistrationToken;
use smithay::reexports::winit::window::WindowAttributes;
use smithay::utils::Transform;
use smithay::wayland::dmabuf::{DmabufFeedbackBuilder, DmabufGlobal, ImportNotifier};

use crate::output::RedrawState;
use crate::output_config::PendingOutputState;
use crate::state::{Common, State};
use crate::utils::get_monotonic_time;

pub struct WinitData {
    backend: WinitGraphicsBackend<GlowRenderer>,
    _backend_token: RegistrationToken,
    output: Output,
    damage_tracker: OutputDamageTracker,
    _dmabuf_global: DmabufGlobal,
}

impl WinitData {
    pub fn new(state_common: &mut Common) -> anyhow::Result<Self> {
        let window_attrs = WindowAttributes::default()
            .with_title("strata-compositor")
            .with_min_inner_size(smithay::reexports::winit::dpi::LogicalSize::new(1280, 800));
        let (mut backend, winit) = winit::init_from_attributes::<GlowRenderer>(window_attrs)
            .map_err(|err| anyhow::anyhow!("Failed to initialize winit backend: {err}"))?;
        let size = backend.window_size();

        let token = state_common
            .loop_handle
            .insert_source(winit, |event, (), state| match event {
                winit::WinitEvent::Resized { size, scale_factor } => {
                    let data = state.backend.winit();
                    let old_mode = data
                        .output
                        .current_mode()
                        .expect("winit output always has a mode");
                    data.output.delete_mode(old_mode);
                    let new_mode = Mode {
                        size,
                        refresh: 60_000,
                    };
                    data.output.add_mode(new_mode);
                    data.output.change_current_state(
                        Some(new_mode),
                        None,
                        Some(Scale::Fractional(scale_factor)),
                        None,
                    );
                    data.output.set_preferred(new_mode);
                    let output = data.output.clone();
                    state.output_resized(&output);
                }
                winit::WinitEvent::Input(event) => state.process_input_event(event),
                winit::WinitEvent::CloseRequested => state.common.stop = true,
                winit::WinitEvent::Redraw => {
                    let output = state.backend.winit().output.clone();
                    state.queue_redraw(&output);
                }
                winit::WinitEvent::Focus(_) => (),
            })
            .map_err(|err| anyhow::anyhow!("Failed to insert the winit event source: {err}"))?;

        let output = Output::new(
            String::from("winit-0"),
            PhysicalProperties {
                size: (0, 0).into(),
                subpixel: Subpixel::Unknown,
                make: String::from("strata"),
                model: String::from("winit-window"),
            },
        );
        let mode = Mode {
            size,
            refresh: 60_000,
        };
        output.change_current_state(Some(mode), Some(Transform::Flipped180), None, None);
        output.set_preferred(mode);
        state_common.output_state.insert(
            output.clone(),
            crate::output::OutputState::new(crate::frame_clock::FrameClock::new(None)),
        );

        let render_node = EGLDevice::device_for_display(backend.renderer().egl_context().display())
            .and_then(|device| device.try_get_render_node());
        let dmabuf_global = match render_node {
            Ok(Some(node)) => {
                let formats = backend.renderer().dmabuf_formats();
                let feedback = DmabufFeedbackBuilder::new(node.dev_id(), formats)
                    .build()
                    .context("dmabuf feedback")?;
                state_common
                    .dmabuf_state
                    .create_global_with_default_feedback::<State>(
                        &state_common.display_handle,
                        &feedback,
                    )
            }
            _ => {
                warn!("Failed to query the render node, dmabuf clients fall back to v3");
                let formats = backend.renderer().dmabuf_formats();
                state_common
                    .dmabuf_state
                    .create_global::<State>(&state_common.display_handle, formats)
            }
        };

        state_common
            .shm_state
            .update_formats(backend.renderer().shm_formats());
        if let Err(err) = backend
            .renderer()
            .bind_wl_display(&state_common.display_handle)
        {
            error!(?err, "Failed to enable EGL hardware acceleration");
        }

        let damage_tracker = OutputDamageTracker::from_output(&output);

        Ok(WinitData {
            backend,
            _backend_token: token,
            output,
            damage_tracker,
            _dmabuf_global: dmabuf_global,
        })
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn available_modes(&self) -> Vec<Mode> {
        self.output.current_mode().into_iter().collect()
    }

    pub fn preferred_mode(&self) -> Option<Mode> {
        self.output.current_mode()
    }

    pub fn render(&mut self, common: &mut Common) -> anyhow::Result<bool> {
        let elements = {
            let renderer = self.backend.renderer();
            crate::renderer::scene_elements(renderer, &common.tree, &self.output)
        };

        self.backend.bind().context("Failed to bind backend")?;
        let age = self.backend.buffer_age().unwrap_or(0);
        let res = self
            .damage_tracker
            .render_output(
                self.backend.renderer(),
                age,
                &elements,
                [0.05, 0.05, 0.05, 1.0],
            )
            .map_err(|err| anyhow::anyhow!("Failed to render output: {err:?}"))?;

        let has_damage = res.damage.is_some();
        if let Some(damage) = res.damage {
            self.backend
                .submit(Some(damage))
                .context("Failed to submit buffer")?;
        }

        if let Some(output_state) = common.output_state.get_mut(&self.output) {
            output_state.redraw_state = RedrawState::Idle;
            output_state.current_frame_sequence =
                output_state.current_frame_sequence.wrapping_add(1);
            output_state.frame_clock.present(get_monotonic_time());
        }

        Ok(has_damage)
    }

    /// The winit window takes whatever size the host gives it; testing and
    /// committing are no-ops beyond a scale/transform update.
    pub fn apply_output_states(
        &mut self,
        _common: &mut Common,
        states: &[PendingOutputState],
        test_only: bool,
    ) -> anyhow::Result<()> {
        if test_only {
            return Ok(());
        }
        for state in states {
            if !state.enabled {
                anyhow::bail!("cannot disable the winit output");
            }
        }
        Ok(())
    }

    pub fn dmabuf_imported(&mut self, dmabuf: &Dmabuf, notifier: ImportNotifier) {
        if self.backend.renderer().import_dmabuf(dmabuf, None).is_ok() {
            let _ = notifier.successful::<State>();
        } else {
            notifier.failed();
        }
    }

    pub fn renderer(&mut self) -> &mut GlowRenderer {
        self.backend.renderer()
    }
}
