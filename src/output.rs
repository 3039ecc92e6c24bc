//! Per-output runtime state for the redraw loop.

use smithay::output::Output;
use smithay::reexports::calloop::RegistrationToken;
use smithay::utils::{Logical, Rectangle};

use crate::frame_clock::FrameClock;

#[derive(Debug)]
pub struct OutputState {
    /// Where the output is in the redraw loop.
    pub redraw_state: RedrawState,
    /// The [`FrameClock`] driving this output.
    pub frame_clock: FrameClock,
    /// Frame sequence for frame-callback throttling: bumped when a frame
    /// with damage is submitted, so clients get at most one frame event per
    /// refresh cycle.
    pub current_frame_sequence: u32,
    /// How long this output may spend rendering, in milliseconds before the
    /// predicted vblank. Zero disables the frame-timer delay.
    pub max_render_time: u32,
}

impl OutputState {
    pub fn new(frame_clock: FrameClock) -> Self {
        Self {
            redraw_state: RedrawState::Idle,
            frame_clock,
            current_frame_sequence: 0,
            max_render_time: 0,
        }
    }
}

/// A state machine describing where an [`Output`] is in the redraw loop.
#[derive(Debug, Default)]
pub enum RedrawState {
    /// Nothing to do.
    #[default]
    Idle,
    /// A redraw will happen on the next event-loop dispatch.
    Queued,
    /// A frame was submitted; waiting for the CRTC vblank.
    WaitingForVblank {
        /// Whether to queue another redraw after it arrives.
        queued: bool,
    },
    /// No frame was submitted; a timer stands in for the missing vblank so
    /// frame callbacks still fire at the estimated presentation time.
    WaitingForEstimatedVblankTimer {
        token: RegistrationToken,
        queued: bool,
    },
}

impl RedrawState {
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            RedrawState::Queued
                | RedrawState::WaitingForVblank { queued: true }
                | RedrawState::WaitingForEstimatedVblankTimer { queued: true, .. }
        )
    }

    pub fn queue(&mut self) {
        *self = match std::mem::take(self) {
            Self::Idle => Self::Queued,
            Self::WaitingForVblank { queued: false } => Self::WaitingForVblank { queued: true },
            Self::WaitingForEstimatedVblankTimer {
                token,
                queued: false,
            } => Self::WaitingForEstimatedVblankTimer {
                token,
                queued: true,
            },
            value => value, // already queued
        }
    }
}

/// Extension trait for an [`Output`].
pub trait OutputExt {
    /// The output's box in global layout space: advertised location plus the
    /// transformed, scaled mode size.
    fn geometry(&self) -> Rectangle<i32, Logical>;
}

impl OutputExt for Output {
    fn geometry(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(self.current_location(), {
            self.current_transform()
                .transform_size(
                    self.current_mode()
                        .map(|m| m.size)
                        .unwrap_or_else(|| (0, 0).into()),
                )
                .to_f64()
                .to_logical(self.current_scale().fractional_scale())
                .to_i32_round()
        })
    }
}
