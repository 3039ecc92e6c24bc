//! A frame clock for outputs.
//!
//! Tracks the last presentation time of an output and predicts the next
//! vblank from the mode's refresh interval. Frame timers and per-view
//! frame-done delays both key off this prediction.

use std::time::Duration;

use crate::utils::get_monotonic_time;

#[derive(Debug)]
pub struct FrameClock {
    /// `None` for outputs with no fixed refresh (the winit window), which
    /// present as soon as a redraw finishes.
    refresh_interval: Option<Duration>,
    last_presentation_time: Option<Duration>,
}

impl FrameClock {
    pub fn new(refresh_interval: Option<Duration>) -> Self {
        debug_assert!(refresh_interval != Some(Duration::ZERO));
        Self {
            refresh_interval,
            last_presentation_time: None,
        }
    }

    /// Build a clock from a mode's refresh rate in mHz.
    pub fn from_refresh_mhz(refresh: i32) -> Self {
        if refresh <= 0 {
            return Self::new(None);
        }
        let interval_ns = 1_000_000_000_000u64 / refresh as u64;
        Self::new(Some(Duration::from_nanos(interval_ns)))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    /// Record that a frame was presented at `now`.
    pub fn present(&mut self, now: Duration) {
        self.last_presentation_time = Some(now);
    }

    /// Predict the next presentation instant.
    pub fn next_presentation_time(&self) -> Duration {
        let now = get_monotonic_time();
        let Some(refresh_interval) = self.refresh_interval else {
            return now;
        };
        let Some(last) = self.last_presentation_time else {
            return now;
        };

        // Normally the next presentation is one interval after the last.
        // After an idle period (no damage, nothing presented) the naive
        // prediction lies in the past; re-align onto the vblank grid by
        // subtracting the current phase.
        let mut next = last + refresh_interval;
        if next < now {
            let phase = Duration::from_nanos(
                ((now.as_nanos() - last.as_nanos()) % refresh_interval.as_nanos()) as u64,
            );
            next = now - phase + refresh_interval;
        }
        next
    }

    /// Time until the predicted vblank, zero if it already passed.
    pub fn time_until_refresh(&self) -> Duration {
        let now = get_monotonic_time();
        self.next_presentation_time().saturating_sub(now)
    }
}
