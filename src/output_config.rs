//! The output configuration pipeline.
//!
//! Every head change — new output, mode, scale, transform, power, position —
//! funnels through one path: build a matched config per live output, order
//! them (keep-enabled first, then enabling, then disabling), translate each
//! into a desired output state, test the whole set against the backend's
//! swapchains at once, and commit atomically. Only after a successful commit
//! do the smithay outputs, the tree, and input mappings learn the new state.

use smithay::output::Mode;
use smithay::utils::{Logical, Physical, Point, Size, Transform};

use crate::config::{Config, OutputConfig, RenderBitDepth};
use crate::tree::{NodeId, Tree};

/// The minimum DPI on both axes before auto-scale picks 2.
const HIDPI_DPI_LIMIT: f64 = 2.0 * 96.0;
/// Panels shorter than this never auto-scale.
const HIDPI_MIN_HEIGHT: i32 = 1200;
const MM_PER_INCH: f64 = 25.4;

/// One live output paired with the configuration that should apply to it.
#[derive(Clone, Debug)]
pub struct MatchedOutputConfig {
    pub output: NodeId,
    pub config: OutputConfig,
}

/// Build the matched-config list: one entry per live output, explicit user
/// config or a default entry. Ordering rule: outputs staying enabled first,
/// then outputs being enabled, then disabling/disabled ones, so swapchain
/// resources free up before they are needed.
pub fn build_matched_configs(tree: &Tree, config: &Config) -> Vec<MatchedOutputConfig> {
    let mut matched: Vec<MatchedOutputConfig> = tree
        .root_node()
        .all_outputs
        .iter()
        .map(|&output| {
            let name = tree.output(output).output.name();
            let config = config
                .output_config(&name)
                .cloned()
                .unwrap_or_else(|| OutputConfig::new(name));
            MatchedOutputConfig { output, config }
        })
        .collect();

    let rank = |entry: &MatchedOutputConfig| -> u8 {
        let enabled = tree.output(entry.output).enabled;
        if entry.config.is_disabling() {
            2
        } else if enabled {
            0
        } else {
            1
        }
    };
    matched.sort_by_key(rank);
    matched
}

/// Desired state for one output, ready for a backend test/commit.
#[derive(Clone, Debug)]
pub struct PendingOutputState {
    pub output: NodeId,
    pub enabled: bool,
    pub mode: Option<ModeRequest>,
    pub scale: f64,
    pub transform: Transform,
    pub adaptive_sync: Option<bool>,
    /// Render with a 10-bit format (XRGB2101010) instead of XRGB8888.
    pub ten_bit: bool,
    pub position: Option<Point<i32, Logical>>,
    pub max_render_time: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModeRequest {
    /// One of the modes the connector advertises.
    Fixed(Mode),
    /// A custom modeline; refresh in mHz, zero meaning "don't care".
    Custom { size: Size<i32, Physical>, refresh_mhz: i32 },
}

/// Translate one matched config into a desired output state.
///
/// `available_modes`/`preferred_mode` come from the backend (DRM connector
/// modes; the winit window advertises exactly one). `panel_orientation` is
/// the DRM panel-orientation property when known.
pub fn resolve_output_state(
    tree: &Tree,
    entry: &MatchedOutputConfig,
    available_modes: &[Mode],
    preferred_mode: Option<Mode>,
    panel_orientation: Option<Transform>,
) -> PendingOutputState {
    let output_node = tree.output(entry.output);
    let oc = &entry.config;

    if oc.is_disabling() {
        return PendingOutputState {
            output: entry.output,
            enabled: false,
            mode: None,
            scale: 1.0,
            transform: Transform::Normal,
            adaptive_sync: None,
            ten_bit: false,
            position: None,
            max_render_time: 0,
        };
    }

    let mode = match oc.mode {
        Some((width, height, refresh)) if oc.custom_mode || available_modes.is_empty() => {
            Some(ModeRequest::Custom {
                size: Size::from((width, height)),
                refresh_mhz: refresh.map_or(0, |r| (r * 1000.0).round() as i32),
            })
        }
        Some((width, height, refresh)) => {
            Some(match pick_mode(available_modes, width, height, refresh) {
                Some(mode) => ModeRequest::Fixed(mode),
                None => {
                    let fallback = preferred_mode
                        .or_else(|| available_modes.first().copied())
                        .expect("non-empty mode list");
                    info!(
                        output = %output_node.output.name(),
                        ?width, ?height,
                        "Configured mode not available, using preferred mode"
                    );
                    ModeRequest::Fixed(fallback)
                }
            })
        }
        None => preferred_mode
            .or_else(|| available_modes.first().copied())
            .map(ModeRequest::Fixed),
    };

    let transform = oc
        .transform
        .or(panel_orientation)
        .unwrap_or(Transform::Normal);

    // Scale comes last: auto-detection reads the pending mode size.
    let scale = match oc.scale {
        Some(scale) if scale > 0.0 => quantize_scale(scale),
        _ => {
            let mode_size = match mode {
                Some(ModeRequest::Fixed(mode)) => mode.size,
                Some(ModeRequest::Custom { size, .. }) => size,
                None => Size::from((0, 0)),
            };
            let physical = output_node.output.physical_properties().size;
            f64::from(compute_default_scale(mode_size, transform, physical))
        }
    };

    PendingOutputState {
        output: entry.output,
        enabled: true,
        mode,
        scale,
        transform,
        adaptive_sync: oc.adaptive_sync,
        ten_bit: oc.render_bit_depth == RenderBitDepth::Ten,
        position: oc.position,
        max_render_time: oc.max_render_time.unwrap_or(0),
    }
}

/// Pick the advertised mode for a requested size and refresh: exact size
/// match, then smallest refresh distance; no refresh target means highest
/// available.
pub fn pick_mode(
    available: &[Mode],
    width: i32,
    height: i32,
    refresh_hz: Option<f32>,
) -> Option<Mode> {
    // Not every float survives the round trip through mHz; round to avoid
    // off-by-one refresh mismatches.
    let target_mhz = match refresh_hz {
        Some(refresh) if refresh > 0.0 => (refresh * 1000.0).round() as i32,
        _ => i32::MAX,
    };

    let mut best: Option<Mode> = None;
    let mut best_diff = i64::MAX;
    for mode in available {
        if mode.size.w != width || mode.size.h != height {
            continue;
        }
        let diff = (i64::from(mode.refresh) - i64::from(target_mhz)).abs();
        if diff < best_diff {
            best_diff = diff;
            best = Some(*mode);
            if diff == 0 {
                break;
            }
        }
    }
    best
}

/// Physical sizes some panels report that are really aspect ratios.
fn phys_size_is_aspect_ratio(size: Size<i32, smithay::utils::Raw>) -> bool {
    matches!(
        (size.w, size.h),
        (1600, 900) | (1600, 1000) | (160, 90) | (160, 100) | (16, 9) | (16, 10)
    )
}

/// Auto-scale: 2 on genuinely high-DPI panels, 1 everywhere else. Anything
/// fancier must be configured explicitly.
pub fn compute_default_scale(
    mode_size: Size<i32, Physical>,
    transform: Transform,
    physical_size: Size<i32, smithay::utils::Raw>,
) -> i32 {
    let size = transform.transform_size(mode_size);
    if size.h < HIDPI_MIN_HEIGHT {
        return 1;
    }
    if physical_size.w == 0 || physical_size.h == 0 {
        return 1;
    }
    if phys_size_is_aspect_ratio(physical_size) {
        return 1;
    }

    let dpi_x = f64::from(size.w) / (f64::from(physical_size.w) / MM_PER_INCH);
    let dpi_y = f64::from(size.h) / (f64::from(physical_size.h) / MM_PER_INCH);
    debug!(dpi_x, dpi_y, "Output DPI");
    if dpi_x <= HIDPI_DPI_LIMIT || dpi_y <= HIDPI_DPI_LIMIT {
        return 1;
    }
    2
}

/// The fractional-scale protocol speaks in 120ths; send clients the same
/// value we use.
pub fn quantize_scale(scale: f64) -> f64 {
    (scale * 120.0).round() / 120.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(w: i32, h: i32, mhz: i32) -> Mode {
        Mode {
            size: Size::from((w, h)),
            refresh: mhz,
        }
    }

    #[test]
    fn full_hd_at_24_inches_stays_at_scale_1() {
        // A 24" 16:9 panel is roughly 531x299 mm.
        let scale = compute_default_scale(
            Size::from((1920, 1080)),
            Transform::Normal,
            Size::from((531, 299)),
        );
        assert_eq!(scale, 1);
    }

    #[test]
    fn uhd_at_15_inches_scales_to_2() {
        // A 15.6" 16:9 panel is roughly 345x194 mm.
        let scale = compute_default_scale(
            Size::from((3840, 2160)),
            Transform::Normal,
            Size::from((345, 194)),
        );
        assert_eq!(scale, 2);
    }

    #[test]
    fn short_panels_and_placeholder_sizes_never_scale() {
        // Below the height threshold, even at absurd density.
        assert_eq!(
            compute_default_scale(
                Size::from((1920, 1080)),
                Transform::Normal,
                Size::from((100, 56)),
            ),
            1
        );
        // Aspect-ratio placeholder EDID.
        assert_eq!(
            compute_default_scale(
                Size::from((3840, 2160)),
                Transform::Normal,
                Size::from((16, 9)),
            ),
            1
        );
        // Zero physical size.
        assert_eq!(
            compute_default_scale(
                Size::from((3840, 2160)),
                Transform::Normal,
                Size::from((0, 0)),
            ),
            1
        );
    }

    #[test]
    fn rotated_panels_measure_the_transformed_height() {
        // A dense panel driven sideways: the transformed size decides.
        let scale = compute_default_scale(
            Size::from((2160, 3840)),
            Transform::_90,
            Size::from((345, 194)),
        );
        assert_eq!(scale, 2);
    }

    #[test]
    fn mode_selection_prefers_the_closest_refresh() {
        let modes = [
            mode(1920, 1080, 60_000),
            mode(1920, 1080, 144_000),
            mode(1920, 1080, 75_000),
            mode(1280, 720, 60_000),
        ];
        assert_eq!(
            pick_mode(&modes, 1920, 1080, Some(74.9)),
            Some(mode(1920, 1080, 75_000))
        );
        // No refresh target: highest wins.
        assert_eq!(
            pick_mode(&modes, 1920, 1080, None),
            Some(mode(1920, 1080, 144_000))
        );
        // Size mismatch: nothing.
        assert_eq!(pick_mode(&modes, 2560, 1440, None), None);
    }

    #[test]
    fn user_scales_quantize_to_fractional_120ths() {
        assert_eq!(quantize_scale(1.5), 1.5);
        let quantized = quantize_scale(1.33);
        assert!((quantized - 160.0 / 120.0).abs() < 1e-9);
        assert_eq!(quantize_scale(2.0), 2.0);
    }
}
