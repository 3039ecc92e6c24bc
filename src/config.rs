//! Ambient compositor configuration.
//!
//! Only the values the window-management core consumes live here; how they
//! get populated (file, defaults) is outside the core's concern.

use smithay::utils::{Logical, Point, Size, Transform};

use crate::tree::Layout;

#[derive(Debug)]
pub struct Config {
    /// Move focus to the hovered window on pointer motion.
    pub focus_follows_mouse: bool,
    /// Height of a title-bar strip, including its padding.
    pub title_bar_height: i32,
    pub border_thickness: i32,
    pub gaps_inner: i32,
    pub gaps_outer: i32,
    pub default_layout: Layout,
    /// How long clients get to ack a configure before a transaction is
    /// force-applied.
    pub txn_timeout_ms: u64,
    /// Smallest size a floater may be resized to.
    pub floating_minimum: Size<i32, Logical>,
    /// Largest size a floater may be resized to; zero means "the output".
    pub floating_maximum: Size<i32, Logical>,
    /// Per-output configuration, matched by connector name.
    pub outputs: Vec<OutputConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            focus_follows_mouse: true,
            title_bar_height: 24,
            border_thickness: 2,
            gaps_inner: 0,
            gaps_outer: 0,
            default_layout: Layout::Horizontal,
            txn_timeout_ms: 200,
            floating_minimum: Size::from((75, 50)),
            floating_maximum: Size::from((0, 0)),
            outputs: Vec::new(),
        }
    }
}

impl Config {
    /// The explicit configuration for an output, if any. An entry named `*`
    /// is a catch-all.
    pub fn output_config(&self, name: &str) -> Option<&OutputConfig> {
        self.outputs
            .iter()
            .find(|oc| oc.name == name)
            .or_else(|| self.outputs.iter().find(|oc| oc.name == "*"))
    }
}

/// Requested bit depth of an output's render format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderBitDepth {
    #[default]
    Default,
    Eight,
    Ten,
}

/// User-requested state for one output. Unset fields mean "pick a default".
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Connector name, or `*` for a catch-all entry.
    pub name: String,
    pub enabled: Option<bool>,
    /// Requested mode; refresh in Hz, `None` meaning "highest available".
    pub mode: Option<(i32, i32, Option<f32>)>,
    /// Treat [`Self::mode`] as a custom mode even if the output advertises
    /// modes.
    pub custom_mode: bool,
    pub position: Option<Point<i32, Logical>>,
    pub scale: Option<f64>,
    pub transform: Option<Transform>,
    pub adaptive_sync: Option<bool>,
    pub render_bit_depth: RenderBitDepth,
    /// How long this output may spend rendering, in milliseconds before the
    /// predicted vblank.
    pub max_render_time: Option<u32>,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: None,
            mode: None,
            custom_mode: false,
            position: None,
            scale: None,
            transform: None,
            adaptive_sync: None,
            render_bit_depth: RenderBitDepth::Default,
            max_render_time: None,
        }
    }

    /// Whether this entry turns its output off.
    pub fn is_disabling(&self) -> bool {
        self.enabled == Some(false)
    }
}
