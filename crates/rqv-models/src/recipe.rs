//! Retry recipes: fully specified alternate render configurations.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Failure category a recipe is tuned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RenderTimeout,
    Ssim,
    Sharpness,
    Pnp,
    Snr,
    Depth,
    Noise,
    Contrast,
    /// Fallback for unrecognized reasons
    Default,
}

impl FailureCategory {
    pub const ALL: &'static [FailureCategory] = &[
        FailureCategory::RenderTimeout,
        FailureCategory::Ssim,
        FailureCategory::Sharpness,
        FailureCategory::Pnp,
        FailureCategory::Snr,
        FailureCategory::Depth,
        FailureCategory::Noise,
        FailureCategory::Contrast,
        FailureCategory::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::RenderTimeout => "render_timeout",
            FailureCategory::Ssim => "ssim",
            FailureCategory::Sharpness => "sharpness",
            FailureCategory::Pnp => "pnp",
            FailureCategory::Snr => "snr",
            FailureCategory::Depth => "depth",
            FailureCategory::Noise => "noise",
            FailureCategory::Contrast => "contrast",
            FailureCategory::Default => "default",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alternate render configuration chosen to counteract one failure mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryRecipe {
    /// Category this recipe was resolved for
    pub category: FailureCategory,
    /// Path-tracing sample count
    pub samples: u32,
    /// Lighting preset name
    pub lighting: String,
    /// Background mode name
    pub background: String,
    /// Camera distance as a multiple of the part's bounding radius
    pub camera_distance: f64,
    /// Normalized focus depth
    pub focus_depth: f64,
    /// Camera placement jitter amplitude
    pub camera_variation: f64,
    /// Part pose jitter amplitude
    pub pose_variation: f64,
    /// Color management / view transform
    pub color_management: String,
    /// Output resolution (width, height)
    pub resolution: (u32, u32),
    /// Fraction of the frame the part should occupy
    pub target_fill: f64,
    /// Free-form renderer parameters
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RetryRecipe {
    /// Add a free-form renderer parameter.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}
