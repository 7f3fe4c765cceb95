//! Retry recipe synthesis.
//!
//! A failure reason maps to exactly one `RetryRecipe`. Categories are tried
//! in `FailureCategory::ALL` order and the first whose token occurs in the
//! lowercased reason wins; anything else gets the default recipe. Reasons
//! recorded for renders without output carry renderer text after
//! `RENDER_FAILURE_PREFIX` and always resolve to the default recipe.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rqv_models::{FailureCategory, RetryRecipe, SampleId, RENDER_FAILURE_PREFIX};
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};

/// Bounds every recipe must satisfy.
pub const SAMPLES_BOUNDS: (u32, u32) = (64, 1024);
pub const CAMERA_DISTANCE_BOUNDS: (f64, f64) = (0.5, 3.0);
pub const FOCUS_DEPTH_BOUNDS: (f64, f64) = (0.1, 1.0);
pub const TARGET_FILL_BOUNDS: (f64, f64) = (0.5, 1.0);

fn tokens(category: FailureCategory) -> &'static [&'static str] {
    match category {
        FailureCategory::RenderTimeout => &["render timeout", "timed out", "timeout"],
        FailureCategory::Ssim => &["ssim"],
        FailureCategory::Sharpness => &["sharpness", "blur"],
        FailureCategory::Pnp => &["pnp", "reprojection"],
        FailureCategory::Snr => &["snr"],
        FailureCategory::Depth => &["depth"],
        FailureCategory::Noise => &["noise"],
        FailureCategory::Contrast => &["contrast"],
        FailureCategory::Default => &[],
    }
}

/// Failure category a reason string resolves to.
pub fn categorize(failure_reason: &str) -> FailureCategory {
    let reason = failure_reason.to_lowercase();
    if reason.starts_with(RENDER_FAILURE_PREFIX) {
        return FailureCategory::Default;
    }
    FailureCategory::ALL
        .iter()
        .copied()
        .find(|&c| tokens(c).iter().any(|t| reason.contains(t)))
        .unwrap_or(FailureCategory::Default)
}

/// The fallback recipe every category starts from.
pub fn default_recipe() -> RetryRecipe {
    RetryRecipe {
        category: FailureCategory::Default,
        samples: 384,
        lighting: "balanced".to_string(),
        background: "neutral".to_string(),
        camera_distance: 1.5,
        focus_depth: 0.5,
        camera_variation: 0.2,
        pose_variation: 0.2,
        color_management: "standard".to_string(),
        resolution: (1024, 1024),
        target_fill: 0.75,
        extra: Default::default(),
    }
}

fn recipe_for(category: FailureCategory) -> RetryRecipe {
    let base = RetryRecipe {
        category,
        ..default_recipe()
    };
    match category {
        FailureCategory::RenderTimeout => RetryRecipe {
            samples: 256,
            resolution: (768, 768),
            ..base
        }
        .with_extra("simplify_geometry", true),
        FailureCategory::Ssim => RetryRecipe {
            samples: 512,
            lighting: "studio".to_string(),
            camera_variation: 0.1,
            target_fill: 0.85,
            ..base
        },
        FailureCategory::Sharpness => RetryRecipe {
            samples: 448,
            focus_depth: 0.3,
            camera_distance: 1.2,
            ..base
        }
        .with_extra("depth_of_field", false),
        FailureCategory::Pnp => RetryRecipe {
            camera_variation: 0.3,
            pose_variation: 0.5,
            ..base
        }
        .with_extra("rerandomize_pose", true),
        FailureCategory::Snr => RetryRecipe {
            samples: 640,
            lighting: "bright".to_string(),
            ..base
        }
        .with_extra("denoise", true),
        FailureCategory::Depth => RetryRecipe {
            background: "plain".to_string(),
            camera_distance: 1.2,
            target_fill: 0.8,
            ..base
        }
        .with_extra("tight_clip_range", true),
        FailureCategory::Noise => RetryRecipe {
            samples: 768,
            ..base
        }
        .with_extra("denoise", true),
        FailureCategory::Contrast => RetryRecipe {
            lighting: "high_contrast".to_string(),
            color_management: "filmic".to_string(),
            ..base
        },
        FailureCategory::Default => base,
    }
}

/// Resolve the recipe for a failure reason. Total: every input maps to a
/// recipe that passes `validate_recipe`.
pub fn resolve_retry_recipe(failure_reason: &str) -> RetryRecipe {
    recipe_for(categorize(failure_reason))
}

/// One recipe field outside its bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeBoundViolation {
    pub field: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl fmt::Display for RecipeBoundViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} outside [{}, {}]", self.field, self.value, self.min, self.max)
    }
}

/// Report every bound a recipe violates. Values are never clamped.
pub fn validate_recipe(recipe: &RetryRecipe) -> Vec<RecipeBoundViolation> {
    let checks = [
        (
            "samples",
            recipe.samples as f64,
            SAMPLES_BOUNDS.0 as f64,
            SAMPLES_BOUNDS.1 as f64,
        ),
        (
            "camera_distance",
            recipe.camera_distance,
            CAMERA_DISTANCE_BOUNDS.0,
            CAMERA_DISTANCE_BOUNDS.1,
        ),
        (
            "focus_depth",
            recipe.focus_depth,
            FOCUS_DEPTH_BOUNDS.0,
            FOCUS_DEPTH_BOUNDS.1,
        ),
        (
            "target_fill",
            recipe.target_fill,
            TARGET_FILL_BOUNDS.0,
            TARGET_FILL_BOUNDS.1,
        ),
    ];

    checks
        .into_iter()
        .filter(|&(_, value, min, max)| !(value >= min && value <= max))
        .map(|(field, value, min, max)| RecipeBoundViolation {
            field,
            value,
            min,
            max,
        })
        .collect()
}

/// `validate_recipe` as a `Result`.
pub fn ensure_valid(recipe: &RetryRecipe) -> WorkerResult<()> {
    let violations = validate_recipe(recipe);
    if violations.is_empty() {
        return Ok(());
    }
    let msg = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(WorkerError::InvalidRecipe(msg))
}

/// How the external renderer is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    /// Renderer executable
    pub program: String,
    /// Scene script passed to the renderer, if it takes one
    pub script: Option<PathBuf>,
    /// Hard wall-clock limit per render
    pub timeout: Duration,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            program: "blender".to_string(),
            script: None,
            timeout: Duration::from_secs(600),
        }
    }
}

/// What to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    pub sample_id: SampleId,
    pub descriptor: String,
    pub color: Option<String>,
    pub output_dir: PathBuf,
}

/// A self-contained renderer command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInvocation {
    program: String,
    script: Option<PathBuf>,
    params: Vec<(String, String)>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl RenderInvocation {
    pub fn new(program: impl Into<String>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            script: None,
            params: Vec::new(),
            output_dir: output_dir.as_ref().to_path_buf(),
            timeout: RendererSettings::default().timeout,
        }
    }

    /// Run the renderer headless with this scene script.
    pub fn script(mut self, script: impl AsRef<Path>) -> Self {
        self.script = Some(script.as_ref().to_path_buf());
        self
    }

    /// Add a `--key value` parameter for the scene script.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn time_limit(&self) -> Duration {
        self.timeout
    }

    /// Value of a parameter, if set.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Build the argument list.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(ref script) = self.script {
            args.push("--background".to_string());
            args.push("--python".to_string());
            args.push(script.to_string_lossy().to_string());
            args.push("--".to_string());
        }

        for (key, value) in &self.params {
            args.push(format!("--{}", key));
            args.push(value.clone());
        }

        args.push("--output-dir".to_string());
        args.push(self.output_dir.to_string_lossy().to_string());

        args
    }
}

/// Build the renderer invocation for one target under a recipe.
pub fn render_invocation(
    recipe: &RetryRecipe,
    target: &RenderTarget,
    renderer: &RendererSettings,
) -> RenderInvocation {
    let mut cmd = RenderInvocation::new(&renderer.program, &target.output_dir)
        .timeout(renderer.timeout)
        .param("sample-id", &target.sample_id)
        .param("descriptor", &target.descriptor);

    if let Some(ref script) = renderer.script {
        cmd = cmd.script(script);
    }
    if let Some(ref color) = target.color {
        cmd = cmd.param("color", color);
    }

    cmd = cmd
        .param("samples", recipe.samples)
        .param("lighting", &recipe.lighting)
        .param("background", &recipe.background)
        .param("camera-distance", format!("{:.3}", recipe.camera_distance))
        .param("focus-depth", format!("{:.3}", recipe.focus_depth))
        .param("camera-variation", format!("{:.3}", recipe.camera_variation))
        .param("pose-variation", format!("{:.3}", recipe.pose_variation))
        .param("color-management", &recipe.color_management)
        .param("resolution", format!("{}x{}", recipe.resolution.0, recipe.resolution.1))
        .param("target-fill", format!("{:.3}", recipe.target_fill));

    if !recipe.extra.is_empty() {
        // Keys are sorted, so the argument is stable across runs
        let extra = serde_json::Value::Object(recipe.extra.clone().into_iter().collect());
        cmd = cmd.param("extra", extra);
    }

    cmd
}
