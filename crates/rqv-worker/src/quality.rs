//! Per-sample quality evaluation: image metrics, PnP reprojection and depth
//! scoring folded into one `QualityMetrics` with a QA verdict.

use image::DynamicImage;
use ndarray::Array2;
use rqv_models::{CameraSnapshot, QualityMetrics};
use rqv_vision::{compute_image_metrics, score_depth_buffer, validate_reprojection, DepthScore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ValidationConfig;
use crate::error::WorkerResult;
use crate::qa::{decide, MetricInputs};

/// Known 3D landmarks and where the renderer says they landed in the image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoints {
    pub points_3d: Vec<[f64; 3]>,
    pub points_2d: Vec<[f64; 2]>,
}

/// Compute every metric for a rendered sample and classify it.
///
/// Returns an error only for malformed input (undersized image, reference
/// size mismatch, correspondence length mismatch). A missing depth buffer or
/// an unsolvable pose produce sentinels that QA fails.
pub fn evaluate_quality(
    image: &DynamicImage,
    reference_image: Option<&DynamicImage>,
    depth_buffer: Option<&Array2<f32>>,
    snapshot: &CameraSnapshot,
    reference_points: &ReferencePoints,
    config: &ValidationConfig,
) -> WorkerResult<QualityMetrics> {
    let image_metrics = compute_image_metrics(image, reference_image)?;
    let reprojection = validate_reprojection(
        &reference_points.points_3d,
        &reference_points.points_2d,
        snapshot,
        &config.pnp,
    )?;
    let depth = depth_buffer
        .map(|d| score_depth_buffer(d, &config.depth))
        .unwrap_or_else(DepthScore::unreadable);

    debug!(
        rms_px = reprojection.rms_px,
        inliers = reprojection.inliers,
        depth_valid_ratio = depth.valid_ratio,
        "Geometric checks complete"
    );

    let inputs = MetricInputs {
        ssim: image_metrics.ssim,
        snr: image_metrics.snr,
        sharpness: image_metrics.sharpness,
        reprojection_rms: reprojection.rms_px,
        depth_score: depth.score,
        noise: Some(image_metrics.noise),
        contrast: Some(image_metrics.contrast),
        depth_unreadable: depth.unreadable,
    };
    let decision = decide(&inputs, &config.qa);

    Ok(QualityMetrics {
        ssim: inputs.ssim,
        snr: inputs.snr,
        sharpness: inputs.sharpness,
        reprojection_rms: inputs.reprojection_rms,
        depth_score: inputs.depth_score,
        noise: inputs.noise,
        contrast: inputs.contrast,
        qa_flag: decision.flag,
        reason: decision.reason,
        violations: decision.violations,
        pnp_insufficient_correspondences: reprojection.insufficient_correspondences,
        depth_unreadable: depth.unreadable,
        render_failed: false,
    })
}
