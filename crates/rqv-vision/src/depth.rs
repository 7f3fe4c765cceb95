//! Depth buffer scoring.
//!
//! `score = 0.4 * valid_ratio + 0.3 * 1/(1 + variance) + 0.3 * edge_smoothness`

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{VisionError, VisionResult};

const WEIGHT_VALID: f64 = 0.4;
const WEIGHT_VARIANCE: f64 = 0.3;
const WEIGHT_SMOOTHNESS: f64 = 0.3;

/// Depth values accepted as valid samples (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        // Renderers write background pixels as 1e10 or +inf
        Self {
            near: 1e-6,
            far: 1e6,
        }
    }
}

impl DepthRange {
    fn contains(&self, d: f32) -> bool {
        d.is_finite() && d >= self.near && d <= self.far
    }
}

/// Depth quality score and its components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthScore {
    pub score: f64,
    pub valid_ratio: f64,
    pub depth_variance: f64,
    pub edge_smoothness: f64,
    /// Buffer missing, empty or undecodable
    pub unreadable: bool,
}

impl DepthScore {
    pub fn unreadable() -> Self {
        Self {
            score: 0.0,
            valid_ratio: 0.0,
            depth_variance: 0.0,
            edge_smoothness: 0.0,
            unreadable: true,
        }
    }
}

/// Read a raw little-endian f32 depth buffer of `width x height` samples.
pub fn read_depth_buffer(path: &Path, width: u32, height: u32) -> VisionResult<Array2<f32>> {
    if !path.exists() {
        return Err(VisionError::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let expected = width as usize * height as usize * 4;
    if bytes.len() != expected {
        return Err(VisionError::invalid_depth(format!(
            "expected {} bytes for {}x{}, got {}",
            expected,
            width,
            height,
            bytes.len()
        )));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(|e| VisionError::invalid_depth(e.to_string()))
}

/// Score a depth buffer. Pure and idempotent.
pub fn score_depth_buffer(depth: &Array2<f32>, range: &DepthRange) -> DepthScore {
    if depth.is_empty() {
        return DepthScore::unreadable();
    }

    let valid = depth.mapv(|d| range.contains(d));
    let total = depth.len();

    let mut count = 0usize;
    let mut sum = 0.0f64;
    for (d, ok) in depth.iter().zip(valid.iter()) {
        if *ok {
            count += 1;
            sum += f64::from(*d);
        }
    }

    let valid_ratio = count as f64 / total as f64;
    let depth_variance = if count > 0 {
        let mean = sum / count as f64;
        depth
            .iter()
            .zip(valid.iter())
            .filter(|(_, ok)| **ok)
            .map(|(d, _)| (f64::from(*d) - mean).powi(2))
            .sum::<f64>()
            / count as f64
    } else {
        0.0
    };

    let edge_smoothness = edge_smoothness(depth, &valid);

    let score = WEIGHT_VALID * valid_ratio
        + WEIGHT_VARIANCE * (1.0 / (1.0 + depth_variance))
        + WEIGHT_SMOOTHNESS * edge_smoothness;

    debug!(
        valid_ratio,
        depth_variance, edge_smoothness, score, "Scored depth buffer"
    );

    DepthScore {
        score,
        valid_ratio,
        depth_variance,
        edge_smoothness,
        unreadable: false,
    }
}

/// `1 / (1 + mean Sobel magnitude)` over fully-valid 3x3 neighbourhoods.
fn edge_smoothness(depth: &Array2<f32>, valid: &Array2<bool>) -> f64 {
    let (rows, cols) = depth.dim();
    if rows < 3 || cols < 3 {
        return 0.0;
    }

    let mut total = 0.0f64;
    let mut count = 0usize;

    for y in 1..rows - 1 {
        for x in 1..cols - 1 {
            let window_valid = (y - 1..=y + 1).all(|yy| (x - 1..=x + 1).all(|xx| valid[[yy, xx]]));
            if !window_valid {
                continue;
            }
            let p = |dy: usize, dx: usize| f64::from(depth[[y + dy - 1, x + dx - 1]]);

            let gx = (p(0, 2) + 2.0 * p(1, 2) + p(2, 2)) - (p(0, 0) + 2.0 * p(1, 0) + p(2, 0));
            let gy = (p(2, 0) + 2.0 * p(2, 1) + p(2, 2)) - (p(0, 0) + 2.0 * p(0, 1) + p(0, 2));

            total += (gx * gx + gy * gy).sqrt();
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        1.0 / (1.0 + total / count as f64)
    }
}
