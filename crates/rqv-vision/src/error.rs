//! Error types for vision operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Input errors that abort a single sample.
///
/// Numerical failures (PnP non-convergence, unreadable depth) are not errors:
/// they degrade to explicit sentinels in the returned reports.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Invalid camera state: {0}")]
    InvalidCamera(String),

    #[error("Correspondence length mismatch: {points_3d} 3D points vs {points_2d} 2D points")]
    CorrespondenceLengthMismatch { points_3d: usize, points_2d: usize },

    #[error("Invalid depth buffer: {0}")]
    InvalidDepthBuffer(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VisionError {
    pub fn invalid_camera(msg: impl Into<String>) -> Self {
        Self::InvalidCamera(msg.into())
    }

    pub fn invalid_depth(msg: impl Into<String>) -> Self {
        Self::InvalidDepthBuffer(msg.into())
    }
}
