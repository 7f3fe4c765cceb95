//! Numerical core of the render quality validation loop.
//!
//! This crate provides:
//! - Camera parameter extraction from renderer camera state
//! - PnP reprojection validation (RANSAC + Levenberg-Marquardt)
//! - Depth buffer scoring
//! - Image metrics (SSIM, SNR, sharpness, contrast) and noise estimation
//!
//! Everything here is synchronous and CPU-bound; callers run one sample at a
//! time to completion.

pub mod camera;
pub mod depth;
pub mod error;
pub mod image_metrics;
pub mod noise;
pub mod pnp;

pub use camera::{extract_camera_snapshot, RendererCameraState, SensorFit};
pub use depth::{read_depth_buffer, score_depth_buffer, DepthRange, DepthScore};
pub use error::{VisionError, VisionResult};
pub use image_metrics::{compute_image_metrics, ImageMetrics};
pub use noise::estimate_noise;
pub use pnp::{validate_reprojection, PnpConfig, ReprojectionReport};
