//! Camera parameter extraction.
//!
//! Converts the renderer's camera state into a [`CameraSnapshot`].
//!
//! # Conventions
//! The renderer describes its camera with a camera-to-world transform whose
//! camera looks down -Z with +Y up. Snapshots use the computer-vision
//! convention (+Z forward, +Y down), so the world-to-camera rotation is
//! pre-multiplied by `diag(1, -1, -1)`.
//!
//! # Sensor fit
//! - `Horizontal`: the sensor width spans the image width
//! - `Vertical`: the sensor height spans the image height
//! - `Auto`: the sensor width spans whichever image axis is larger

use nalgebra::{Matrix3, Vector3};
use rqv_models::{CameraSnapshot, Intrinsics};
use serde::{Deserialize, Serialize};

use crate::error::{VisionError, VisionResult};

/// Which sensor dimension is fitted to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorFit {
    #[default]
    Auto,
    Horizontal,
    Vertical,
}

/// Camera state as reported by the renderer for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererCameraState {
    /// Lens focal length in millimetres
    pub focal_length_mm: f64,
    /// Sensor width in millimetres
    pub sensor_width_mm: f64,
    /// Sensor height in millimetres
    pub sensor_height_mm: f64,
    #[serde(default)]
    pub sensor_fit: SensorFit,
    /// Row-major camera-to-world transform
    pub world_matrix: [[f64; 4]; 4],
    pub resolution_x: u32,
    pub resolution_y: u32,
}

/// Extract intrinsics and extrinsics from renderer camera state.
///
/// Fails fast on zero, negative or non-finite focal length / sensor size,
/// zero resolution, or a degenerate transform.
pub fn extract_camera_snapshot(state: &RendererCameraState) -> VisionResult<CameraSnapshot> {
    validate_positive("focal length", state.focal_length_mm)?;
    validate_positive("sensor width", state.sensor_width_mm)?;
    validate_positive("sensor height", state.sensor_height_mm)?;

    if state.resolution_x == 0 || state.resolution_y == 0 {
        return Err(VisionError::invalid_camera(format!(
            "render resolution must be non-zero, got {}x{}",
            state.resolution_x, state.resolution_y
        )));
    }

    let intrinsics = compute_intrinsics(state);
    let (rotation, translation) = compute_extrinsics(&state.world_matrix)?;

    Ok(CameraSnapshot {
        intrinsics,
        rotation,
        translation,
        distortion: [0.0; 5],
        resolution: (state.resolution_x, state.resolution_y),
    })
}

fn validate_positive(name: &str, value: f64) -> VisionResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(VisionError::invalid_camera(format!(
            "{} must be finite and positive, got {}",
            name, value
        )));
    }
    Ok(())
}

fn compute_intrinsics(state: &RendererCameraState) -> Intrinsics {
    let res_x = f64::from(state.resolution_x);
    let res_y = f64::from(state.resolution_y);
    let focal = state.focal_length_mm;

    let f = match state.sensor_fit {
        SensorFit::Horizontal => focal * res_x / state.sensor_width_mm,
        SensorFit::Vertical => focal * res_y / state.sensor_height_mm,
        SensorFit::Auto => {
            if res_x >= res_y {
                focal * res_x / state.sensor_width_mm
            } else {
                focal * res_y / state.sensor_width_mm
            }
        }
    };

    Intrinsics {
        fx: f,
        fy: f,
        cx: res_x / 2.0,
        cy: res_y / 2.0,
    }
}

fn compute_extrinsics(world: &[[f64; 4]; 4]) -> VisionResult<([[f64; 3]; 3], [f64; 3])> {
    if world.iter().flatten().any(|v| !v.is_finite()) {
        return Err(VisionError::invalid_camera("world transform contains non-finite values"));
    }

    let mut axes = Matrix3::from_fn(|r, c| world[r][c]);
    for c in 0..3 {
        let norm = axes.column(c).norm();
        if norm < 1e-12 {
            return Err(VisionError::invalid_camera(format!(
                "world transform axis {} has zero length",
                c
            )));
        }
        axes.set_column(c, &(axes.column(c) / norm));
    }
    if axes.determinant() <= 0.0 {
        return Err(VisionError::invalid_camera(
            "world transform is mirrored or degenerate",
        ));
    }

    let position = Vector3::new(world[0][3], world[1][3], world[2][3]);
    let flip = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));

    let r_world_to_cam = flip * axes.transpose();
    let t = -(r_world_to_cam * position);

    let mut rotation = [[0.0; 3]; 3];
    for (r, row) in rotation.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = r_world_to_cam[(r, c)];
        }
    }

    Ok((rotation, [t.x, t.y, t.z]))
}
