//! Camera snapshot captured at render time.
//!
//! Uses the computer-vision convention: the camera looks down +Z, +X points
//! right and +Y points down in image space. `rotation`/`translation` map world
//! coordinates into camera coordinates: `p_cam = R * p_world + t`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Row-major 3x3 intrinsic matrix K.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Project a camera-space point to pixels. `None` at or behind the camera plane.
    pub fn project(&self, p_cam: [f64; 3]) -> Option<[f64; 2]> {
        if !(p_cam[2] > 0.0) {
            return None;
        }
        Some([
            self.fx * p_cam[0] / p_cam[2] + self.cx,
            self.fy * p_cam[1] / p_cam[2] + self.cy,
        ])
    }
}

/// Immutable camera state actually used for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CameraSnapshot {
    /// Intrinsic parameters
    pub intrinsics: Intrinsics,
    /// World-to-camera rotation, row-major
    pub rotation: [[f64; 3]; 3],
    /// World-to-camera translation
    pub translation: [f64; 3],
    /// Brown-Conrady distortion (k1, k2, p1, p2, k3); always zero for the pinhole renderer
    pub distortion: [f64; 5],
    /// Render resolution (width, height) in pixels
    pub resolution: (u32, u32),
}

impl CameraSnapshot {
    /// Transform a world point into camera coordinates.
    pub fn to_camera(&self, p_world: [f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p_world[0] + r[0][1] * p_world[1] + r[0][2] * p_world[2] + t[0],
            r[1][0] * p_world[0] + r[1][1] * p_world[1] + r[1][2] * p_world[2] + t[1],
            r[2][0] * p_world[0] + r[2][1] * p_world[1] + r[2][2] * p_world[2] + t[2],
        ]
    }

    /// True when the world point lies strictly in front of the camera plane.
    pub fn is_in_front(&self, p_world: [f64; 3]) -> bool {
        let z = self.to_camera(p_world)[2];
        z.is_finite() && z > 0.0
    }

    /// Project a world point to pixels using this snapshot's pose.
    pub fn project(&self, p_world: [f64; 3]) -> Option<[f64; 2]> {
        self.intrinsics.project(self.to_camera(p_world))
    }
}
