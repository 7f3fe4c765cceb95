//! PnP reprojection validation.
//!
//! Estimates the camera pose from 3D/2D correspondences and reports the
//! reprojection RMS in pixels. Robust estimation is RANSAC over minimal
//! 4-point samples; each hypothesis is a Levenberg-Marquardt fit of a 6-DoF
//! pose (axis-angle + translation) seeded from the snapshot extrinsics. The
//! winning consensus set is refined over all of its inliers.
//!
//! The RNG seed is fixed so repeated runs over the same sample agree.

use nalgebra::{Matrix6, Rotation3, Vector2, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rqv_models::{CameraSnapshot, Intrinsics, PNP_FAILURE_RMS};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VisionError, VisionResult};

/// Minimum correspondences for a pose estimate.
pub const MIN_CORRESPONDENCES: usize = 4;

/// RANSAC and refinement tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnpConfig {
    pub max_iterations: usize,
    pub inlier_threshold_px: f64,
    pub confidence: f64,
    pub seed: u64,
    /// Levenberg-Marquardt iterations per fit
    pub refine_iterations: usize,
}

impl Default for PnpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            inlier_threshold_px: 8.0,
            confidence: 0.99,
            seed: 0x5EED_F00D,
            refine_iterations: 50,
        }
    }
}

/// Result of one reprojection validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionReport {
    /// RMS pixel error over all valid points, or the failure sentinel
    pub rms_px: f64,
    /// Correspondences left after dropping points behind the camera
    pub valid_points: usize,
    pub inliers: usize,
    pub converged: bool,
    pub insufficient_correspondences: bool,
}

impl ReprojectionReport {
    fn failure(valid_points: usize, insufficient: bool) -> Self {
        Self {
            rms_px: PNP_FAILURE_RMS,
            valid_points,
            inliers: 0,
            converged: false,
            insufficient_correspondences: insufficient,
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.converged || self.insufficient_correspondences
    }
}

#[derive(Debug, Clone, Copy)]
struct Pose {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
}

impl Pose {
    fn from_snapshot(snapshot: &CameraSnapshot) -> Self {
        let m = nalgebra::Matrix3::from_fn(|r, c| snapshot.rotation[r][c]);
        Self {
            rotation: Rotation3::from_matrix(&m),
            translation: Vector3::from(snapshot.translation),
        }
    }

    fn params(&self) -> Vector6<f64> {
        let r = self.rotation.scaled_axis();
        let t = self.translation;
        Vector6::new(r.x, r.y, r.z, t.x, t.y, t.z)
    }

    fn from_params(p: &Vector6<f64>) -> Self {
        Self {
            rotation: Rotation3::new(Vector3::new(p[0], p[1], p[2])),
            translation: Vector3::new(p[3], p[4], p[5]),
        }
    }

    fn is_finite(&self) -> bool {
        self.params().iter().all(|v| v.is_finite())
    }

    fn residual(&self, k: &Intrinsics, object: &Vector3<f64>, image: &Vector2<f64>) -> Option<Vector2<f64>> {
        let p = self.rotation * object + self.translation;
        let px = k.project([p.x, p.y, p.z])?;
        Some(Vector2::new(px[0] - image.x, px[1] - image.y))
    }

    fn error_px(&self, k: &Intrinsics, object: &Vector3<f64>, image: &Vector2<f64>) -> f64 {
        self.residual(k, object, image)
            .map(|r| r.norm())
            .unwrap_or(f64::INFINITY)
    }
}

struct Correspondences<'a> {
    intrinsics: &'a Intrinsics,
    object: Vec<Vector3<f64>>,
    image: Vec<Vector2<f64>>,
}

impl Correspondences<'_> {
    fn len(&self) -> usize {
        self.object.len()
    }

    fn sum_squared_error(&self, pose: &Pose, indices: &[usize]) -> Option<f64> {
        let mut total = 0.0;
        for &i in indices {
            total += pose
                .residual(self.intrinsics, &self.object[i], &self.image[i])?
                .norm_squared();
        }
        total.is_finite().then_some(total)
    }

    /// Gauss-Newton normal equations with a forward-difference Jacobian.
    fn normal_equations(&self, params: &Vector6<f64>, indices: &[usize]) -> Option<(Matrix6<f64>, Vector6<f64>)> {
        let pose = Pose::from_params(params);
        let base: Vec<Vector2<f64>> = indices
            .iter()
            .map(|&i| pose.residual(self.intrinsics, &self.object[i], &self.image[i]))
            .collect::<Option<_>>()?;

        let mut columns: Vec<Vec<Vector2<f64>>> = Vec::with_capacity(6);
        let mut steps = [0.0; 6];
        for (j, step) in steps.iter_mut().enumerate() {
            *step = 1e-7 * params[j].abs().max(1.0);
            let mut shifted = *params;
            shifted[j] += *step;
            let shifted_pose = Pose::from_params(&shifted);
            let col = indices
                .iter()
                .map(|&i| shifted_pose.residual(self.intrinsics, &self.object[i], &self.image[i]))
                .collect::<Option<Vec<_>>>()?;
            columns.push(col);
        }

        let mut jtj = Matrix6::zeros();
        let mut jtr = Vector6::zeros();
        for (row, r) in base.iter().enumerate() {
            for axis in 0..2 {
                let mut jrow = [0.0; 6];
                for j in 0..6 {
                    jrow[j] = (columns[j][row][axis] - r[axis]) / steps[j];
                }
                for a in 0..6 {
                    jtr[a] += jrow[a] * r[axis];
                    for b in 0..6 {
                        jtj[(a, b)] += jrow[a] * jrow[b];
                    }
                }
            }
        }
        Some((jtj, jtr))
    }

    /// Levenberg-Marquardt refinement of `pose` over `indices`.
    fn refine(&self, pose: Pose, indices: &[usize], max_iterations: usize) -> Option<Pose> {
        let mut params = pose.params();
        let mut cost = self.sum_squared_error(&pose, indices)?;
        let mut lambda = 1e-3;

        for _ in 0..max_iterations {
            if cost < 1e-20 {
                break;
            }
            let (jtj, jtr) = self.normal_equations(&params, indices)?;

            let mut improved = false;
            for _ in 0..10 {
                let mut damped = jtj;
                for i in 0..6 {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
                }
                let Some(chol) = damped.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let delta = chol.solve(&(-jtr));
                let candidate = params + delta;
                match self.sum_squared_error(&Pose::from_params(&candidate), indices) {
                    Some(c) if c < cost => {
                        let relative = (cost - c) / cost.max(f64::EPSILON);
                        params = candidate;
                        cost = c;
                        lambda = (lambda / 10.0).max(1e-12);
                        improved = relative > 1e-12 && delta.norm() > 1e-12;
                        break;
                    }
                    _ => lambda *= 10.0,
                }
            }
            if !improved {
                break;
            }
        }

        let refined = Pose::from_params(&params);
        refined.is_finite().then_some(refined)
    }

    fn inliers(&self, pose: &Pose, threshold_px: f64) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| pose.error_px(self.intrinsics, &self.object[i], &self.image[i]) < threshold_px)
            .collect()
    }

    fn rms(&self, pose: &Pose) -> Option<f64> {
        let all: Vec<usize> = (0..self.len()).collect();
        let sse = self.sum_squared_error(pose, &all)?;
        Some((sse / self.len() as f64).sqrt())
    }
}

/// Iterations needed to hit `confidence` given the current inlier ratio.
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let p_good = inlier_ratio.powi(MIN_CORRESPONDENCES as i32);
    if p_good <= f64::EPSILON {
        return max_iterations;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if !k.is_finite() {
        return max_iterations;
    }
    (k.ceil() as usize).clamp(1, max_iterations)
}

/// Validate reprojection of `points_3d` onto `points_2d` under `snapshot`.
///
/// Returns an error only for malformed input (length mismatch). Too few
/// usable points or a failed estimate yield the `PNP_FAILURE_RMS` sentinel.
pub fn validate_reprojection(
    points_3d: &[[f64; 3]],
    points_2d: &[[f64; 2]],
    snapshot: &CameraSnapshot,
    config: &PnpConfig,
) -> VisionResult<ReprojectionReport> {
    if points_3d.len() != points_2d.len() {
        return Err(VisionError::CorrespondenceLengthMismatch {
            points_3d: points_3d.len(),
            points_2d: points_2d.len(),
        });
    }

    let mut data = Correspondences {
        intrinsics: &snapshot.intrinsics,
        object: Vec::with_capacity(points_3d.len()),
        image: Vec::with_capacity(points_2d.len()),
    };
    for (p3, p2) in points_3d.iter().zip(points_2d) {
        if snapshot.is_in_front(*p3) && p2.iter().all(|v| v.is_finite()) {
            data.object.push(Vector3::from(*p3));
            data.image.push(Vector2::from(*p2));
        }
    }

    let n = data.len();
    if n < MIN_CORRESPONDENCES {
        debug!(
            total = points_3d.len(),
            valid = n,
            "Too few correspondences for PnP"
        );
        return Ok(ReprojectionReport::failure(n, true));
    }

    let seed_pose = Pose::from_snapshot(snapshot);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut best: Option<(Pose, Vec<usize>, f64)> = None;
    let mut needed = config.max_iterations.max(1);
    let mut iteration = 0;

    while iteration < needed {
        iteration += 1;
        let sample = rand::seq::index::sample(&mut rng, n, MIN_CORRESPONDENCES).into_vec();

        let Some(pose) = data.refine(seed_pose, &sample, config.refine_iterations) else {
            continue;
        };
        let inliers = data.inliers(&pose, config.inlier_threshold_px);
        if inliers.len() < MIN_CORRESPONDENCES {
            continue;
        }
        let score = data.sum_squared_error(&pose, &inliers).unwrap_or(f64::INFINITY);

        let better = match &best {
            None => true,
            Some((_, best_inliers, best_score)) => {
                inliers.len() > best_inliers.len()
                    || (inliers.len() == best_inliers.len() && score < *best_score)
            }
        };
        if better {
            let ratio = inliers.len() as f64 / n as f64;
            needed = required_iterations(ratio, config.confidence, config.max_iterations).max(iteration);
            best = Some((pose, inliers, score));
        }
    }

    let Some((pose, inliers, _)) = best else {
        debug!(valid = n, iterations = iteration, "PnP found no consensus set");
        return Ok(ReprojectionReport::failure(n, false));
    };

    let refined = data
        .refine(pose, &inliers, config.refine_iterations)
        .unwrap_or(pose);

    match data.rms(&refined).filter(|v| v.is_finite()) {
        Some(rms_px) => {
            debug!(
                valid = n,
                inliers = inliers.len(),
                iterations = iteration,
                rms_px,
                "PnP converged"
            );
            Ok(ReprojectionReport {
                rms_px,
                valid_points: n,
                inliers: inliers.len(),
                converged: true,
                insufficient_correspondences: false,
            })
        }
        None => Ok(ReprojectionReport::failure(n, false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CameraSnapshot {
        let rot = Rotation3::from_euler_angles(0.1, -0.2, 0.05);
        let m = rot.matrix();
        let mut rotation = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                rotation[r][c] = m[(r, c)];
            }
        }
        CameraSnapshot {
            intrinsics: Intrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 240.0,
            },
            rotation,
            translation: [0.1, -0.05, 6.0],
            distortion: [0.0; 5],
            resolution: (640, 480),
        }
    }

    fn object_points() -> Vec<[f64; 3]> {
        vec![
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.2],
            [1.0, 1.0, -0.3],
            [-1.0, 1.0, 0.1],
            [0.0, 0.5, 0.8],
            [0.5, -0.5, -0.6],
            [-0.7, 0.2, 0.4],
            [0.3, 0.9, -0.2],
        ]
    }

    fn project_all(snap: &CameraSnapshot, pts: &[[f64; 3]]) -> Vec<[f64; 2]> {
        pts.iter().map(|p| snap.project(*p).unwrap()).collect()
    }

    #[test]
    fn test_consistent_pose_has_low_rms() {
        let snap = snapshot();
        let pts = object_points();
        let img = project_all(&snap, &pts);

        let report = validate_reprojection(&pts, &img, &snap, &PnpConfig::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.valid_points, 8);
        assert_eq!(report.inliers, 8);
        assert!(report.rms_px < 0.05, "rms was {}", report.rms_px);
    }

    #[test]
    fn test_rms_non_decreasing_in_perturbation() {
        let snap = snapshot();
        let pts = object_points();
        let clean = project_all(&snap, &pts);

        let mut previous = 0.0;
        for d in [0.0, 0.5, 1.0, 2.0, 4.0, 16.0] {
            let mut img = clean.clone();
            img[2][0] += d;
            let report = validate_reprojection(&pts, &img, &snap, &PnpConfig::default()).unwrap();
            assert!(report.converged);
            assert!(
                report.rms_px + 1e-6 >= previous,
                "rms {} dropped below {} at d={}",
                report.rms_px,
                previous,
                d
            );
            previous = report.rms_px;
        }
        assert!(previous > 1.0);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let snap = snapshot();
        let pts = &object_points()[..5];
        let img = vec![[0.0, 0.0]; 3];

        let err = validate_reprojection(pts, &img, &snap, &PnpConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            VisionError::CorrespondenceLengthMismatch {
                points_3d: 5,
                points_2d: 3
            }
        ));
    }

    #[test]
    fn test_too_few_points_yields_sentinel() {
        let snap = snapshot();
        let pts = &object_points()[..3];
        let img = project_all(&snap, pts);

        let report = validate_reprojection(pts, &img, &snap, &PnpConfig::default()).unwrap();
        assert_eq!(report.rms_px, PNP_FAILURE_RMS);
        assert!(report.insufficient_correspondences);
        assert!(report.is_failure());
    }

    #[test]
    fn test_points_behind_camera_are_filtered() {
        let snap = snapshot();
        let mut pts = object_points()[..4].to_vec();
        let mut img = project_all(&snap, &pts);
        // Far behind the camera plane
        pts.push([0.0, 0.0, -50.0]);
        img.push([320.0, 240.0]);
        pts[0] = [0.0, 0.0, -40.0];

        let report = validate_reprojection(&pts, &img, &snap, &PnpConfig::default()).unwrap();
        assert_eq!(report.valid_points, 3);
        assert!(report.insufficient_correspondences);
        assert_eq!(report.rms_px, PNP_FAILURE_RMS);
    }

    #[test]
    fn test_deterministic() {
        let snap = snapshot();
        let pts = object_points();
        let mut img = project_all(&snap, &pts);
        img[5][1] += 30.0;

        let a = validate_reprojection(&pts, &img, &snap, &PnpConfig::default()).unwrap();
        let b = validate_reprojection(&pts, &img, &snap, &PnpConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_required_iterations() {
        assert_eq!(required_iterations(1.0, 0.99, 100), 1);
        assert_eq!(required_iterations(0.0, 0.99, 100), 100);
        let k = required_iterations(0.5, 0.99, 100);
        assert!(k > 1 && k <= 100);
    }
}
