//! Image quality metrics for a rendered frame.
//!
//! SSIM is taken against a reference render when one is supplied, otherwise
//! against a Gaussian-blurred copy of the frame itself (a structural
//! self-consistency check).

use image::{imageops, DynamicImage};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{VisionError, VisionResult};
use crate::noise::{high_pass_residual, luma_array, std_dev};

const SSIM_WINDOW: usize = 8;
const SSIM_STRIDE: usize = 4;
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);
const SELF_REFERENCE_SIGMA: f32 = 1.5;
const SNR_CAP_DB: f64 = 100.0;
/// Laplacian variance at which normalised sharpness reaches 0.5
const SHARPNESS_KNEE: f64 = 100.0;

/// Metrics derived from the rendered image alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageMetrics {
    pub ssim: f64,
    /// dB, capped at 100
    pub snr: f64,
    /// Normalised Laplacian variance in [0, 1)
    pub sharpness: f64,
    /// Luma standard deviation / 255
    pub contrast: f64,
    pub noise: f64,
}

pub fn compute_image_metrics(
    image: &DynamicImage,
    reference: Option<&DynamicImage>,
) -> VisionResult<ImageMetrics> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        return Err(VisionError::InvalidImage(format!(
            "image {}x{} smaller than the {}px SSIM window",
            w, h, SSIM_WINDOW
        )));
    }

    let luma = luma_array(image);
    let reference_luma = match reference {
        Some(r) => {
            if r.width() != image.width() || r.height() != image.height() {
                return Err(VisionError::InvalidImage(format!(
                    "reference is {}x{}, render is {}x{}",
                    r.width(),
                    r.height(),
                    w,
                    h
                )));
            }
            luma_array(r)
        }
        None => luma_array(&DynamicImage::ImageLuma8(imageops::blur(
            &image.to_luma8(),
            SELF_REFERENCE_SIGMA,
        ))),
    };

    let residual = high_pass_residual(&luma);
    let noise_std = std_dev(&residual);

    Ok(ImageMetrics {
        ssim: ssim(&luma, &reference_luma),
        snr: snr(&luma, noise_std),
        sharpness: sharpness(&luma),
        contrast: std_dev(&luma) / 255.0,
        noise: noise_std / 255.0,
    })
}

/// Mean SSIM over 8x8 windows at stride 4.
fn ssim(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    let (rows, cols) = a.dim();
    let mut total = 0.0;
    let mut windows = 0usize;

    let mut y = 0;
    while y + SSIM_WINDOW <= rows {
        let mut x = 0;
        while x + SSIM_WINDOW <= cols {
            let wa = a.slice(s![y..y + SSIM_WINDOW, x..x + SSIM_WINDOW]);
            let wb = b.slice(s![y..y + SSIM_WINDOW, x..x + SSIM_WINDOW]);
            let n = wa.len() as f64;

            let mu_a = wa.sum() / n;
            let mu_b = wb.sum() / n;
            let mut var_a = 0.0;
            let mut var_b = 0.0;
            let mut cov = 0.0;
            for (pa, pb) in wa.iter().zip(wb.iter()) {
                let da = pa - mu_a;
                let db = pb - mu_b;
                var_a += da * da;
                var_b += db * db;
                cov += da * db;
            }
            var_a /= n;
            var_b /= n;
            cov /= n;

            total += ((2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * cov + SSIM_C2))
                / ((mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2));
            windows += 1;
            x += SSIM_STRIDE;
        }
        y += SSIM_STRIDE;
    }

    if windows == 0 {
        0.0
    } else {
        total / windows as f64
    }
}

fn snr(luma: &Array2<f64>, noise_std: f64) -> f64 {
    let mean = luma.sum() / luma.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    if noise_std <= f64::EPSILON {
        return SNR_CAP_DB;
    }
    (20.0 * (mean / noise_std).log10()).clamp(0.0, SNR_CAP_DB)
}

fn sharpness(luma: &Array2<f64>) -> f64 {
    let (rows, cols) = luma.dim();
    if rows < 3 || cols < 3 {
        return 0.0;
    }
    let interior = luma.slice(s![1..rows - 1, 1..cols - 1]);
    let laplacian = Array2::from_shape_fn(interior.dim(), |(y, x)| {
        let (y, x) = (y + 1, x + 1);
        luma[[y - 1, x]] + luma[[y + 1, x]] + luma[[y, x - 1]] + luma[[y, x + 1]] - 4.0 * luma[[y, x]]
    });
    let v = std_dev(&laplacian).powi(2);
    v / (v + SHARPNESS_KNEE)
}
