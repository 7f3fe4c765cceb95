//! Noise estimation from the high-pass residual of the luma channel.

use image::DynamicImage;
use ndarray::Array2;

/// Luma channel as `f64` in [0, 255], indexed `[[y, x]]`.
pub(crate) fn luma_array(image: &DynamicImage) -> Array2<f64> {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        f64::from(gray.get_pixel(x as u32, y as u32)[0])
    })
}

/// `luma - box3x3(luma)`, with edge pixels clamped.
pub(crate) fn high_pass_residual(luma: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = luma.dim();
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let mut sum = 0.0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let yy = (y as i64 + dy).clamp(0, rows as i64 - 1) as usize;
                let xx = (x as i64 + dx).clamp(0, cols as i64 - 1) as usize;
                sum += luma[[yy, xx]];
            }
        }
        luma[[y, x]] - sum / 9.0
    })
}

pub(crate) fn std_dev(values: &Array2<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.sum() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Standard deviation of the high-pass residual, normalised to [0, 1].
///
/// Returns 0 for an empty image.
pub fn estimate_noise(image: &DynamicImage) -> f64 {
    let luma = luma_array(image);
    if luma.is_empty() {
        return 0.0;
    }
    std_dev(&high_pass_residual(&luma)) / 255.0
}
