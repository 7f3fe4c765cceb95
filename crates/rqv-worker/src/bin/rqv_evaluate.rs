//! Evaluate one render output directory offline and print its metrics.
//!
//! Usage: `rqv-evaluate <dir>`. Thresholds come from `RQV_VALIDATION_CONFIG`
//! plus `RQV_` overrides, as in the worker.

use std::path::PathBuf;

use anyhow::Context;
use rqv_vision::extract_camera_snapshot;
use rqv_worker::renderer::read_render_outputs;
use rqv_worker::{evaluate_quality, ValidationConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: rqv-evaluate <render-output-dir>")?;
    let config_path = std::env::var("RQV_VALIDATION_CONFIG").ok().map(PathBuf::from);
    let config = ValidationConfig::load(config_path.as_deref())?;

    let output = read_render_outputs(&dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    if output.depth.is_none() {
        eprintln!("rqv-evaluate: depth buffer missing or unreadable");
    }

    let snapshot = extract_camera_snapshot(&output.camera)?;
    let metrics = evaluate_quality(
        &output.image,
        output.reference_image.as_ref(),
        output.depth.as_ref(),
        &snapshot,
        &output.reference_points,
        &config,
    )?;

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    if metrics.is_failed() {
        std::process::exit(2);
    }
    Ok(())
}
