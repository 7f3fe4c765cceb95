//! Renderer boundary.
//!
//! `CommandRenderer` launches the external renderer as a child process under
//! a hard wall-clock timeout and reads back what it wrote to the output
//! directory:
//!
//! - `render.png` (required)
//! - `camera.json` (required, `RendererCameraState`)
//! - `depth.f32` (raw little-endian f32, width x height)
//! - `landmarks.json` (`ReferencePoints`)
//! - `reference.png` (clean reference render for SSIM)

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array2;
use rqv_models::RetryRecipe;
use rqv_vision::{read_depth_buffer, RendererCameraState};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::quality::ReferencePoints;
use crate::recipe::{render_invocation, RenderTarget, RendererSettings};
use crate::scene_cache::MaterialSpec;

pub const RENDER_FILE: &str = "render.png";
pub const DEPTH_FILE: &str = "depth.f32";
pub const CAMERA_FILE: &str = "camera.json";
pub const LANDMARKS_FILE: &str = "landmarks.json";
pub const REFERENCE_FILE: &str = "reference.png";

/// Longest stderr excerpt kept in a render failure message.
const STDERR_TAIL: usize = 2000;

/// One render to perform.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub target: RenderTarget,
    pub recipe: RetryRecipe,
    pub material: MaterialSpec,
}

/// Everything a render produced.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub image: DynamicImage,
    pub reference_image: Option<DynamicImage>,
    /// `None` when the buffer was missing or undecodable
    pub depth: Option<Array2<f32>>,
    pub camera: RendererCameraState,
    pub reference_points: ReferencePoints,
    pub duration: Duration,
}

#[async_trait]
pub trait SceneRenderer: Send + Sync {
    /// Render one request. A timeout is reported as `WorkerError::RenderTimeout`.
    async fn render(&self, request: &RenderRequest) -> WorkerResult<RenderOutput>;
}

/// Runs the renderer executable built by `render_invocation`.
pub struct CommandRenderer {
    settings: RendererSettings,
}

impl CommandRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SceneRenderer for CommandRenderer {
    async fn render(&self, request: &RenderRequest) -> WorkerResult<RenderOutput> {
        let invocation = render_invocation(&request.recipe, &request.target, &self.settings);
        tokio::fs::create_dir_all(invocation.output_dir()).await?;

        let mut args = invocation.build_args();
        args.push("--material".to_string());
        args.push(serde_json::to_string(&request.material)?);
        debug!("Running renderer: {} {}", invocation.program(), args.join(" "));

        let started = Instant::now();
        let child = Command::new(invocation.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::render_failed(format!("Failed to start {}: {}", invocation.program(), e)))?;

        let limit = invocation.time_limit();
        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    sample_id = %request.target.sample_id,
                    "Renderer timed out after {} seconds, killing process",
                    limit.as_secs()
                );
                return Err(WorkerError::RenderTimeout(limit.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(tail_start..).unwrap_or(&stderr);
            return Err(WorkerError::render_failed(format!(
                "renderer exited with {:?}: {}",
                output.status.code(),
                tail.trim()
            )));
        }

        let mut rendered = read_render_outputs(invocation.output_dir()).await?;
        rendered.duration = started.elapsed();
        Ok(rendered)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> WorkerResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn open_image(path: &Path) -> WorkerResult<Option<DynamicImage>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(image::open(path)?))
}

/// Read the files a renderer wrote into `dir`.
pub async fn read_render_outputs(dir: &Path) -> WorkerResult<RenderOutput> {
    let image = open_image(&dir.join(RENDER_FILE))?
        .ok_or_else(|| WorkerError::invalid_output(format!("{} missing", RENDER_FILE)))?;
    let camera: RendererCameraState = read_json(&dir.join(CAMERA_FILE))
        .await?
        .ok_or_else(|| WorkerError::invalid_output(format!("{} missing", CAMERA_FILE)))?;
    let reference_points: ReferencePoints = read_json(&dir.join(LANDMARKS_FILE)).await?.unwrap_or_default();
    let reference_image = open_image(&dir.join(REFERENCE_FILE))?;

    let depth = match read_depth_buffer(&dir.join(DEPTH_FILE), image.width(), image.height()) {
        Ok(depth) => Some(depth),
        Err(e) => {
            warn!(dir = %dir.display(), "Depth buffer unreadable: {}", e);
            None
        }
    };

    Ok(RenderOutput {
        image,
        reference_image,
        depth,
        camera,
        reference_points,
        duration: Duration::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rqv_models::SampleId;
    use rqv_vision::SensorFit;

    fn camera_state() -> RendererCameraState {
        RendererCameraState {
            focal_length_mm: 50.0,
            sensor_width_mm: 36.0,
            sensor_height_mm: 24.0,
            sensor_fit: SensorFit::Auto,
            world_matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 5.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
            resolution_x: 32,
            resolution_y: 32,
        }
    }

    fn write_outputs(dir: &Path, with_depth: bool) {
        GrayImage::from_fn(32, 32, |x, y| Luma([((x * 7 + y * 3) % 255) as u8]))
            .save(dir.join(RENDER_FILE))
            .unwrap();
        std::fs::write(dir.join(CAMERA_FILE), serde_json::to_vec(&camera_state()).unwrap()).unwrap();
        if with_depth {
            let bytes: Vec<u8> = (0..32 * 32).flat_map(|_| 5.0f32.to_le_bytes()).collect();
            std::fs::write(dir.join(DEPTH_FILE), bytes).unwrap();
        }
    }

    fn request(dir: &Path) -> RenderRequest {
        RenderRequest {
            target: RenderTarget {
                sample_id: SampleId::from("s-1"),
                descriptor: "brick".into(),
                color: None,
                output_dir: dir.to_path_buf(),
            },
            recipe: crate::recipe::default_recipe(),
            material: MaterialSpec {
                name: "abs".into(),
                base_color: None,
                roughness: 0.4,
                metallic: 0.0,
                transmission: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn test_read_outputs() {
        let dir = tempfile::tempdir().unwrap();
        write_outputs(dir.path(), true);

        let out = read_render_outputs(dir.path()).await.unwrap();
        assert_eq!(out.image.width(), 32);
        assert!(out.depth.is_some());
        assert!(out.reference_image.is_none());
        assert!(out.reference_points.points_3d.is_empty());
        assert_eq!(out.camera, camera_state());
    }

    #[tokio::test]
    async fn test_missing_depth_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_outputs(dir.path(), false);
        assert!(read_render_outputs(dir.path()).await.unwrap().depth.is_none());
    }

    #[tokio::test]
    async fn test_missing_render_is_invalid_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_render_outputs(dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidOutput(_)));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = CommandRenderer::new(RendererSettings {
            program: script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 5\n"),
            script: None,
            timeout: Duration::from_millis(200),
        });

        let started = Instant::now();
        let err = renderer.render(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, WorkerError::RenderTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_render_failure() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = CommandRenderer::new(RendererSettings {
            program: script(dir.path(), "fail.sh", "#!/bin/sh\necho 'scene build exploded' >&2\nexit 3\n"),
            script: None,
            timeout: Duration::from_secs(10),
        });
        let err = renderer.render(&request(dir.path())).await.unwrap_err();
        match err {
            WorkerError::RenderFailed(msg) => assert!(msg.contains("scene build exploded")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
