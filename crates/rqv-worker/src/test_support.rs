//! Fakes shared by the worker's unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array2;
use rqv_vision::{extract_camera_snapshot, RendererCameraState, SensorFit};

use crate::error::{WorkerError, WorkerResult};
use crate::quality::ReferencePoints;
use crate::renderer::{RenderOutput, RenderRequest, SceneRenderer};

const SIZE: u32 = 64;

pub fn flat_image() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(SIZE, SIZE, Luma([128])))
}

/// Alternating black/white pixels: maximal high-pass noise.
pub fn checkerboard() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(SIZE, SIZE, |x, y| {
        Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
    }))
}

pub fn camera_state() -> RendererCameraState {
    RendererCameraState {
        focal_length_mm: 50.0,
        sensor_width_mm: 36.0,
        sensor_height_mm: 36.0,
        sensor_fit: SensorFit::Auto,
        world_matrix: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 5.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
        resolution_x: SIZE,
        resolution_y: SIZE,
    }
}

fn landmarks(camera: &RendererCameraState) -> ReferencePoints {
    let Ok(snapshot) = extract_camera_snapshot(camera) else {
        return ReferencePoints::default();
    };
    let points_3d: Vec<[f64; 3]> = vec![
        [-0.5, -0.5, 0.0],
        [0.5, -0.5, 0.2],
        [0.5, 0.5, -0.1],
        [-0.5, 0.5, 0.3],
        [0.0, 0.0, 0.5],
        [0.2, -0.3, -0.4],
    ];
    let points_2d = points_3d.iter().filter_map(|p| snapshot.project(*p)).collect();
    ReferencePoints { points_3d, points_2d }
}

enum Behavior {
    Render(fn() -> DynamicImage),
    Timeout,
    Fail(&'static str),
}

/// Renderer that records every request and answers from a fixed behavior.
pub struct FakeRenderer {
    behavior: Behavior,
    requests: Mutex<Vec<RenderRequest>>,
}

impl FakeRenderer {
    pub fn rendering(image: fn() -> DynamicImage) -> Self {
        Self::with_behavior(Behavior::Render(image))
    }

    pub fn timing_out() -> Self {
        Self::with_behavior(Behavior::Timeout)
    }

    pub fn failing(message: &'static str) -> Self {
        Self::with_behavior(Behavior::Fail(message))
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn budgets(&self) -> Vec<u32> {
        self.requests.lock().unwrap().iter().map(|r| r.recipe.samples).collect()
    }

    pub fn last_request(&self) -> Option<RenderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SceneRenderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest) -> WorkerResult<RenderOutput> {
        self.requests.lock().unwrap().push(request.clone());
        match self.behavior {
            Behavior::Render(image) => {
                let camera = camera_state();
                Ok(RenderOutput {
                    image: image(),
                    reference_image: None,
                    depth: Some(Array2::from_elem((SIZE as usize, SIZE as usize), 5.0)),
                    reference_points: landmarks(&camera),
                    camera,
                    duration: Duration::from_millis(5),
                })
            }
            Behavior::Timeout => Err(WorkerError::RenderTimeout(600)),
            Behavior::Fail(message) => Err(WorkerError::render_failed(message)),
        }
    }
}
