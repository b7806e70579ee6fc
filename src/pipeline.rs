//! One call per frame: change detection, every configured detector, then
//! gestures.

use ndarray::Array4;

use crate::body::BodyPipeline;
use crate::cache::FrameChangeDetector;
use crate::config::Config;
use crate::error::Result;
use crate::face::FacePipeline;
use crate::gesture::{self, BlinkTracker};
use crate::hand::HandPipeline;
use crate::object::ObjectDetector;
use crate::result::{Canvas, FrameResult};
use crate::runtime::{CpuKernels, ImageKernels};

/// A `[1, H, W, 3]` frame normalized to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tensor: Array4<f32>,
    pub timestamp_ms: u64,
}

impl Frame {
    pub fn new(tensor: Array4<f32>, timestamp_ms: u64) -> Self {
        Self {
            tensor,
            timestamp_ms,
        }
    }

    pub fn canvas(&self) -> Canvas {
        let (_, height, width, _) = self.tensor.dim();
        Canvas { width, height }
    }
}

pub struct Pipeline {
    config: Config,
    kernels: Box<dyn ImageKernels>,
    face: Option<FacePipeline>,
    hand: Option<HandPipeline>,
    body: Option<BodyPipeline>,
    object: Option<ObjectDetector>,
    change: FrameChangeDetector,
    blinks: BlinkTracker,
}

impl Pipeline {
    /// Validates `config` and builds an empty pipeline on the CPU kernels.
    /// Stages are added with the `with_*` builders.
    pub fn new(config: Config) -> Result<Self> {
        let config = config.validate()?;
        Ok(Self {
            kernels: Box::new(CpuKernels),
            face: None,
            hand: None,
            body: None,
            object: None,
            change: FrameChangeDetector::new(config.cache_sensitivity),
            blinks: BlinkTracker::new(&config.gesture),
            config,
        })
    }

    pub fn with_kernels(mut self, kernels: Box<dyn ImageKernels>) -> Self {
        self.kernels = kernels;
        self
    }

    pub fn with_face(mut self, face: FacePipeline) -> Self {
        self.face = Some(face);
        self
    }

    pub fn with_hand(mut self, hand: HandPipeline) -> Self {
        self.hand = Some(hand);
        self
    }

    pub fn with_body(mut self, body: BodyPipeline) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_object(mut self, object: ObjectDetector) -> Self {
        self.object = Some(object);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs every configured stage on `frame`. Stages that are not loaded
    /// contribute empty lists.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameResult> {
        let _span = tracing::debug_span!("process", timestamp_ms = frame.timestamp_ms).entered();
        let canvas = frame.canvas();
        let mut result = FrameResult {
            timestamp_ms: frame.timestamp_ms,
            canvas,
            ..FrameResult::default()
        };
        if canvas.width == 0 || canvas.height == 0 {
            tracing::debug!("empty frame");
            return Ok(result);
        }

        let image = &frame.tensor;
        let kernels = self.kernels.as_ref();
        let now = frame.timestamp_ms;
        let unchanged = self.change.is_unchanged(image);

        if let Some(face) = self.face.as_mut() {
            result.face = face.predict(image, kernels, now, unchanged)?;
        }
        if let Some(body) = self.body.as_mut() {
            result.body = body.predict(image, kernels, now, unchanged)?;
        }
        if let Some(hand) = self.hand.as_mut() {
            result.hand = hand.predict(image, kernels, now, unchanged)?;
        }
        if let Some(object) = self.object.as_mut() {
            result.object = object.predict(image, kernels, now, unchanged)?;
        }

        let mut gestures = gesture::face(&result.face);
        let blinked = self.blinks.update(&gestures, now);
        gestures.extend(blinked);
        gestures.extend(gesture::iris(&result.face));
        gestures.extend(gesture::body(&result.body));
        gestures.extend(gesture::hand(&result.hand));
        result.gesture = gestures;

        tracing::debug!(
            faces = result.face.len(),
            bodies = result.body.len(),
            hands = result.hand.len(),
            objects = result.object.len(),
            gestures = result.gesture.len(),
            unchanged,
            "frame processed"
        );
        Ok(result)
    }

    /// Drops every cached box and the blink history.
    pub fn reset(&mut self) {
        if let Some(face) = self.face.as_mut() {
            face.reset();
        }
        if let Some(hand) = self.hand.as_mut() {
            hand.reset();
        }
        if let Some(body) = self.body.as_mut() {
            body.reset();
        }
        if let Some(object) = self.object.as_mut() {
            object.reset();
        }
        self.change.reset();
        self.blinks.reset();
    }
}
