use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top level configuration, resolved once before any detector is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Relative change (in percent) between frames below which cached
    /// detector boxes may be reused. Zero disables skip-frame caching.
    pub cache_sensitivity: f32,
    pub face: FaceConfig,
    pub hand: HandConfig,
    pub body: BodyConfig,
    pub object: Option<DetectorConfig>,
    pub matching: MatchConfig,
    pub gesture: GestureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_sensitivity: 0.7,
            face: FaceConfig::default(),
            hand: HandConfig::default(),
            body: BodyConfig::default(),
            object: None,
            matching: MatchConfig::default(),
            gesture: GestureConfig::default(),
        }
    }
}

/// Settings shared by every box-producing detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorConfig {
    pub min_confidence: f32,
    pub iou_threshold: f32,
    pub max_detected: usize,
    pub skip_frames: u32,
    pub skip_time_ms: u64,
    pub rotation: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            iou_threshold: 0.1,
            max_detected: 1,
            skip_frames: 99,
            skip_time_ms: 2500,
            rotation: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FaceConfig {
    pub detector: DetectorConfig,
    pub mesh: Option<MeshConfig>,
    pub iris: Option<IrisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshConfig {
    /// Mesh confidence below this keeps the detector box without landmarks.
    pub min_confidence: f32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IrisConfig {
    /// Eye depth difference below which both eyes are refined.
    pub depth_threshold: f32,
}

impl Default for IrisConfig {
    fn default() -> Self {
        Self {
            depth_threshold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandConfig {
    pub detector: DetectorConfig,
    pub landmarks: bool,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig {
                min_confidence: 0.5,
                iou_threshold: 0.2,
                max_detected: 2,
                ..DetectorConfig::default()
            },
            landmarks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyModelKind {
    PoseNet,
    MoveNetSingle,
    MoveNetMulti,
    BlazePose,
    EfficientPose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BodyConfig {
    pub model: BodyModelKind,
    pub detector: DetectorConfig,
    /// PoseNet output stride in input pixels.
    pub output_stride: usize,
    /// PoseNet part-based suppression radius in input pixels.
    pub nms_radius: f32,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            model: BodyModelKind::MoveNetSingle,
            detector: DetectorConfig {
                min_confidence: 0.3,
                max_detected: 1,
                ..DetectorConfig::default()
            },
            output_stride: 16,
            nms_radius: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchConfig {
    /// Minkowski exponent.
    pub order: f32,
    /// Distance under which the gallery scan stops early.
    pub threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            order: 2.0,
            threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GestureConfig {
    pub blink_min_ms: u64,
    pub blink_max_ms: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            blink_min_ms: 50,
            blink_max_ms: 500,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()
    }

    /// Rejects values no detector can work with.
    pub fn validate(self) -> Result<Self> {
        if !(self.cache_sensitivity >= 0.0) {
            return Err(Error::Config(format!(
                "cacheSensitivity must be non-negative, got {}",
                self.cache_sensitivity
            )));
        }
        let detectors = [
            ("face.detector", Some(&self.face.detector)),
            ("hand.detector", Some(&self.hand.detector)),
            ("body.detector", Some(&self.body.detector)),
            ("object", self.object.as_ref()),
        ];
        for (name, detector) in detectors {
            if let Some(detector) = detector {
                detector.validate(name)?;
            }
        }
        if !(self.matching.order > 0.0) {
            return Err(Error::Config(format!(
                "matching.order must be positive, got {}",
                self.matching.order
            )));
        }
        if self.body.output_stride == 0 {
            return Err(Error::Config("body.outputStride must be positive".into()));
        }
        if self.gesture.blink_min_ms > self.gesture.blink_max_ms {
            return Err(Error::Config(
                "gesture.blinkMinMs must not exceed gesture.blinkMaxMs".into(),
            ));
        }
        Ok(self)
    }
}

impl DetectorConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "{name}.minConfidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(Error::Config(format!(
                "{name}.iouThreshold must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }
        if self.max_detected == 0 {
            return Err(Error::Config(format!("{name}.maxDetected must be positive")));
        }
        Ok(())
    }
}
