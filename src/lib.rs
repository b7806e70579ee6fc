//! Post-processing for face, hand, body and object detection networks.
//!
//! Raw model outputs come in through [`runtime::GraphModel`]; the pipelines
//! decode boxes, remap landmarks into image space, classify gestures and
//! join everything into persons. [`interpolate::TemporalBuffer`] smooths the
//! results across frames.

pub mod body;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod detection;
pub mod error;
pub mod face;
pub mod face_detection;
pub mod face_landmarks;
pub mod geometry;
pub mod gesture;
pub mod hand;
pub mod interpolate;
pub mod object;
pub mod person;
pub mod pipeline;
pub mod remap;
pub mod result;
pub mod runtime;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use interpolate::TemporalBuffer;
pub use person::Person;
pub use pipeline::{Frame, Pipeline};
pub use result::FrameResult;
pub use runtime::{CpuKernels, GraphModel, ImageKernels};
