use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the post-processing pipelines.
///
/// Most of these are recovered locally (an entity is dropped, a refiner is
/// skipped); only `Shape`, `Runtime` and `Config` normally reach the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no detections in input")]
    EmptyInput,

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    #[error("model not loaded: {0}")]
    ModelUnavailable(&'static str),

    #[error("non-finite value in {0}")]
    NumericInstability(&'static str),

    #[error("unexpected {what} shape {actual:?}, expected {expected}")]
    Shape {
        what: &'static str,
        expected: &'static str,
        actual: Vec<usize>,
    },

    #[error("tensor runtime failed")]
    Runtime(#[from] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn shape(what: &'static str, expected: &'static str, actual: &[usize]) -> Self {
        Error::Shape {
            what,
            expected,
            actual: actual.to_vec(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
