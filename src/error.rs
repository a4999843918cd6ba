use thiserror::Error;

/// Error types for the beamline-rs library.
#[derive(Error, Debug)]
pub enum LatticeError {
    /// Structural problem while assembling a lattice (negative implicit drift,
    /// unsupported error specification, missing required attribute).
    #[error("Build error: {0}")]
    Build(String),

    /// Invalid physical configuration (unknown particle, incomplete beam,
    /// a tracked parameter hitting an excluded value).
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Operation that the element kind does not support.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Segment lookup with an unresolvable or ambiguous key.
    #[error("Index error: {0}")]
    Index(String),

    /// Segment lookup or criterion with an unsupported key type.
    #[error("Type error: {0}")]
    Type(String),

    /// Tracking request that cannot be served by an element.
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// Error for parameter-related problems.
    #[error("Parameter error: {0}")]
    Parameter(#[from] crate::parameters::ParameterError),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for beamline-rs operations.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Extensions for converting from other error types.
impl From<String> for LatticeError {
    fn from(s: String) -> Self {
        LatticeError::Other(s)
    }
}

impl From<&str> for LatticeError {
    fn from(s: &str) -> Self {
        LatticeError::Other(s.to_string())
    }
}
