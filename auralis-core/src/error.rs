//! Error kinds surfaced by the auralis-core control plane.
//!
//! Every variant maps onto exactly one `kind` string in the job response
//! schema (see `AuralisError::kind_str`). Components classify whatever their
//! immediate collaborator raised into one of these variants before
//! re-surfacing it — callers outside `auralis-core` should never need to
//! match on anything but `kind_str()` and `message()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuralisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown voice: {0}")]
    UnknownVoice(UnknownVoiceDetail),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("worker is shutting down")]
    ShuttingDown,

    #[error("job exceeded its time budget")]
    Timeout,

    #[error("chunk {chunk_index} produced no audio after retry")]
    GenerationEmpty { chunk_index: usize },

    #[error("model or codec error: {0}")]
    ModelError(String),

    #[error("inline payload of {size} bytes exceeds the {cap} byte cap")]
    PayloadTooLarge { size: usize, cap: usize },

    #[error("external sink unavailable after {attempts} attempts: {last_error}")]
    SinkUnavailable { attempts: u32, last_error: String },

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct UnknownVoiceDetail {
    pub requested: String,
    pub suggestions: Vec<String>,
}

impl std::fmt::Display for UnknownVoiceDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.requested)
    }
}

impl AuralisError {
    /// The `error.kind` string from the external response schema (§7).
    pub fn kind_str(&self) -> &'static str {
        match self {
            AuralisError::InvalidInput(_) => "InvalidInput",
            AuralisError::UnknownVoice(_) => "UnknownVoice",
            AuralisError::ConfigMissing(_) => "ConfigMissing",
            AuralisError::ShuttingDown => "ShuttingDown",
            AuralisError::Timeout => "Timeout",
            AuralisError::GenerationEmpty { .. } => "GenerationEmpty",
            AuralisError::ModelError(_) => "ModelError",
            AuralisError::PayloadTooLarge { .. } => "PayloadTooLarge",
            AuralisError::SinkUnavailable { .. } => "SinkUnavailable",
            AuralisError::ModelNotFound { .. } => "ConfigMissing",
            AuralisError::Io(_) => "Internal",
            AuralisError::Internal(_) => "Internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuralisError>;
