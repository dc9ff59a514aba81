use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required meta file missing: {}", .0.display())]
    MissingMeta(PathBuf),

    #[error("Invalid meta file {}: {message}", path.display())]
    InvalidMeta { path: PathBuf, message: String },

    #[error("Text completion failed: {message}")]
    Completion { message: String },
}

pub type Result<T> = std::result::Result<T, KpiError>;

/// Why a single KPI fetch produced no usable observations.
///
/// Every variant leads to the same placeholder policy; the distinction only
/// drives logging, side artifacts and the run report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchFailure {
    #[error("network failure: {0}")]
    Network(String),

    #[error("source missing: {0}")]
    MissingSource(String),

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("format failure: {0}")]
    Format(String),

    #[error("empty result: {0}")]
    Empty(String),
}

impl FetchFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Network(_) => "network",
            FetchFailure::MissingSource(_) => "missing_source",
            FetchFailure::Decode(_) => "decode",
            FetchFailure::Format(_) => "format",
            FetchFailure::Empty(_) => "empty",
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchFailure::Network(format!("timeout: {err}"))
        } else {
            FetchFailure::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor is not a JSON object")]
    NotAnObject,

    #[error("descriptor has no filename")]
    MissingFilename,

    #[error("duplicate KPI identifier '{0}'")]
    Duplicate(String),

    #[error("unknown source_type '{0}'")]
    UnknownSourceType(String),

    #[error("source_type '{0}' requires a source_code")]
    MissingSourceCode(String),

    #[error("unknown sort policy '{0}'")]
    InvalidSort(String),

    #[error("target_value '{0}' is not numeric")]
    InvalidTarget(String),
}
