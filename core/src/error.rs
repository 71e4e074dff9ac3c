use thiserror::Error;

/// Failures that reject a whole call. Individual probe failures never surface
/// here; they are recorded on the result instead.
#[derive(Error, Debug)]
pub enum DiagError {
    #[error("invalid port range: {start}-{end}")]
    InvalidRange { start: u32, end: u32 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to resolve {host}: {message}")]
    DnsResolution { host: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export failed: {0}")]
    Export(String),
}

impl From<csv::Error> for DiagError {
    fn from(e: csv::Error) -> Self { DiagError::Export(e.to_string()) }
}

impl From<serde_json::Error> for DiagError {
    fn from(e: serde_json::Error) -> Self { DiagError::Export(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, DiagError>;
