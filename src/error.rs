//! Error types for deskpipe

use thiserror::Error;

/// Result type alias for deskpipe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification shared by every session type.
///
/// Each kind maps to a fixed negative status code on the flat C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unsupported codec/back-end/format combination or adapter id
    InvalidConfig,
    /// Odd, zero or oversized dimensions, or a buffer that does not match its layout
    InvalidGeometry,
    /// Capture, muxer file or surface I/O failed; the caller may retry
    TransientIo,
    /// Device or codec session allocation failed
    OutOfResources,
    /// Undecodable compressed input; the session stays usable
    MalformedInput,
    /// Operation called in the wrong state
    ContractViolation,
}

impl ErrorKind {
    /// Status code used by the flat interface (always negative)
    pub const fn status(self) -> i32 {
        match self {
            ErrorKind::InvalidConfig => -1,
            ErrorKind::InvalidGeometry => -2,
            ErrorKind::TransientIo => -3,
            ErrorKind::OutOfResources => -4,
            ErrorKind::MalformedInput => -5,
            ErrorKind::ContractViolation => -6,
        }
    }
}

/// deskpipe error type
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pixel format: {0}")]
    InvalidFormat(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("No GPU adapter with id {0:#018x}")]
    UnsupportedAdapter(u64),

    // Runtime errors
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    // Backend errors
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    // Capture errors
    #[error("Portal error: {0}")]
    Portal(String),

    #[error("PipeWire error: {0}")]
    PipeWire(String),

    #[error("Capture ended")]
    CaptureEnded,

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error into the shared taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidFormat(_)
            | Error::UnsupportedAdapter(_)
            | Error::FFmpeg(_)
            | Error::Portal(_)
            | Error::Config(_) => ErrorKind::InvalidConfig,
            Error::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            Error::TransientIo(_) | Error::PipeWire(_) | Error::CaptureEnded | Error::Io(_) => {
                ErrorKind::TransientIo
            }
            Error::OutOfResources(_) | Error::Gpu(_) => ErrorKind::OutOfResources,
            Error::MalformedInput(_) => ErrorKind::MalformedInput,
            Error::ContractViolation(_) => ErrorKind::ContractViolation,
        }
    }

    /// Negative status code for the flat interface
    pub fn status(&self) -> i32 {
        self.kind().status()
    }

    /// Check if the session that produced this error is still usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientIo | ErrorKind::MalformedInput
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
