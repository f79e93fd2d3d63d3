//! Error types for block detection and capture sessions

use thiserror::Error;

/// Result type alias for blocksnap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a capture session or a helper request.
///
/// Finding no block under the cursor is not an error: the selector returns
/// `None` for that case.
#[derive(Error, Debug)]
pub enum Error {
    /// The host's snapshot quota was exceeded. The rate limiter exists so this
    /// never happens; seeing it means a call bypassed the limiter.
    #[error("Snapshot quota exceeded")]
    CaptureQuotaExceeded,

    /// A single full-page tile could not be captured
    #[error("Failed to capture tile {index}: {reason}")]
    TileCaptureFailed { index: usize, reason: String },

    /// Snapshot of the visible viewport failed
    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    /// Stitch was asked to compose zero tiles
    #[error("No images to stitch")]
    EmptyInput,

    /// Stitching failed in the rendering helper
    #[error("Stitch failed: {0}")]
    StitchFailed(String),

    /// Cropping failed in the rendering helper
    #[error("Crop failed: {0}")]
    CropFailed(String),

    /// Writing to the clipboard sink failed
    #[error("Clipboard error: {0}")]
    ClipboardWriteFailed(String),

    /// A request did not receive a matching reply in time
    #[error("{kind} timed out after {ms}ms")]
    TransportTimeout { kind: String, ms: u64 },

    /// The destination context is gone
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// A reply arrived with a type the caller did not expect
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A capture was requested while another session is running
    #[error("Capture already in progress")]
    SessionAlreadyActive,

    /// The session was cancelled by the user or superseded
    #[error("Capture cancelled")]
    Cancelled,

    /// Page measurements cannot produce a tile plan
    #[error("Invalid page metrics: {0}")]
    InvalidPageMetrics(String),

    /// A data URL could not be parsed
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or input document
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Single summarised message suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            Error::SessionAlreadyActive => "Capture already in progress".to_string(),
            Error::Cancelled => "Capture cancelled".to_string(),
            Error::TransportClosed(_) => "Background service unreachable. Reload extension.".to_string(),
            Error::TileCaptureFailed { .. } | Error::SnapshotFailed(_) | Error::CaptureQuotaExceeded => {
                "Failed to capture screenshot".to_string()
            }
            other => format!("Capture failed: {}", other),
        }
    }

    /// Whether this error reflects a user action rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
