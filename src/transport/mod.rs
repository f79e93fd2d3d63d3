//! Typed messages between the observer, coordinator and rendering helper
//!
//! Every message is a `{type, payload}` object on the wire. Replies are
//! ordinary messages addressed back to the sender and carrying the
//! request's correlation id; nothing pairs them implicitly.

pub mod bus;
pub mod pending;

pub use bus::{Bus, Client, Endpoint, Inbox};
pub use pending::{PendingRequest, PendingTable};

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureMetadata, CaptureMode, PageMetrics, Progress};
use crate::geometry::Rect;
use crate::raster::{DataUrl, DEFAULT_OVERLAP};

/// The three isolated execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextId {
    /// Page-resident: runs the selector and scrolls the page
    Observer,
    /// Privileged: owns session state, rate limiting, the session guard
    Coordinator,
    /// Sandboxed: owns the compositor and the clipboard sink
    Helper,
}

fn default_overlap() -> f64 {
    DEFAULT_OVERLAP
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    // observer lifecycle
    ActivateCapture { mode: CaptureMode },
    DeactivateCapture,

    // observer -> coordinator
    CaptureElement { rect: Rect, device_pixel_ratio: f64, metadata: CaptureMetadata },
    CaptureVisiblePage { metadata: CaptureMetadata },
    CaptureRegion { rect: Rect, device_pixel_ratio: f64, metadata: CaptureMetadata },
    CaptureFullPage { metadata: CaptureMetadata },
    CancelCapture,
    CaptureResult { success: bool, error: Option<String> },

    // one raw snapshot through the coordinator's limiter
    CaptureViewportChunk,
    ViewportChunk { success: bool, data_url: Option<DataUrl>, error: Option<String> },

    // coordinator -> helper
    StitchImages {
        images: Vec<DataUrl>,
        viewport_height: f64,
        total_height: f64,
        device_pixel_ratio: f64,
        #[serde(default = "default_overlap")]
        overlap: f64,
    },
    StitchComplete { image_data_url: DataUrl },
    StitchError { error: String },
    CropImage { data_url: DataUrl, crop_rect: Rect, device_pixel_ratio: f64 },
    CropComplete { image_data_url: DataUrl },
    CropError { error: String },
    CopyToClipboard { data_url: DataUrl },
    ClipboardComplete,
    ClipboardError { error: String },
    GetImageDimensions { data_url: DataUrl },
    ImageDimensionsComplete { width: u32, height: u32 },
    ImageDimensionsError { error: String },

    // coordinator -> observer, to drive full-page scrolling
    MeasurePage,
    PageMeasured { metrics: PageMetrics },
    ScrollTo { y: f64 },
    ScrollComplete { y: f64 },
    Progress { progress: Progress },
}

/// Payload-free discriminant of [`Message`], used to declare which reply
/// types a pending request accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ActivateCapture,
    DeactivateCapture,
    CaptureElement,
    CaptureVisiblePage,
    CaptureRegion,
    CaptureFullPage,
    CancelCapture,
    CaptureResult,
    CaptureViewportChunk,
    ViewportChunk,
    StitchImages,
    StitchComplete,
    StitchError,
    CropImage,
    CropComplete,
    CropError,
    CopyToClipboard,
    ClipboardComplete,
    ClipboardError,
    GetImageDimensions,
    ImageDimensionsComplete,
    ImageDimensionsError,
    MeasurePage,
    PageMeasured,
    ScrollTo,
    ScrollComplete,
    Progress,
}

impl MessageKind {
    /// Replies are routed to the pending table, everything else to the
    /// context's inbox.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::CaptureResult
                | MessageKind::ViewportChunk
                | MessageKind::StitchComplete
                | MessageKind::StitchError
                | MessageKind::CropComplete
                | MessageKind::CropError
                | MessageKind::ClipboardComplete
                | MessageKind::ClipboardError
                | MessageKind::ImageDimensionsComplete
                | MessageKind::ImageDimensionsError
                | MessageKind::PageMeasured
                | MessageKind::ScrollComplete
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ActivateCapture { .. } => MessageKind::ActivateCapture,
            Message::DeactivateCapture => MessageKind::DeactivateCapture,
            Message::CaptureElement { .. } => MessageKind::CaptureElement,
            Message::CaptureVisiblePage { .. } => MessageKind::CaptureVisiblePage,
            Message::CaptureRegion { .. } => MessageKind::CaptureRegion,
            Message::CaptureFullPage { .. } => MessageKind::CaptureFullPage,
            Message::CancelCapture => MessageKind::CancelCapture,
            Message::CaptureResult { .. } => MessageKind::CaptureResult,
            Message::CaptureViewportChunk => MessageKind::CaptureViewportChunk,
            Message::ViewportChunk { .. } => MessageKind::ViewportChunk,
            Message::StitchImages { .. } => MessageKind::StitchImages,
            Message::StitchComplete { .. } => MessageKind::StitchComplete,
            Message::StitchError { .. } => MessageKind::StitchError,
            Message::CropImage { .. } => MessageKind::CropImage,
            Message::CropComplete { .. } => MessageKind::CropComplete,
            Message::CropError { .. } => MessageKind::CropError,
            Message::CopyToClipboard { .. } => MessageKind::CopyToClipboard,
            Message::ClipboardComplete => MessageKind::ClipboardComplete,
            Message::ClipboardError { .. } => MessageKind::ClipboardError,
            Message::GetImageDimensions { .. } => MessageKind::GetImageDimensions,
            Message::ImageDimensionsComplete { .. } => MessageKind::ImageDimensionsComplete,
            Message::ImageDimensionsError { .. } => MessageKind::ImageDimensionsError,
            Message::MeasurePage => MessageKind::MeasurePage,
            Message::PageMeasured { .. } => MessageKind::PageMeasured,
            Message::ScrollTo { .. } => MessageKind::ScrollTo,
            Message::ScrollComplete { .. } => MessageKind::ScrollComplete,
            Message::Progress { .. } => MessageKind::Progress,
        }
    }
}

/// A message in flight, addressed and tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub correlation_id: u64,
    pub from: ContextId,
    pub to: ContextId,
    pub message: Message,
}
