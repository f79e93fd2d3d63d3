//! Capture sessions: modes, states, progress and the host seams the
//! orchestrator drives

pub mod orchestrator;
pub mod plan;
pub mod rate_limit;

pub use orchestrator::{CaptureHosts, CaptureOrchestrator, CaptureOutcome, CaptureRequest};
pub use plan::TilePlan;
pub use rate_limit::SnapshotRateLimiter;

use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::detect::SemanticType;
use crate::geometry::Rect;
use crate::raster::DataUrl;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Block,
    Visible,
    Region,
    FullPage,
}

impl CaptureMode {
    /// Modes whose single snapshot is cropped before delivery.
    pub fn crops(&self) -> bool {
        matches!(self, CaptureMode::Block | CaptureMode::Region)
    }
}

impl std::str::FromStr for CaptureMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "block" => Ok(CaptureMode::Block),
            "visible" => Ok(CaptureMode::Visible),
            "region" => Ok(CaptureMode::Region),
            "fullpage" | "full-page" => Ok(CaptureMode::FullPage),
            other => Err(crate::Error::ConfigError(format!("unknown capture mode '{}'", other))),
        }
    }
}

/// Session lifecycle. Serialized lowercase as the progress `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Preparing,
    Scrolling,
    Capturing,
    Stitching,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed | SessionState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_step: usize,
    pub total_steps: usize,
    pub status: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Describes a captured image for the handoff record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub url: String,
    pub title: String,
    pub element_type: SemanticType,
    pub label: String,
    /// CSS pixels
    pub dimensions: Dimensions,
    /// Unix milliseconds
    pub captured_at: u64,
}

impl CaptureMetadata {
    /// Metadata stamped with the current time; `width`/`height` are rounded.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        element_type: SemanticType,
        label: impl Into<String>,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            element_type,
            label: label.into(),
            dimensions: Dimensions { width: width.round().max(0.0) as u32, height: height.round().max(0.0) as u32 },
            captured_at: unix_millis(),
        }
    }
}

/// Scroll geometry of the page, as measured by the observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub viewport_width: f64,
    pub viewport_height: f64,
    /// Never smaller than `viewport_height`
    pub scroll_height: f64,
    pub scroll_y: f64,
    pub device_pixel_ratio: f64,
}

/// Session record owned by one orchestrator.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub mode: CaptureMode,
    pub started_at: Instant,
    pub tiles: Vec<DataUrl>,
    pub state: SessionState,
}

impl CaptureSession {
    pub fn new(mode: CaptureMode) -> Self {
        Self { mode, started_at: Instant::now(), tiles: Vec::new(), state: SessionState::Idle }
    }
}

/// Snapshot of the currently visible viewport.
pub trait SnapshotSource: Send + Sync {
    fn capture_visible(&self) -> BoxFuture<'_, Result<DataUrl>>;
}

/// Scroll control over the captured page.
pub trait PageDriver: Send + Sync {
    fn measure(&self) -> BoxFuture<'_, Result<PageMetrics>>;

    /// Scroll to `y` and resolve with the offset actually reached.
    fn scroll_to(&self, y: f64) -> BoxFuture<'_, Result<f64>>;
}

/// Image operations performed off the coordinator.
pub trait RasterService: Send + Sync {
    fn crop(&self, image: DataUrl, rect: Rect, device_pixel_ratio: f64) -> BoxFuture<'_, Result<DataUrl>>;

    fn stitch(
        &self,
        tiles: Vec<DataUrl>,
        viewport_height: f64,
        total_height: f64,
        device_pixel_ratio: f64,
    ) -> BoxFuture<'_, Result<DataUrl>>;

    fn copy_to_clipboard(&self, image: DataUrl) -> BoxFuture<'_, Result<()>>;

    /// Pixel dimensions of an encoded image.
    fn image_dimensions(&self, image: DataUrl) -> BoxFuture<'_, Result<Dimensions>>;
}

/// Receives every session transition.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Progress) {}
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings() {
        assert_eq!("fullpage".parse::<CaptureMode>().expect("mode"), CaptureMode::FullPage);
        assert!("video".parse::<CaptureMode>().is_err());
        assert_eq!(serde_json::to_string(&CaptureMode::FullPage).expect("json"), "\"fullpage\"");
        assert!(CaptureMode::Region.crops());
        assert!(!CaptureMode::Visible.crops());
    }

    #[test]
    fn progress_serializes_status_lowercase() {
        let p = Progress { current_step: 2, total_steps: 4, status: SessionState::Capturing };
        let v = serde_json::to_value(p).expect("json");
        assert_eq!(v, serde_json::json!({"currentStep": 2, "totalSteps": 4, "status": "capturing"}));
    }

    #[test]
    fn metadata_rounds_dimensions() {
        let m = CaptureMetadata::new("https://x", "X", SemanticType::Card, "Card", 99.6, 20.2);
        assert_eq!(m.dimensions, Dimensions { width: 100, height: 20 });
        assert!(m.captured_at > 0);
    }
}
