//! BlockSnap
//!
//! Semantic UI-block detection and multi-context page capture.
//!
//! Point at a node in a rendered page and [`detect::find_best_block`] walks
//! its ancestors, scores each one and returns the block that best represents
//! "the thing under the cursor". Capture sessions then snapshot that block,
//! the visible viewport, a dragged region or the whole scrollable page,
//! passing images between an observer, a coordinator and a rendering helper
//! over an asynchronous message bus.
//!
//! # Features
//!
//! - **fixture** (default): an HTML page host with inline-style geometry and
//!   a solid-rectangle rasterizer, used by the CLI and the tests
//! - **cdp**: a headless Chrome tab as snapshot source and page driver
//!
//! # Example
//!
//! ```no_run
//! use blocksnap::fixture::FixturePage;
//! use blocksnap::{detect, BlockDetectionConfig, Viewport};
//! use blocksnap::detect::NodeSource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let page = FixturePage::parse(
//!     r#"<div class="card" style="left:10px;top:10px;width:300px;height:200px;background:#fff;border-radius:8px"></div>"#,
//!     Viewport { width: 1280.0, height: 720.0 },
//! )?;
//! let node = page.element_at_point(50.0, 50.0).expect("node");
//! let block = detect::find_best_block(&node, page.viewport(), &BlockDetectionConfig::default());
//! println!("{:?}", block.map(|b| b.summary()));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod geometry;
pub use geometry::Rect;

pub mod detect;
pub use detect::BlockDetectionConfig;

pub mod raster;
pub use raster::{DataUrl, RawImage};

pub mod transport;

pub mod capture;
pub use capture::{CaptureMetadata, CaptureMode, Dimensions, PageMetrics, Progress, SessionState};

pub mod coordinator;
pub mod handoff;
pub mod helper;
pub mod observer;

// Wires the three contexts over one bus
pub mod pipeline;

#[cfg(feature = "fixture")]
pub mod fixture;

#[cfg(feature = "cdp")]
pub mod cdp;

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280.0, height: 720.0 }
    }
}

/// Capture pipeline configuration
///
/// The defaults match the host's snapshot quota and the timeouts each
/// helper operation gets. All durations are in milliseconds.
///
/// # Examples
///
/// ```
/// let cfg = blocksnap::CaptureConfig::default();
/// assert_eq!(cfg.min_snapshot_interval_ms, 600);
/// assert_eq!(cfg.overlap, 50.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Vertical overlap between consecutive full-page tiles, CSS px
    pub overlap: f64,
    /// Wait after each scroll before the snapshot
    pub settle_delay_ms: u64,
    /// Minimum spacing between snapshot dispatches
    pub min_snapshot_interval_ms: u64,
    /// Crop round-trip (failure is fatal)
    pub crop_timeout_ms: u64,
    /// Stitch round-trip (failure is fatal)
    pub stitch_timeout_ms: u64,
    /// Clipboard round-trip (a timeout counts as success)
    pub clipboard_timeout_ms: u64,
    /// Dimension lookup (a timeout falls back to `fallback_dimensions`)
    pub dimensions_timeout_ms: u64,
    /// Measure and scroll round-trips to the observer
    pub page_timeout_ms: u64,
    /// How long a handoff record stays consumable
    pub handoff_validity_ms: u64,
    /// Reported when the dimension lookup times out
    pub fallback_dimensions: Dimensions,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            overlap: raster::DEFAULT_OVERLAP,
            settle_delay_ms: 150,
            min_snapshot_interval_ms: 600,
            crop_timeout_ms: 10_000,
            stitch_timeout_ms: 60_000,
            clipboard_timeout_ms: 3_000,
            dimensions_timeout_ms: 3_000,
            page_timeout_ms: 5_000,
            handoff_validity_ms: 60_000,
            fallback_dimensions: Dimensions { width: 1920, height: 1080 },
        }
    }
}

impl CaptureConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn min_snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.min_snapshot_interval_ms)
    }

    pub fn crop_timeout(&self) -> Duration {
        Duration::from_millis(self.crop_timeout_ms)
    }

    pub fn stitch_timeout(&self) -> Duration {
        Duration::from_millis(self.stitch_timeout_ms)
    }

    pub fn clipboard_timeout(&self) -> Duration {
        Duration::from_millis(self.clipboard_timeout_ms)
    }

    pub fn dimensions_timeout(&self) -> Duration {
        Duration::from_millis(self.dimensions_timeout_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn handoff_validity(&self) -> Duration {
        Duration::from_millis(self.handoff_validity_ms)
    }
}

/// Both configuration blocks, as read from `--config <file.json>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detection: BlockDetectionConfig,
    pub capture: CaptureConfig,
}

impl Settings {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.crop_timeout(), Duration::from_secs(10));
        assert_eq!(config.stitch_timeout(), Duration::from_secs(60));
        assert_eq!(config.fallback_dimensions, Dimensions { width: 1920, height: 1080 });
    }

    #[test]
    fn test_partial_settings() {
        let s = Settings::from_json(r#"{"capture":{"settle_delay_ms":10},"detection":{"min_width":20}}"#).expect("parse");
        assert_eq!(s.capture.settle_delay_ms, 10);
        assert_eq!(s.capture.min_snapshot_interval_ms, 600);
        assert_eq!(s.detection.min_width, 20.0);
        assert_eq!(s.detection.max_depth, 15);
    }

    #[test]
    fn test_viewport() {
        let viewport = Viewport::default();
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.height, 720.0);
    }
}
