//! Per-session capture state machine
//!
//! One orchestrator runs one session and is consumed by it. Every
//! suspension point (snapshot, scroll, settle delay, crop, stitch,
//! clipboard, dimension lookup, limiter wait) is raced against the
//! session's cancellation token.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::capture::plan::TilePlan;
use crate::capture::rate_limit::SnapshotRateLimiter;
use crate::capture::{
    CaptureMetadata, CaptureMode, CaptureSession, Dimensions, PageDriver, Progress, ProgressSink, RasterService,
    SessionState, SnapshotSource,
};
use crate::detect::SemanticType;
use crate::geometry::Rect;
use crate::raster::DataUrl;
use crate::{CaptureConfig, Error, Result};

/// What the observer asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureRequest {
    Element { rect: Rect, device_pixel_ratio: f64, metadata: CaptureMetadata },
    Visible { metadata: CaptureMetadata },
    Region { rect: Rect, device_pixel_ratio: f64, metadata: CaptureMetadata },
    FullPage { metadata: CaptureMetadata },
}

impl CaptureRequest {
    pub fn mode(&self) -> CaptureMode {
        match self {
            CaptureRequest::Element { .. } => CaptureMode::Block,
            CaptureRequest::Visible { .. } => CaptureMode::Visible,
            CaptureRequest::Region { .. } => CaptureMode::Region,
            CaptureRequest::FullPage { .. } => CaptureMode::FullPage,
        }
    }
}

/// A finished capture, ready for the handoff slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub image: DataUrl,
    pub metadata: CaptureMetadata,
}

/// The collaborators a session drives. Cheap to clone.
#[derive(Clone)]
pub struct CaptureHosts {
    pub snapshots: Arc<dyn SnapshotSource>,
    pub page: Arc<dyn PageDriver>,
    pub raster: Arc<dyn RasterService>,
    pub progress: Arc<dyn ProgressSink>,
}

pub struct CaptureOrchestrator {
    session: CaptureSession,
    config: CaptureConfig,
    hosts: CaptureHosts,
    limiter: SnapshotRateLimiter,
    cancel: CancellationToken,
    current_step: usize,
    total_steps: usize,
}

impl CaptureOrchestrator {
    pub fn new(
        mode: CaptureMode,
        config: CaptureConfig,
        hosts: CaptureHosts,
        limiter: SnapshotRateLimiter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session: CaptureSession::new(mode),
            config,
            hosts,
            limiter,
            cancel,
            current_step: 0,
            total_steps: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Run the session to a terminal state.
    ///
    /// A final `Failed` or `Cancelled` progress is always emitted before an
    /// error is returned.
    pub async fn run(mut self, request: CaptureRequest) -> Result<CaptureOutcome> {
        log::info!("capture session started ({:?})", self.session.mode);

        let result = match request {
            CaptureRequest::FullPage { metadata } => self.run_full_page(metadata).await,
            CaptureRequest::Element { rect, device_pixel_ratio, metadata }
            | CaptureRequest::Region { rect, device_pixel_ratio, metadata } => {
                self.run_single(Some((rect, device_pixel_ratio)), metadata).await
            }
            CaptureRequest::Visible { metadata } => self.run_single(None, metadata).await,
        };

        match &result {
            Ok(_) => {
                log::info!(
                    "capture session done in {}ms",
                    self.session.started_at.elapsed().as_millis()
                );
            }
            Err(e) if e.is_cancellation() => {
                self.transition(SessionState::Cancelled);
                log::info!("capture session cancelled");
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                log::error!("capture session failed: {}", e);
            }
        }
        result
    }

    fn transition(&mut self, state: SessionState) {
        log::debug!("session {:?} -> {:?}", self.session.state, state);
        self.session.state = state;
        self.hosts.progress.report(Progress {
            current_step: self.current_step,
            total_steps: self.total_steps,
            status: state,
        });
    }

    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    async fn snapshot(&self) -> Result<DataUrl> {
        let snapshots = self.hosts.snapshots.clone();
        self.guarded(self.limiter.run(|| snapshots.capture_visible())).await
    }

    async fn run_single(&mut self, crop: Option<(Rect, f64)>, metadata: CaptureMetadata) -> Result<CaptureOutcome> {
        self.transition(SessionState::Preparing);
        self.transition(SessionState::Capturing);

        let shot = self.snapshot().await?;
        self.current_step = 1;

        self.transition(SessionState::Finalizing);
        let image = match crop {
            Some((rect, dpr)) => self.guarded(self.hosts.raster.crop(shot, rect, dpr)).await?,
            None => shot,
        };

        self.copy_best_effort(&image).await?;
        self.transition(SessionState::Done);
        Ok(CaptureOutcome { image, metadata })
    }

    async fn run_full_page(&mut self, metadata: CaptureMetadata) -> Result<CaptureOutcome> {
        self.transition(SessionState::Preparing);
        let metrics = self.guarded(self.hosts.page.measure()).await?;
        let plan = TilePlan::new(&metrics, self.config.overlap)?;
        self.total_steps = plan.count;
        log::info!(
            "full page: {} tiles over {}px (viewport {}px, dpr {})",
            plan.count,
            plan.scroll_height,
            plan.viewport_height,
            metrics.device_pixel_ratio
        );

        let captured = self.capture_tiles(&plan).await;

        // restored whether the tiles succeeded, failed or were cancelled
        if let Err(e) = self.hosts.page.scroll_to(metrics.scroll_y).await {
            log::warn!("could not restore scroll offset {}: {}", metrics.scroll_y, e);
        }
        let tiles = captured?;

        self.transition(SessionState::Stitching);
        let first = tiles[0].clone();
        let dpr = metrics.device_pixel_ratio;
        let stitched = self
            .guarded(self.hosts.raster.stitch(tiles, plan.viewport_height, plan.scroll_height, dpr))
            .await?;

        self.transition(SessionState::Finalizing);
        let tile_size = match self.guarded(self.hosts.raster.image_dimensions(first)).await {
            Ok(d) => d,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                log::warn!("dimension lookup failed, using fallback: {}", e);
                self.config.fallback_dimensions
            }
        };

        self.copy_best_effort(&stitched).await?;

        let metadata = CaptureMetadata {
            element_type: SemanticType::Section,
            label: "Full Page".to_string(),
            dimensions: Dimensions {
                width: (tile_size.width as f64 / dpr).round() as u32,
                height: plan.scroll_height.round() as u32,
            },
            ..metadata
        };

        self.transition(SessionState::Done);
        Ok(CaptureOutcome { image: stitched, metadata })
    }

    /// Tiles strictly in order, one scroll and one snapshot each. The
    /// collected tiles are moved out of the session on success.
    async fn capture_tiles(&mut self, plan: &TilePlan) -> Result<Vec<DataUrl>> {
        for index in 0..plan.count {
            let y = plan.scroll_position(index);

            self.transition(SessionState::Scrolling);
            self.guarded(self.hosts.page.scroll_to(y)).await?;
            self.guarded(async {
                tokio::time::sleep(self.config.settle_delay()).await;
                Ok::<(), Error>(())
            })
            .await?;

            self.transition(SessionState::Capturing);
            let tile = self.snapshot().await.map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::TileCaptureFailed { index, reason: other.to_string() },
            })?;
            log::debug!("tile {}/{} at y={} ({})", index + 1, plan.count, y, tile);

            self.session.tiles.push(tile);
            self.current_step = index + 1;
        }
        Ok(std::mem::take(&mut self.session.tiles))
    }

    /// Clipboard failures never fail the session; only cancellation does.
    async fn copy_best_effort(&self, image: &DataUrl) -> Result<()> {
        match self.guarded(self.hosts.raster.copy_to_clipboard(image.clone())).await {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                log::warn!("clipboard copy failed: {}", e);
                Ok(())
            }
        }
    }
}
