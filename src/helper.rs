//! Sandboxed rendering helper: crop, stitch, clipboard and dimension
//! lookups over PNG data URLs
//!
//! Pixel work runs on the blocking pool. The helper answers on the bus when
//! served as a context, and implements [`RasterService`] directly for
//! in-process use.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::capture::{Dimensions, RasterService};
use crate::geometry::Rect;
use crate::raster::{compositor, DataUrl, DEFAULT_OVERLAP};
use crate::transport::{Client, Envelope, Inbox, Message};
use crate::{Error, Result};

/// Destination of the final image.
pub trait ClipboardSink: Send + Sync + 'static {
    /// Store PNG file bytes.
    fn write_image(&self, png: &[u8]) -> Result<()>;
}

/// Keeps the last image written. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    last: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ClipboardSink for MemoryClipboard {
    fn write_image(&self, png: &[u8]) -> Result<()> {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(png.to_vec());
        Ok(())
    }
}

/// Writes each image to a fixed PNG path.
#[derive(Debug, Clone)]
pub struct FileClipboard {
    path: PathBuf,
}

impl FileClipboard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClipboardSink for FileClipboard {
    fn write_image(&self, png: &[u8]) -> Result<()> {
        std::fs::write(&self.path, png)
            .map_err(|e| Error::ClipboardWriteFailed(format!("{}: {}", self.path.display(), e)))
    }
}

/// A clipboard that refuses every write, as when the document lacks focus.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedClipboard;

impl ClipboardSink for DeniedClipboard {
    fn write_image(&self, _png: &[u8]) -> Result<()> {
        Err(Error::ClipboardWriteFailed("Document is not focused".into()))
    }
}

pub struct RenderHelper<C> {
    clipboard: Arc<C>,
    overlap: f64,
}

impl<C> Clone for RenderHelper<C> {
    fn clone(&self) -> Self {
        Self { clipboard: self.clipboard.clone(), overlap: self.overlap }
    }
}

async fn blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::Other(format!("helper task failed: {}", e)))?
}

impl<C: ClipboardSink> RenderHelper<C> {
    pub fn new(clipboard: C) -> Self {
        Self { clipboard: Arc::new(clipboard), overlap: DEFAULT_OVERLAP }
    }

    /// Overlap used by [`RasterService::stitch`]; requests over the bus carry
    /// their own.
    pub fn with_overlap(mut self, overlap: f64) -> Self {
        self.overlap = overlap;
        self
    }

    pub async fn crop(&self, image: DataUrl, rect: Rect, device_pixel_ratio: f64) -> Result<DataUrl> {
        blocking(move || {
            let source = image.decode(device_pixel_ratio)?;
            compositor::crop(&source, rect, device_pixel_ratio)?.to_data_url()
        })
        .await
    }

    pub async fn stitch(
        &self,
        images: Vec<DataUrl>,
        viewport_height: f64,
        total_height: f64,
        device_pixel_ratio: f64,
        overlap: f64,
    ) -> Result<DataUrl> {
        blocking(move || {
            let tiles = images
                .iter()
                .map(|url| url.decode(device_pixel_ratio))
                .collect::<Result<Vec<_>>>()?;
            compositor::stitch_with_overlap(&tiles, viewport_height, total_height, device_pixel_ratio, overlap)?
                .to_data_url()
        })
        .await
    }

    pub async fn copy_to_clipboard(&self, image: DataUrl) -> Result<()> {
        let clipboard = self.clipboard.clone();
        blocking(move || {
            let png = image.to_bytes()?;
            clipboard.write_image(&png)
        })
        .await
    }

    pub async fn image_dimensions(&self, image: DataUrl) -> Result<Dimensions> {
        blocking(move || {
            let decoded = image::load_from_memory(&image.to_bytes()?)?;
            Ok(Dimensions { width: decoded.width(), height: decoded.height() })
        })
        .await
    }

    /// Answer helper requests until the inbox closes.
    pub async fn serve(self, client: Client, mut inbox: Inbox) {
        while let Some(envelope) = inbox.recv().await {
            let Some(reply) = self.handle(&envelope).await else {
                log::debug!("helper ignoring {}", envelope.message.kind());
                continue;
            };
            if let Err(e) = client.reply(&envelope, reply) {
                log::debug!("helper reply dropped: {}", e);
            }
        }
        log::debug!("helper stopped");
    }

    async fn handle(&self, envelope: &Envelope) -> Option<Message> {
        let reply = match envelope.message.clone() {
            Message::CropImage { data_url, crop_rect, device_pixel_ratio } => {
                match self.crop(data_url, crop_rect, device_pixel_ratio).await {
                    Ok(image_data_url) => Message::CropComplete { image_data_url },
                    Err(e) => Message::CropError { error: e.to_string() },
                }
            }
            Message::StitchImages { images, viewport_height, total_height, device_pixel_ratio, overlap } => {
                match self.stitch(images, viewport_height, total_height, device_pixel_ratio, overlap).await {
                    Ok(image_data_url) => Message::StitchComplete { image_data_url },
                    Err(e) => Message::StitchError { error: e.to_string() },
                }
            }
            Message::CopyToClipboard { data_url } => match self.copy_to_clipboard(data_url).await {
                Ok(()) => Message::ClipboardComplete,
                Err(e) => Message::ClipboardError { error: e.to_string() },
            },
            Message::GetImageDimensions { data_url } => match self.image_dimensions(data_url).await {
                Ok(d) => Message::ImageDimensionsComplete { width: d.width, height: d.height },
                Err(e) => Message::ImageDimensionsError { error: e.to_string() },
            },
            _ => return None,
        };
        Some(reply)
    }
}

impl<C: ClipboardSink> RasterService for RenderHelper<C> {
    fn crop(&self, image: DataUrl, rect: Rect, device_pixel_ratio: f64) -> BoxFuture<'_, Result<DataUrl>> {
        RenderHelper::crop(self, image, rect, device_pixel_ratio).boxed()
    }

    fn stitch(
        &self,
        tiles: Vec<DataUrl>,
        viewport_height: f64,
        total_height: f64,
        device_pixel_ratio: f64,
    ) -> BoxFuture<'_, Result<DataUrl>> {
        RenderHelper::stitch(self, tiles, viewport_height, total_height, device_pixel_ratio, self.overlap).boxed()
    }

    fn copy_to_clipboard(&self, image: DataUrl) -> BoxFuture<'_, Result<()>> {
        RenderHelper::copy_to_clipboard(self, image).boxed()
    }

    fn image_dimensions(&self, image: DataUrl) -> BoxFuture<'_, Result<Dimensions>> {
        RenderHelper::image_dimensions(self, image).boxed()
    }
}
