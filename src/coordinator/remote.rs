//! Capture collaborators reached over the bus

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::capture::{Dimensions, PageDriver, PageMetrics, Progress, ProgressSink, RasterService};
use crate::geometry::Rect;
use crate::raster::DataUrl;
use crate::transport::{Client, ContextId, Message, MessageKind};
use crate::{CaptureConfig, Error, Result};

fn unexpected(reply: Message) -> Error {
    Error::UnexpectedResponse(reply.kind().to_string())
}

/// The observer's page, driven by `MeasurePage` and `ScrollTo`.
pub struct RemotePage {
    client: Client,
    observer: ContextId,
    timeout: Duration,
}

impl RemotePage {
    pub fn new(client: Client, observer: ContextId, timeout: Duration) -> Self {
        Self { client, observer, timeout }
    }
}

impl PageDriver for RemotePage {
    fn measure(&self) -> BoxFuture<'_, Result<PageMetrics>> {
        async move {
            match self
                .client
                .request(self.observer, Message::MeasurePage, &[MessageKind::PageMeasured], self.timeout)
                .await?
            {
                Message::PageMeasured { metrics } => Ok(metrics),
                other => Err(unexpected(other)),
            }
        }
        .boxed()
    }

    fn scroll_to(&self, y: f64) -> BoxFuture<'_, Result<f64>> {
        async move {
            match self
                .client
                .request(self.observer, Message::ScrollTo { y }, &[MessageKind::ScrollComplete], self.timeout)
                .await?
            {
                Message::ScrollComplete { y } => Ok(y),
                other => Err(unexpected(other)),
            }
        }
        .boxed()
    }
}

/// The rendering helper, with a timeout policy per operation.
pub struct HelperClient {
    client: Client,
    config: CaptureConfig,
}

impl HelperClient {
    pub fn new(client: Client, config: CaptureConfig) -> Self {
        Self { client, config }
    }
}

impl RasterService for HelperClient {
    fn crop(&self, image: DataUrl, rect: Rect, device_pixel_ratio: f64) -> BoxFuture<'_, Result<DataUrl>> {
        async move {
            let request = Message::CropImage { data_url: image, crop_rect: rect, device_pixel_ratio };
            let expected = [MessageKind::CropComplete, MessageKind::CropError];
            match self.client.request(ContextId::Helper, request, &expected, self.config.crop_timeout()).await? {
                Message::CropComplete { image_data_url } => Ok(image_data_url),
                Message::CropError { error } => Err(Error::CropFailed(error)),
                other => Err(unexpected(other)),
            }
        }
        .boxed()
    }

    fn stitch(
        &self,
        tiles: Vec<DataUrl>,
        viewport_height: f64,
        total_height: f64,
        device_pixel_ratio: f64,
    ) -> BoxFuture<'_, Result<DataUrl>> {
        async move {
            let request = Message::StitchImages {
                images: tiles,
                viewport_height,
                total_height,
                device_pixel_ratio,
                overlap: self.config.overlap,
            };
            let expected = [MessageKind::StitchComplete, MessageKind::StitchError];
            match self.client.request(ContextId::Helper, request, &expected, self.config.stitch_timeout()).await? {
                Message::StitchComplete { image_data_url } => Ok(image_data_url),
                Message::StitchError { error } => Err(Error::StitchFailed(error)),
                other => Err(unexpected(other)),
            }
        }
        .boxed()
    }

    /// A clipboard that never answers counts as written.
    fn copy_to_clipboard(&self, image: DataUrl) -> BoxFuture<'_, Result<()>> {
        async move {
            let request = Message::CopyToClipboard { data_url: image };
            let expected = [MessageKind::ClipboardComplete, MessageKind::ClipboardError];
            match self.client.request(ContextId::Helper, request, &expected, self.config.clipboard_timeout()).await {
                Ok(Message::ClipboardComplete) => Ok(()),
                Ok(Message::ClipboardError { error }) => Err(Error::ClipboardWriteFailed(error)),
                Ok(other) => Err(unexpected(other)),
                Err(Error::TransportTimeout { ms, .. }) => {
                    log::warn!("clipboard did not answer within {}ms; assuming written", ms);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    /// Falls back to `fallback_dimensions` when the helper is silent.
    fn image_dimensions(&self, image: DataUrl) -> BoxFuture<'_, Result<Dimensions>> {
        async move {
            let request = Message::GetImageDimensions { data_url: image };
            let expected = [MessageKind::ImageDimensionsComplete, MessageKind::ImageDimensionsError];
            match self.client.request(ContextId::Helper, request, &expected, self.config.dimensions_timeout()).await {
                Ok(Message::ImageDimensionsComplete { width, height }) => Ok(Dimensions { width, height }),
                Ok(Message::ImageDimensionsError { error }) => Err(Error::Other(error)),
                Ok(other) => Err(unexpected(other)),
                Err(Error::TransportTimeout { .. }) => Ok(self.config.fallback_dimensions),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }
}

/// Forwards progress to the observer as fire-and-forget notifications.
pub struct ObserverProgress {
    client: Client,
    observer: ContextId,
}

impl ObserverProgress {
    pub fn new(client: Client, observer: ContextId) -> Self {
        Self { client, observer }
    }
}

impl ProgressSink for ObserverProgress {
    fn report(&self, progress: Progress) {
        if let Err(e) = self.client.notify(self.observer, Message::Progress { progress }) {
            log::debug!("progress not delivered: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Bus;

    /// A helper context that receives everything and answers nothing.
    fn silent_helper() -> (HelperClient, crate::transport::Inbox) {
        let bus = Bus::new();
        let (client, _coord_inbox) = bus.register(ContextId::Coordinator).split();
        let (_helper, helper_inbox) = bus.register(ContextId::Helper).split();
        (HelperClient::new(client, CaptureConfig::default()), helper_inbox)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_clipboard_resolves_ok() {
        let (helper, _inbox) = silent_helper();
        helper.copy_to_clipboard(DataUrl::from_png(b"x")).await.expect("treated as written");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_dimensions_fall_back() {
        let (helper, _inbox) = silent_helper();
        let d = helper.image_dimensions(DataUrl::from_png(b"x")).await.expect("fallback");
        assert_eq!(d, Dimensions { width: 1920, height: 1080 });
    }

    #[tokio::test(start_paused = true)]
    async fn silent_crop_is_fatal() {
        let (helper, _inbox) = silent_helper();
        let err = helper
            .crop(DataUrl::from_png(b"x"), Rect::new(0.0, 0.0, 1.0, 1.0), 1.0)
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::TransportTimeout { ms: 10_000, .. }));
    }
}
