//! Chrome DevTools Protocol backend
//!
//! A headless Chrome tab serves as the snapshot source and as the page
//! driver of a capture session. `headless_chrome` is synchronous, so every
//! call runs on the blocking pool.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;

use crate::capture::{PageDriver, PageMetrics, SnapshotSource};
use crate::raster::DataUrl;
use crate::{Error, Result, Viewport};

const MEASURE_SCRIPT: &str = r#"JSON.stringify({
    viewportWidth: window.innerWidth,
    viewportHeight: window.innerHeight,
    scrollHeight: Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0),
    scrollY: window.scrollY,
    devicePixelRatio: window.devicePixelRatio || 1
})"#;

/// One headless Chrome tab.
#[derive(Clone)]
pub struct CdpTab {
    // keeps the browser process alive for as long as the tab is in use
    _browser: Arc<Browser>,
    tab: Arc<Tab>,
}

impl CdpTab {
    /// Launch Chrome with a window of the given size and open a tab.
    pub fn launch(viewport: Viewport) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((viewport.width.round() as u32, viewport.height.round() as u32)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;
        let browser = Browser::new(options).map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;
        let tab = browser.new_tab().map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;
        Ok(Self { _browser: Arc::new(browser), tab })
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url).map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    pub fn url(&self) -> String {
        self.tab.get_url()
    }

    pub fn title(&self) -> Result<String> {
        self.tab.get_title().map_err(|e| Error::CdpError(e.to_string()))
    }

    /// Evaluate `script`, which must produce a string.
    fn eval_string(&self, script: &str) -> Result<String> {
        let object = self.tab.evaluate(script, false).map_err(|e| Error::CdpError(format!("Evaluation failed: {}", e)))?;
        match object.value {
            Some(serde_json::Value::String(s)) => Ok(s),
            Some(other) => Ok(other.to_string()),
            None => Err(Error::CdpError("No value returned from evaluation".into())),
        }
    }

    fn measure_blocking(&self) -> Result<PageMetrics> {
        let mut metrics: PageMetrics = serde_json::from_str(&self.eval_string(MEASURE_SCRIPT)?)?;
        metrics.scroll_height = metrics.scroll_height.max(metrics.viewport_height);
        Ok(metrics)
    }

    fn scroll_blocking(&self, y: f64) -> Result<f64> {
        let reached = self.eval_string(&format!("window.scrollTo(0, {}); String(window.scrollY)", y))?;
        reached.trim().parse::<f64>().map_err(|e| Error::CdpError(format!("scrollY {:?}: {}", reached, e)))
    }

    fn screenshot_blocking(&self) -> Result<DataUrl> {
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::SnapshotFailed(e.to_string()))?;
        debug!("cdp screenshot: {} bytes", png.len());
        Ok(DataUrl::from_png(&png))
    }

    async fn on_pool<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(CdpTab) -> Result<T> + Send + 'static,
    {
        let tab = self.clone();
        tokio::task::spawn_blocking(move || op(tab))
            .await
            .map_err(|e| Error::CdpError(format!("cdp task failed: {}", e)))?
    }
}

impl SnapshotSource for CdpTab {
    fn capture_visible(&self) -> BoxFuture<'_, Result<DataUrl>> {
        self.on_pool(|tab| tab.screenshot_blocking()).boxed()
    }
}

impl PageDriver for CdpTab {
    fn measure(&self) -> BoxFuture<'_, Result<PageMetrics>> {
        self.on_pool(|tab| tab.measure_blocking()).boxed()
    }

    fn scroll_to(&self, y: f64) -> BoxFuture<'_, Result<f64>> {
        self.on_pool(move |tab| tab.scroll_blocking(y)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_cdp_measure_and_snapshot() {
        let tab = CdpTab::launch(Viewport { width: 800.0, height: 600.0 }).expect("launch");
        tab.navigate("data:text/html,<div style='height:3000px'>tall</div>").expect("navigate");
        let metrics = tab.measure().await.expect("measure");
        assert!(metrics.scroll_height >= 3000.0);
        assert_eq!(tab.scroll_to(500.0).await.expect("scroll"), 500.0);
        let shot = tab.capture_visible().await.expect("snapshot");
        assert!(shot.as_str().starts_with("data:image/png;base64,"));
    }
}
