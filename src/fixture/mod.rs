//! HTML fixture pages: a small page host for the CLI and the tests
//!
//! The document is parsed with `scraper` into a flat arena. Each element's
//! box and visual style come from its inline `style` attribute, with
//! `left`/`top` in page coordinates. `<html>` and `<body>` span the whole
//! scrollable page unless they declare their own size.

pub mod paint;
pub mod style;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use scraper::{ElementRef, Html};
use tokio::time::Instant;

use crate::capture::{PageMetrics, SnapshotSource};
use crate::detect::{Color, Display, NodeKey, NodeSource, StyleSnapshot, VisualNode, WeakNode};
use crate::geometry::Rect;
use crate::observer::PageHost;
use crate::raster::{DataUrl, RawImage};
use crate::{Error, Result, Viewport};

use paint::PaintCommand;
use style::parse_inline_style;

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Page coordinates
    rect: Rect,
    style: StyleSnapshot,
}

#[derive(Debug)]
struct PageInner {
    elements: Vec<Element>,
    viewport: Viewport,
    device_pixel_ratio: f64,
    scroll_height: f64,
    scroll_y: Mutex<f64>,
    url: String,
    title: String,
}

impl PageInner {
    fn scroll_y(&self) -> f64 {
        *self.scroll_y.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the element or an ancestor is `display: none`.
    fn is_undisplayed(&self, mut index: usize) -> bool {
        loop {
            let el = &self.elements[index];
            if el.style.display == Display::None {
                return true;
            }
            match el.parent {
                Some(p) => index = p,
                None => return false,
            }
        }
    }

    fn is_painted(&self, index: usize) -> bool {
        let el = &self.elements[index];
        !self.is_undisplayed(index) && !el.style.visibility_hidden && el.style.opacity > 0.0 && !el.rect.is_empty()
    }
}

/// Options for [`FixturePage::parse_with`].
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub viewport: Viewport,
    pub device_pixel_ratio: f64,
    pub url: String,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self { viewport: Viewport::default(), device_pixel_ratio: 1.0, url: "about:blank".to_string() }
    }
}

/// A parsed page with its own scroll state. Clones share the page.
#[derive(Debug, Clone)]
pub struct FixturePage {
    inner: Arc<PageInner>,
}

fn collect(el: ElementRef<'_>, parent: Option<usize>, out: &mut Vec<Element>, title: &mut Option<String>) -> usize {
    let value = el.value();
    let tag = value.name().to_ascii_uppercase();
    if tag == "TITLE" && title.is_none() {
        *title = Some(el.text().collect::<String>().trim().to_string());
    }
    let inline = parse_inline_style(value.attr("style").unwrap_or(""));
    let rect = Rect::new(
        inline.left.unwrap_or(0.0),
        inline.top.unwrap_or(0.0),
        inline.width.unwrap_or(0.0),
        inline.height.unwrap_or(0.0),
    );

    let index = out.len();
    out.push(Element {
        tag,
        attrs: value.attrs().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        parent,
        children: Vec::new(),
        rect,
        style: inline.style,
    });

    for child in el.children().filter_map(ElementRef::wrap) {
        let c = collect(child, Some(index), out, title);
        out[index].children.push(c);
    }
    index
}

impl FixturePage {
    pub fn parse(html: &str, viewport: Viewport) -> Result<Self> {
        Self::parse_with(html, FixtureOptions { viewport, ..Default::default() })
    }

    pub fn parse_with(html: &str, options: FixtureOptions) -> Result<Self> {
        if options.device_pixel_ratio.is_nan() || options.device_pixel_ratio <= 0.0 {
            return Err(Error::ConfigError(format!("device pixel ratio {}", options.device_pixel_ratio)));
        }
        let document = Html::parse_document(html);
        let mut elements = Vec::new();
        let mut title = None;
        collect(document.root_element(), None, &mut elements, &mut title);

        let viewport = options.viewport;
        let content_bottom = elements.iter().map(|e| e.rect.bottom()).fold(0.0_f64, f64::max);
        let scroll_height = content_bottom.max(viewport.height);
        for el in elements.iter_mut().filter(|e| matches!(e.tag.as_str(), "HTML" | "BODY")) {
            if el.rect.is_empty() {
                el.rect = Rect::new(0.0, 0.0, viewport.width, scroll_height);
            }
        }
        log::debug!("fixture page: {} elements, {}px tall", elements.len(), scroll_height);

        Ok(Self {
            inner: Arc::new(PageInner {
                elements,
                viewport,
                device_pixel_ratio: options.device_pixel_ratio,
                scroll_height,
                scroll_y: Mutex::new(0.0),
                url: options.url,
                title: title.unwrap_or_default(),
            }),
        })
    }

    pub fn scroll_y(&self) -> f64 {
        self.inner.scroll_y()
    }

    pub fn scroll_height(&self) -> f64 {
        self.inner.scroll_height
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.inner.device_pixel_ratio
    }

    /// The document element.
    pub fn root(&self) -> FixtureNode {
        FixtureNode { page: self.inner.clone(), index: 0 }
    }

    /// First element with the given `id` attribute.
    pub fn by_id(&self, id: &str) -> Option<FixtureNode> {
        self.inner
            .elements
            .iter()
            .position(|e| e.attrs.iter().any(|(k, v)| k == "id" && v == id))
            .map(|index| FixtureNode { page: self.inner.clone(), index })
    }

    /// Painted backgrounds in document order.
    pub fn paint_commands(&self) -> Vec<PaintCommand> {
        (0..self.inner.elements.len())
            .filter(|&i| self.inner.is_painted(i))
            .filter_map(|i| {
                let el = &self.inner.elements[i];
                (!el.style.background_color.is_transparent())
                    .then(|| PaintCommand::SolidRect { rect: el.rect, rgba: el.style.background_color })
            })
            .collect()
    }

    /// The whole scrollable page.
    pub fn render_page(&self) -> RawImage {
        paint::rasterize(
            &self.paint_commands(),
            self.inner.viewport.width,
            self.inner.scroll_height,
            0.0,
            self.inner.device_pixel_ratio,
            Color::WHITE,
        )
    }

    /// What is currently on screen.
    pub fn render_viewport(&self) -> RawImage {
        paint::rasterize(
            &self.paint_commands(),
            self.inner.viewport.width,
            self.inner.viewport.height,
            self.inner.scroll_y(),
            self.inner.device_pixel_ratio,
            Color::WHITE,
        )
    }
}

impl NodeSource for FixturePage {
    type Node = FixtureNode;

    /// Topmost painted element under the point, falling back to `<body>`
    /// inside the viewport.
    fn element_at_point(&self, x: f64, y: f64) -> Option<FixtureNode> {
        let viewport = self.inner.viewport;
        if x < 0.0 || y < 0.0 || x >= viewport.width || y >= viewport.height {
            return None;
        }
        let page_y = y + self.inner.scroll_y();
        let elements = &self.inner.elements;
        let hit = (0..elements.len())
            .rev()
            .filter(|&i| !matches!(elements[i].tag.as_str(), "HTML" | "BODY" | "HEAD"))
            .find(|&i| self.inner.is_painted(i) && elements[i].rect.contains_point(x, page_y))
            .or_else(|| elements.iter().position(|e| e.tag == "BODY"));
        hit.map(|index| FixtureNode { page: self.inner.clone(), index })
    }

    fn viewport(&self) -> Viewport {
        self.inner.viewport
    }
}

impl PageHost for FixturePage {
    fn metrics(&self) -> PageMetrics {
        PageMetrics {
            viewport_width: self.inner.viewport.width,
            viewport_height: self.inner.viewport.height,
            scroll_height: self.inner.scroll_height,
            scroll_y: self.inner.scroll_y(),
            device_pixel_ratio: self.inner.device_pixel_ratio,
        }
    }

    fn scroll_to(&self, y: f64) -> f64 {
        let max = (self.inner.scroll_height - self.inner.viewport.height).max(0.0);
        let reached = y.clamp(0.0, max);
        *self.inner.scroll_y.lock().unwrap_or_else(|p| p.into_inner()) = reached;
        reached
    }

    fn url(&self) -> String {
        self.inner.url.clone()
    }

    fn title(&self) -> String {
        self.inner.title.clone()
    }
}

/// Handle to one element of a [`FixturePage`].
#[derive(Debug, Clone)]
pub struct FixtureNode {
    page: Arc<PageInner>,
    index: usize,
}

#[derive(Debug, Clone)]
pub struct FixtureWeak {
    page: Weak<PageInner>,
    index: usize,
}

impl WeakNode for FixtureWeak {
    type Strong = FixtureNode;

    fn upgrade(&self) -> Option<FixtureNode> {
        self.page.upgrade().map(|page| FixtureNode { page, index: self.index })
    }
}

impl FixtureNode {
    fn element(&self) -> &Element {
        &self.page.elements[self.index]
    }
}

impl VisualNode for FixtureNode {
    type Weak = FixtureWeak;

    fn key(&self) -> NodeKey {
        NodeKey(self.index as u64)
    }

    fn tag(&self) -> String {
        self.element().tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.element().attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    /// Viewport-relative; empty for elements that are not rendered.
    fn bounding_rect(&self) -> Rect {
        if self.page.is_undisplayed(self.index) {
            return Rect::default();
        }
        self.element().rect.translate(0.0, -self.page.scroll_y())
    }

    fn computed_style(&self) -> StyleSnapshot {
        self.element().style.clone()
    }

    fn child_count(&self) -> usize {
        self.element().children.len()
    }

    fn has_image_descendant(&self) -> bool {
        let mut stack = self.element().children.clone();
        while let Some(i) = stack.pop() {
            let el = &self.page.elements[i];
            if el.tag == "IMG" {
                return true;
            }
            stack.extend_from_slice(&el.children);
        }
        false
    }

    fn parent(&self) -> Option<FixtureNode> {
        self.element().parent.map(|index| FixtureNode { page: self.page.clone(), index })
    }

    fn downgrade(&self) -> FixtureWeak {
        FixtureWeak { page: Arc::downgrade(&self.page), index: self.index }
    }
}

/// Snapshots of a fixture page's viewport, subject to the same per-second
/// quota as a browser tab.
pub struct FixtureSnapshotSource {
    page: FixturePage,
    max_per_second: usize,
    recent: Mutex<VecDeque<Instant>>,
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl FixtureSnapshotSource {
    /// Two snapshots per rolling second.
    pub fn new(page: FixturePage) -> Self {
        Self { page, max_per_second: 2, recent: Mutex::new(VecDeque::new()), calls: AtomicUsize::new(0), fail_on: None }
    }

    /// Make the `n`th call (zero-based) fail.
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn admit(&self) -> Result<()> {
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        while recent.front().is_some_and(|&t| now.saturating_duration_since(t) >= Duration::from_secs(1)) {
            recent.pop_front();
        }
        if recent.len() >= self.max_per_second {
            return Err(Error::CaptureQuotaExceeded);
        }
        recent.push_back(now);
        Ok(())
    }
}

impl SnapshotSource for FixtureSnapshotSource {
    fn capture_visible(&self) -> BoxFuture<'_, Result<DataUrl>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if self.fail_on == Some(n) {
                return Err(Error::SnapshotFailed(format!("snapshot {} rejected by host", n)));
            }
            self.admit()?;
            let page = self.page.clone();
            tokio::task::spawn_blocking(move || page.render_viewport().to_data_url())
                .await
                .map_err(|e| Error::SnapshotFailed(e.to_string()))?
        }
        .boxed()
    }
}
