//! Page-resident observer: samples the block under the pointer, turns user
//! gestures into capture requests and scrolls the page for full-page
//! sessions
//!
//! Capture requests run as their own tasks so the observer keeps answering
//! `MeasurePage` and `ScrollTo` while the coordinator drives a session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::capture::{CaptureMetadata, CaptureMode, PageMetrics, Progress};
use crate::detect::{find_best_block, BlockCandidate, BlockSummary, NodeSource, SemanticType, VisualNode, WeakNode};
use crate::geometry::Rect;
use crate::transport::{Client, ContextId, Envelope, Inbox, Message, MessageKind};
use crate::BlockDetectionConfig;

/// Drags with either side at or below this many CSS px are ignored.
pub const MIN_REGION_SIZE: f64 = 10.0;

/// Full-page sessions can take minutes on long pages.
const CAPTURE_REPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// The page as the observer sees it.
pub trait PageHost: NodeSource + Send + Sync + 'static {
    fn metrics(&self) -> PageMetrics;

    /// Scroll the document; returns the offset actually reached.
    fn scroll_to(&self, y: f64) -> f64;

    fn url(&self) -> String;

    fn title(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
}

/// User gestures and toolbar commands.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverInput {
    Activate(CaptureMode),
    Deactivate,
    PointerMove { x: f64, y: f64 },
    Click,
    Key(Key),
    /// The user scrolled the page
    Scrolled,
    /// A finished region drag, in viewport coordinates
    RegionDrag { start: (f64, f64), end: (f64, f64) },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

/// What the overlay and toast layers would render.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Activated(CaptureMode),
    Deactivated,
    Highlight(Option<BlockSummary>),
    Toast { level: ToastLevel, message: String },
    Progress(Progress),
    CaptureFinished { mode: CaptureMode, result: std::result::Result<(), String> },
}

struct CaptureDone {
    id: u64,
    mode: CaptureMode,
    result: std::result::Result<(), String>,
}

pub struct Observer<H: PageHost> {
    host: Arc<H>,
    detection: BlockDetectionConfig,
    events: mpsc::UnboundedSender<ObserverEvent>,
    mode: Option<CaptureMode>,
    current: Option<BlockCandidate<<H::Node as VisualNode>::Weak>>,
    /// The capture this activation is waiting on. A superseded capture still
    /// reports back, but under an id that no longer matches.
    in_flight: Option<u64>,
    next_capture: u64,
    done_tx: mpsc::UnboundedSender<CaptureDone>,
    done_rx: Option<mpsc::UnboundedReceiver<CaptureDone>>,
}

impl<H: PageHost> Observer<H> {
    pub fn new(host: Arc<H>, detection: BlockDetectionConfig, events: mpsc::UnboundedSender<ObserverEvent>) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            host,
            detection,
            events,
            mode: None,
            current: None,
            in_flight: None,
            next_capture: 1,
            done_tx,
            done_rx: Some(done_rx),
        }
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.mode
    }

    fn emit(&self, event: ObserverEvent) {
        let _ = self.events.send(event);
    }

    fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        self.emit(ObserverEvent::Toast { level, message: message.into() });
    }

    /// Run until the input channel closes.
    pub async fn run(mut self, client: Client, mut inbox: Inbox, mut inputs: mpsc::UnboundedReceiver<ObserverInput>) {
        let Some(mut done_rx) = self.done_rx.take() else {
            return;
        };
        loop {
            // page requests and progress first, so a session's last progress
            // is seen before its result
            tokio::select! {
                biased;
                Some(envelope) = inbox.recv() => self.handle_message(&client, envelope),
                Some(done) = done_rx.recv() => self.finish_capture(&client, done),
                input = inputs.recv() => match input {
                    Some(input) => self.handle_input(&client, input),
                    None => break,
                },
            }
        }
        self.deactivate(&client);
        log::debug!("observer stopped");
    }

    fn handle_message(&mut self, client: &Client, envelope: Envelope) {
        let reply = match &envelope.message {
            Message::MeasurePage => Message::PageMeasured { metrics: self.host.metrics() },
            Message::ScrollTo { y } => Message::ScrollComplete { y: self.host.scroll_to(*y) },
            Message::Progress { progress } => {
                self.emit(ObserverEvent::Progress(*progress));
                return;
            }
            Message::ActivateCapture { mode } => {
                log::debug!("activation requested by {:?}", envelope.from);
                self.activate(client, *mode);
                return;
            }
            Message::DeactivateCapture => {
                self.deactivate(client);
                return;
            }
            other => {
                log::debug!("observer ignoring {}", other.kind());
                return;
            }
        };
        if let Err(e) = client.reply(&envelope, reply) {
            log::debug!("observer reply dropped: {}", e);
        }
    }

    fn handle_input(&mut self, client: &Client, input: ObserverInput) {
        match input {
            ObserverInput::Activate(mode) => self.activate(client, mode),
            ObserverInput::Deactivate => self.deactivate(client),
            ObserverInput::PointerMove { x, y } => self.sample(x, y),
            ObserverInput::Click | ObserverInput::Key(Key::Enter) => self.capture_current_block(client),
            ObserverInput::Key(Key::Escape) => {
                if self.mode == Some(CaptureMode::Region) && self.in_flight.is_none() {
                    self.toast(ToastLevel::Info, "Region selection cancelled");
                }
                self.deactivate(client);
            }
            ObserverInput::Scrolled => self.refresh_highlight(),
            ObserverInput::RegionDrag { start, end } => self.capture_region(client, Rect::from_drag(start, end)),
        }
    }

    /// Same mode again is a no-op; a different mode deactivates first.
    pub fn activate(&mut self, client: &Client, mode: CaptureMode) {
        if let Some(current) = self.mode {
            if current == mode {
                return;
            }
            self.deactivate(client);
        }

        self.mode = Some(mode);
        log::info!("capture mode activated: {:?}", mode);
        self.emit(ObserverEvent::Activated(mode));

        match mode {
            CaptureMode::Block => self.toast(ToastLevel::Info, "Block mode: click to capture"),
            CaptureMode::Region => self.toast(ToastLevel::Info, "Drag to select a region"),
            CaptureMode::Visible => {
                self.toast(ToastLevel::Info, "Capturing visible page...");
                let viewport = self.host.viewport();
                let metadata = self.metadata(SemanticType::Section, "Visible Page", viewport.width, viewport.height);
                self.spawn_capture(client, mode, Message::CaptureVisiblePage { metadata });
            }
            CaptureMode::FullPage => {
                let viewport = self.host.viewport();
                let metadata = self.metadata(SemanticType::Section, "Full Page", viewport.width, viewport.height);
                self.spawn_capture(client, mode, Message::CaptureFullPage { metadata });
            }
        }
    }

    /// Leave capture mode. An in-flight session is cancelled.
    pub fn deactivate(&mut self, client: &Client) {
        let Some(mode) = self.mode.take() else {
            return;
        };
        if self.current.take().is_some() {
            self.emit(ObserverEvent::Highlight(None));
        }
        if let Some(id) = self.in_flight.take() {
            log::debug!("cancelling capture {}", id);
            if let Err(e) = client.notify(ContextId::Coordinator, Message::CancelCapture) {
                log::debug!("cancel not delivered: {}", e);
            }
        }
        let _ = client.notify(ContextId::Coordinator, Message::DeactivateCapture);
        log::info!("capture mode deactivated ({:?})", mode);
        self.emit(ObserverEvent::Deactivated);
    }

    fn metadata(&self, element_type: SemanticType, label: &str, width: f64, height: f64) -> CaptureMetadata {
        CaptureMetadata::new(self.host.url(), self.host.title(), element_type, label, width, height)
    }

    /// One pointer sample. Emits a highlight only when the block changed.
    fn sample(&mut self, x: f64, y: f64) {
        if self.mode != Some(CaptureMode::Block) {
            return;
        }
        let block = self
            .host
            .element_at_point(x, y)
            .and_then(|node| find_best_block(&node, self.host.viewport(), &self.detection));

        let changed = block.as_ref().map(|b| b.id.as_str()) != self.current.as_ref().map(|b| b.id.as_str());
        if changed {
            self.emit(ObserverEvent::Highlight(block.as_ref().map(|b| b.summary())));
            self.current = block;
        }
    }

    /// Re-read the highlighted node's box after a scroll.
    fn refresh_highlight(&mut self) {
        if self.mode != Some(CaptureMode::Block) {
            return;
        }
        let Some(current) = self.current.as_mut() else {
            return;
        };
        match current.node.upgrade() {
            Some(node) => {
                current.rect = node.bounding_rect();
                let summary = current.summary();
                self.emit(ObserverEvent::Highlight(Some(summary)));
            }
            None => {
                self.current = None;
                self.emit(ObserverEvent::Highlight(None));
            }
        }
    }

    fn capture_current_block(&mut self, client: &Client) {
        if self.mode != Some(CaptureMode::Block) || self.in_flight.is_some() {
            return;
        }
        let Some(block) = self.current.as_ref() else {
            return;
        };
        // the node may have moved since it was sampled
        let rect = block.node.upgrade().map(|n| n.bounding_rect()).unwrap_or(block.rect);
        let metadata = self.metadata(block.semantic_type, &block.label, rect.width, rect.height);
        let device_pixel_ratio = self.host.metrics().device_pixel_ratio;
        self.spawn_capture(
            client,
            CaptureMode::Block,
            Message::CaptureElement { rect, device_pixel_ratio, metadata },
        );
    }

    fn capture_region(&mut self, client: &Client, rect: Rect) {
        if self.mode != Some(CaptureMode::Region) || self.in_flight.is_some() {
            return;
        }
        if rect.width <= MIN_REGION_SIZE || rect.height <= MIN_REGION_SIZE {
            self.toast(ToastLevel::Info, "Selection too small, drag again");
            return;
        }
        self.toast(ToastLevel::Info, "Capturing region...");
        let metadata = self.metadata(SemanticType::Section, "Region Selection", rect.width, rect.height);
        let device_pixel_ratio = self.host.metrics().device_pixel_ratio;
        self.spawn_capture(
            client,
            CaptureMode::Region,
            Message::CaptureRegion { rect, device_pixel_ratio, metadata },
        );
    }

    fn spawn_capture(&mut self, client: &Client, mode: CaptureMode, request: Message) {
        let id = self.next_capture;
        self.next_capture += 1;
        self.in_flight = Some(id);
        let client = client.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let reply = client
                .request(ContextId::Coordinator, request, &[MessageKind::CaptureResult], CAPTURE_REPLY_TIMEOUT)
                .await;
            let result = match reply {
                Ok(Message::CaptureResult { success: true, .. }) => Ok(()),
                Ok(Message::CaptureResult { error, .. }) => {
                    Err(error.unwrap_or_else(|| "Unknown capture error".to_string()))
                }
                Ok(other) => Err(format!("Unexpected response: {}", other.kind())),
                Err(e) => Err(e.user_message()),
            };
            let _ = done.send(CaptureDone { id, mode, result });
        });
    }

    fn finish_capture(&mut self, client: &Client, done: CaptureDone) {
        let current = self.in_flight == Some(done.id);
        if current {
            self.in_flight = None;
        }
        match &done.result {
            Ok(()) => {
                let message = match done.mode {
                    CaptureMode::Region => "Region captured & copied!",
                    CaptureMode::FullPage => "Full page captured!",
                    CaptureMode::Block | CaptureMode::Visible => "Screenshot captured & copied!",
                };
                self.toast(ToastLevel::Success, message);
            }
            Err(error) => {
                log::warn!("capture failed: {}", error);
                self.toast(ToastLevel::Error, error.clone());
            }
        }
        self.emit(ObserverEvent::CaptureFinished { mode: done.mode, result: done.result.clone() });

        // a failed block capture keeps block mode on so the user can retry
        let retry = done.mode == CaptureMode::Block && done.result.is_err();
        if current && self.mode == Some(done.mode) && !retry {
            self.deactivate(client);
        }
    }
}
