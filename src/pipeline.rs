//! Wires the observer, the coordinator and the rendering helper over one
//! bus and hands back an async handle that drives the observer the way a
//! user would.
//!
//! Each context runs as its own task. Dropping the handle (or calling
//! [`Pipeline::shutdown`]) closes the input channel, which stops the
//! observer and unregisters every route.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::{CaptureMode, SnapshotSource};
use crate::coordinator::{Coordinator, SessionGuard};
use crate::detect::VisualNode;
use crate::handoff::HandoffStore;
use crate::helper::{ClipboardSink, RenderHelper};
use crate::observer::{Key, Observer, ObserverEvent, ObserverInput, PageHost};
use crate::transport::{Bus, ContextId};
use crate::{Error, Result, Settings};

/// A running three-context capture pipeline.
pub struct Pipeline {
    inputs: mpsc::UnboundedSender<ObserverInput>,
    events: mpsc::UnboundedReceiver<ObserverEvent>,
    bus: Bus,
    guard: SessionGuard,
    tasks: Vec<JoinHandle<()>>,
}

/// Start all three contexts. Must be called inside a tokio runtime.
pub fn launch<H, C>(
    host: Arc<H>,
    snapshots: Arc<dyn SnapshotSource>,
    clipboard: C,
    handoff: Arc<dyn HandoffStore>,
    settings: Settings,
) -> Pipeline
where
    H: PageHost,
    <H::Node as VisualNode>::Weak: Send + Sync + 'static,
    C: ClipboardSink,
{
    let bus = Bus::new();
    let (observer_client, observer_inbox) = bus.register(ContextId::Observer).split();
    let (coordinator_client, coordinator_inbox) = bus.register(ContextId::Coordinator).split();
    let (helper_client, helper_inbox) = bus.register(ContextId::Helper).split();

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let helper = RenderHelper::new(clipboard).with_overlap(settings.capture.overlap);
    let coordinator = Coordinator::new(settings.capture, snapshots, handoff);
    let guard = coordinator.session_guard().clone();
    let observer = Observer::new(host, settings.detection, event_tx);

    let tasks = vec![
        tokio::spawn(helper.serve(helper_client, helper_inbox)),
        tokio::spawn(coordinator.serve(coordinator_client, coordinator_inbox)),
        tokio::spawn(observer.run(observer_client, observer_inbox, input_rx)),
    ];
    log::info!("capture pipeline started");

    Pipeline { inputs: input_tx, events: event_rx, bus, guard, tasks }
}

impl Pipeline {
    fn send(&self, input: ObserverInput) -> Result<()> {
        self.inputs
            .send(input)
            .map_err(|_| Error::TransportClosed("observer stopped".into()))
    }

    pub fn activate(&self, mode: CaptureMode) -> Result<()> {
        self.send(ObserverInput::Activate(mode))
    }

    pub fn deactivate(&self) -> Result<()> {
        self.send(ObserverInput::Deactivate)
    }

    pub fn pointer_move(&self, x: f64, y: f64) -> Result<()> {
        self.send(ObserverInput::PointerMove { x, y })
    }

    pub fn click(&self) -> Result<()> {
        self.send(ObserverInput::Click)
    }

    pub fn escape(&self) -> Result<()> {
        self.send(ObserverInput::Key(Key::Escape))
    }

    pub fn scrolled(&self) -> Result<()> {
        self.send(ObserverInput::Scrolled)
    }

    /// A completed drag from `start` to `end`, viewport coordinates.
    pub fn select_region(&self, start: (f64, f64), end: (f64, f64)) -> Result<()> {
        self.send(ObserverInput::RegionDrag { start, end })
    }

    /// Whether the coordinator is running a session right now.
    pub fn session_active(&self) -> bool {
        self.guard.is_active()
    }

    pub async fn next_event(&mut self) -> Option<ObserverEvent> {
        self.events.recv().await
    }

    /// Wait for the next `CaptureFinished`, collecting every event on the way.
    pub async fn wait_for_capture(
        &mut self,
        timeout: Duration,
    ) -> Result<(std::result::Result<(), String>, Vec<ObserverEvent>)> {
        let mut seen = Vec::new();
        let wait = async {
            while let Some(event) = self.events.recv().await {
                if let ObserverEvent::CaptureFinished { result, .. } = &event {
                    let result = result.clone();
                    seen.push(event);
                    return Ok(result);
                }
                seen.push(event);
            }
            Err(Error::TransportClosed("observer stopped".into()))
        };
        let result = tokio::time::timeout(timeout, wait).await.map_err(|_| Error::TransportTimeout {
            kind: "CaptureFinished".into(),
            ms: timeout.as_millis() as u64,
        })??;
        Ok((result, seen))
    }

    /// Stop the observer, then the coordinator and helper.
    pub async fn shutdown(self) {
        let Pipeline { inputs, events, bus, tasks, .. } = self;
        drop(inputs);
        drop(events);
        let mut tasks = tasks.into_iter().rev();
        // observer first: it still deactivates over the bus
        if let Some(observer) = tasks.next() {
            let _ = observer.await;
        }
        for id in [ContextId::Observer, ContextId::Coordinator, ContextId::Helper] {
            bus.unregister(id);
        }
        for task in tasks {
            let _ = task.await;
        }
        log::info!("capture pipeline stopped");
    }
}
