//! Privileged coordinator: owns the session guard, the snapshot limiter and
//! the handoff slot
//!
//! Every capture request starts one session task, so the request loop keeps
//! answering `CancelCapture` and `CaptureViewportChunk` while a session runs.

pub mod remote;

pub use remote::{HelperClient, ObserverProgress, RemotePage};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureHosts, CaptureOrchestrator, CaptureRequest, SnapshotRateLimiter, SnapshotSource};
use crate::handoff::{HandoffStore, PendingCapture};
use crate::transport::{Client, Envelope, Inbox, Message};
use crate::{CaptureConfig, Error, Result};

/// How long a new request waits for a cancelled session to unwind.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// At most one capture session at a time.
#[derive(Debug, Clone, Default)]
pub struct SessionGuard {
    busy: Arc<AtomicBool>,
    released: Arc<Notify>,
}

/// Held for the lifetime of a session; releases the guard on drop.
#[derive(Debug)]
pub struct SessionPermit {
    busy: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl SessionGuard {
    pub fn try_acquire(&self) -> Result<SessionPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SessionAlreadyActive)?;
        Ok(SessionPermit { busy: self.busy.clone(), released: self.released.clone() })
    }

    /// Wait up to `wait` for the current holder to let go.
    pub async fn acquire_within(&self, wait: Duration) -> Result<SessionPermit> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // registered before the check so a release in between is not lost
            released.as_mut().enable();
            if let Ok(permit) = self.try_acquire() {
                return Ok(permit);
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(Error::SessionAlreadyActive);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

/// The session currently allowed to run, by id.
type ActiveSession = Arc<Mutex<Option<(u64, CancellationToken)>>>;

#[derive(Clone)]
pub struct Coordinator {
    config: CaptureConfig,
    snapshots: Arc<dyn SnapshotSource>,
    handoff: Arc<dyn HandoffStore>,
    limiter: SnapshotRateLimiter,
    guard: SessionGuard,
    active: ActiveSession,
    next_session: Arc<AtomicU64>,
}

impl Coordinator {
    pub fn new(config: CaptureConfig, snapshots: Arc<dyn SnapshotSource>, handoff: Arc<dyn HandoffStore>) -> Self {
        let limiter = SnapshotRateLimiter::new(config.min_snapshot_interval());
        Self {
            config,
            snapshots,
            handoff,
            limiter,
            guard: SessionGuard::default(),
            active: Arc::new(Mutex::new(None)),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn session_guard(&self) -> &SessionGuard {
        &self.guard
    }

    /// Handle coordinator requests until the inbox closes.
    pub async fn serve(self, client: Client, mut inbox: Inbox) {
        while let Some(envelope) = inbox.recv().await {
            match envelope.message.clone() {
                Message::CaptureElement { rect, device_pixel_ratio, metadata } => {
                    let request = CaptureRequest::Element { rect, device_pixel_ratio, metadata };
                    self.start_session(&client, envelope, request);
                }
                Message::CaptureVisiblePage { metadata } => {
                    self.start_session(&client, envelope, CaptureRequest::Visible { metadata });
                }
                Message::CaptureRegion { rect, device_pixel_ratio, metadata } => {
                    let request = CaptureRequest::Region { rect, device_pixel_ratio, metadata };
                    self.start_session(&client, envelope, request);
                }
                Message::CaptureFullPage { metadata } => {
                    self.start_session(&client, envelope, CaptureRequest::FullPage { metadata });
                }
                Message::CancelCapture => self.cancel_active(),
                Message::CaptureViewportChunk => self.capture_chunk(&client, envelope),
                Message::DeactivateCapture => log::debug!("observer deactivated"),
                other => log::debug!("coordinator ignoring {}", other.kind()),
            }
        }
        self.cancel_active();
        log::debug!("coordinator stopped");
    }

    fn cancel_active(&self) {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some((id, token)) = active {
            log::info!("cancelling capture session {}", id);
            token.cancel();
        }
    }

    /// The guard is held but no session owns the active slot: the holder was
    /// cancelled (or is finishing) and will release shortly.
    fn session_draining(&self) -> bool {
        self.guard.is_active() && self.active.lock().unwrap_or_else(|p| p.into_inner()).is_none()
    }

    fn start_session(&self, client: &Client, envelope: Envelope, request: CaptureRequest) {
        let permit = match self.guard.try_acquire() {
            Ok(permit) => Some(permit),
            Err(_) if self.session_draining() => {
                log::debug!("{} waits for the cancelled session to unwind", envelope.message.kind());
                None
            }
            Err(e) => {
                log::warn!("rejecting {}: {}", envelope.message.kind(), e);
                let reply = Message::CaptureResult { success: false, error: Some(e.user_message()) };
                if let Err(e) = client.reply(&envelope, reply) {
                    log::debug!("capture result dropped: {}", e);
                }
                return;
            }
        };

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = Some((id, token.clone()));

        let hosts = CaptureHosts {
            snapshots: self.snapshots.clone(),
            page: Arc::new(RemotePage::new(client.clone(), envelope.from, self.config.page_timeout())),
            raster: Arc::new(HelperClient::new(client.clone(), self.config.clone())),
            progress: Arc::new(ObserverProgress::new(client.clone(), envelope.from)),
        };
        let orchestrator =
            CaptureOrchestrator::new(request.mode(), self.config.clone(), hosts, self.limiter.clone(), token);

        let guard = self.guard.clone();
        let handoff = self.handoff.clone();
        let active = self.active.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let result = match permit {
                Some(permit) => Ok(permit),
                None => guard.acquire_within(SESSION_DRAIN_TIMEOUT).await,
            };
            let result = match result {
                Ok(permit) => {
                    let result =
                        orchestrator.run(request).await.and_then(|outcome| handoff.store(&PendingCapture::new(outcome)));
                    release_slot(&active, id);
                    drop(permit);
                    result
                }
                Err(e) => {
                    release_slot(&active, id);
                    Err(e)
                }
            };

            let reply = match result {
                Ok(()) => Message::CaptureResult { success: true, error: None },
                Err(e) => Message::CaptureResult { success: false, error: Some(e.user_message()) },
            };
            if let Err(e) = client.reply(&envelope, reply) {
                log::debug!("capture result dropped: {}", e);
            }
        });
    }

    fn capture_chunk(&self, client: &Client, envelope: Envelope) {
        let snapshots = self.snapshots.clone();
        let limiter = self.limiter.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let reply = match limiter.run(|| snapshots.capture_visible()).await {
                Ok(data_url) => Message::ViewportChunk { success: true, data_url: Some(data_url), error: None },
                Err(e) => Message::ViewportChunk { success: false, data_url: None, error: Some(e.to_string()) },
            };
            if let Err(e) = client.reply(&envelope, reply) {
                log::debug!("viewport chunk dropped: {}", e);
            }
        });
    }
}

/// Clear the active slot if session `id` still owns it.
fn release_slot(active: &ActiveSession, id: u64) {
    let mut slot = active.lock().unwrap_or_else(|p| p.into_inner());
    if slot.as_ref().map(|(owner, _)| *owner) == Some(id) {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_admits_one_session() {
        let guard = SessionGuard::default();
        let permit = guard.try_acquire().expect("first");
        assert!(guard.is_active());
        assert!(matches!(guard.try_acquire(), Err(Error::SessionAlreadyActive)));
        drop(permit);
        assert!(!guard.is_active());
        assert!(guard.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_the_permit_on_release() {
        let guard = SessionGuard::default();
        let permit = guard.try_acquire().expect("first");
        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.acquire_within(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(permit);
        let second = waiter.await.expect("join").expect("acquired after release");
        assert!(guard.is_active());
        drop(second);
        assert!(!guard.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gives_up_at_the_deadline() {
        let guard = SessionGuard::default();
        let _held = guard.try_acquire().expect("first");
        let err = guard.acquire_within(Duration::from_secs(1)).await.expect_err("still held");
        assert!(matches!(err, Error::SessionAlreadyActive));
    }
}
