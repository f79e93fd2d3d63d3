//! In-process message bus connecting the three contexts
//!
//! Each context owns an [`Endpoint`]. Splitting it spawns a pump task that
//! routes replies into the context's [`PendingTable`] and everything else
//! into its [`Inbox`], so a context can await a reply while its own request
//! loop keeps running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::transport::{ContextId, Envelope, Message, MessageKind, PendingTable};
use crate::{Error, Result};

type Routes = HashMap<ContextId, mpsc::UnboundedSender<Envelope>>;

/// How often a pump drops pending entries whose requester never cleaned up.
pub const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Default)]
pub struct Bus {
    routes: Arc<Mutex<Routes>>,
    next_id: Arc<AtomicU64>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a context. Registering an id again replaces its route.
    pub fn register(&self, id: ContextId) -> Endpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
        if routes.insert(id, tx).is_some() {
            log::warn!("{:?} re-registered on the bus; previous endpoint detached", id);
        }
        Endpoint { id, bus: self.clone(), rx }
    }

    /// Detach a context; later sends to it fail with `TransportClosed`.
    pub fn unregister(&self, id: ContextId) {
        self.routes.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
    }

    fn next_correlation_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        let route = self.routes.lock().unwrap_or_else(|p| p.into_inner()).get(&envelope.to).cloned();
        let to = envelope.to;
        match route {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| Error::TransportClosed(format!("{:?} stopped listening", to))),
            None => Err(Error::TransportClosed(format!("{:?} is not registered", to))),
        }
    }
}

/// A context's attachment to the bus, before it starts pumping.
pub struct Endpoint {
    id: ContextId,
    bus: Bus,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Endpoint {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Start routing incoming envelopes. Must be called inside a runtime.
    pub fn split(self) -> (Client, Inbox) {
        let pending = PendingTable::new();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let Endpoint { id, bus, mut rx } = self;

        let table = pending.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(PENDING_SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    envelope = rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        if envelope.message.kind().is_response() {
                            table.resolve(envelope.correlation_id, envelope.message);
                        } else if inbox_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    now = sweep.tick() => {
                        let swept = table.sweep_expired(now);
                        if swept > 0 {
                            log::debug!("{:?} swept {} expired requests", id, swept);
                        }
                    }
                }
            }
            log::debug!("{:?} pump stopped", id);
        });

        (Client { id, bus, pending }, Inbox { rx: inbox_rx })
    }
}

/// Requests, notifications and replies originating from one context.
#[derive(Clone)]
pub struct Client {
    id: ContextId,
    bus: Bus,
    pending: PendingTable,
}

/// Removes the pending entry however the request future ends.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    correlation_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.cancel(self.correlation_id);
    }
}

impl Client {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Send `message` and wait for a reply of one of the `expected` types.
    ///
    /// Fails with `TransportTimeout` when nothing matching arrives within
    /// `timeout`; a reply that shows up later is dropped.
    pub async fn request(
        &self,
        to: ContextId,
        message: Message,
        expected: &[MessageKind],
        timeout: Duration,
    ) -> Result<Message> {
        let correlation_id = self.bus.next_correlation_id();
        let kind = message.kind();
        let rx = self.pending.register(correlation_id, expected, timeout)?;
        let _guard = PendingGuard { table: &self.pending, correlation_id };

        log::debug!("{:?} -> {:?}: {} #{}", self.id, to, kind, correlation_id);
        self.bus.send(Envelope { correlation_id, from: self.id, to, message })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::TransportClosed(format!("{} #{} abandoned", kind, correlation_id))),
            Err(_) => Err(Error::TransportTimeout { kind: kind.to_string(), ms: timeout.as_millis() as u64 }),
        }
    }

    /// Fire and forget.
    pub fn notify(&self, to: ContextId, message: Message) -> Result<()> {
        let correlation_id = self.bus.next_correlation_id();
        log::debug!("{:?} -> {:?}: {} (notify)", self.id, to, message.kind());
        self.bus.send(Envelope { correlation_id, from: self.id, to, message })
    }

    /// Answer `request` with the same correlation id.
    pub fn reply(&self, request: &Envelope, message: Message) -> Result<()> {
        log::debug!("{:?} -> {:?}: {} #{}", self.id, request.from, message.kind(), request.correlation_id);
        self.bus.send(Envelope {
            correlation_id: request.correlation_id,
            from: self.id,
            to: request.from,
            message,
        })
    }
}

/// Requests and notifications addressed to one context.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Client, (Client, Inbox)) {
        let bus = Bus::new();
        let (observer, _observer_inbox) = bus.register(ContextId::Observer).split();
        let helper = bus.register(ContextId::Helper).split();
        (observer, helper)
    }

    #[tokio::test]
    async fn request_gets_correlated_reply() {
        let (observer, (helper, mut inbox)) = pair();
        tokio::spawn(async move {
            while let Some(env) = inbox.recv().await {
                if let Message::ScrollTo { y } = env.message {
                    let _ = helper.reply(&env, Message::ScrollComplete { y });
                }
            }
        });

        let reply = observer
            .request(ContextId::Helper, Message::ScrollTo { y: 40.0 }, &[MessageKind::ScrollComplete], Duration::from_secs(1))
            .await
            .expect("reply");
        assert_eq!(reply, Message::ScrollComplete { y: 40.0 });
        assert!(observer.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_and_clears_entry() {
        let (observer, (_helper, _inbox)) = pair();
        let err = observer
            .request(ContextId::Helper, Message::MeasurePage, &[MessageKind::PageMeasured], Duration::from_secs(5))
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::TransportTimeout { ms: 5000, .. }));
        assert!(observer.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pump_sweeps_abandoned_entries() {
        let (observer, _helper) = pair();
        let rx = observer
            .pending()
            .register(99, &[MessageKind::CropComplete], Duration::from_secs(2))
            .expect("register");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(observer.pending().len(), 1);

        tokio::time::sleep(PENDING_SWEEP_INTERVAL * 3).await;
        assert!(observer.pending().is_empty());
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn unknown_destination_is_closed() {
        let bus = Bus::new();
        let (client, _inbox) = bus.register(ContextId::Observer).split();
        let err = client.notify(ContextId::Coordinator, Message::CancelCapture).expect_err("closed");
        assert!(matches!(err, Error::TransportClosed(_)));
    }
}
