//! Correlation table for in-flight requests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::transport::{Message, MessageKind};
use crate::{Error, Result};

/// One outstanding request waiting for a reply.
#[derive(Debug)]
pub struct PendingRequest {
    pub correlation_id: u64,
    pub expected: Vec<MessageKind>,
    pub created_at: Instant,
    pub timeout: Duration,
    reply: oneshot::Sender<Message>,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.timeout
    }
}

/// Outstanding requests of one context, keyed by correlation id.
///
/// An entry leaves the table on its first matching reply, when the requester
/// gives up and cancels it, or when the owning pump sweeps it after its
/// timeout. Replies that find no entry are dropped.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<HashMap<u64, PendingRequest>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a request and get the receiving half of its reply slot.
    pub fn register(
        &self,
        correlation_id: u64,
        expected: &[MessageKind],
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Message>> {
        let mut table = self.lock();
        if table.contains_key(&correlation_id) {
            return Err(Error::Other(format!("correlation id {} already pending", correlation_id)));
        }
        let (tx, rx) = oneshot::channel();
        table.insert(
            correlation_id,
            PendingRequest {
                correlation_id,
                expected: expected.to_vec(),
                created_at: Instant::now(),
                timeout,
                reply: tx,
            },
        );
        Ok(rx)
    }

    /// Deliver a reply. Returns whether a waiting request took it.
    ///
    /// A reply whose type the request did not declare leaves the entry in
    /// place so the real reply can still arrive.
    pub fn resolve(&self, correlation_id: u64, message: Message) -> bool {
        let kind = message.kind();
        let mut table = self.lock();
        let accepts = match table.get(&correlation_id) {
            None => {
                log::debug!("dropping {} #{}: no pending request", kind, correlation_id);
                return false;
            }
            Some(pending) => pending.expected.contains(&kind),
        };
        if !accepts {
            log::debug!("ignoring {} #{}: not an expected reply type", kind, correlation_id);
            return false;
        }
        match table.remove(&correlation_id) {
            Some(pending) => pending.reply.send(message).is_ok(),
            None => false,
        }
    }

    /// Forget a request; its receiver sees a closed channel.
    pub fn cancel(&self, correlation_id: u64) -> bool {
        self.lock().remove(&correlation_id).is_some()
    }

    /// Drop every entry older than its own timeout. Returns how many went.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut table = self.lock();
        let before = table.len();
        table.retain(|_, pending| !pending.is_expired(now));
        before - table.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_reply_wins() {
        let table = PendingTable::new();
        let rx = table
            .register(7, &[MessageKind::CropComplete, MessageKind::CropError], Duration::from_secs(10))
            .expect("register");

        assert!(!table.resolve(7, Message::ClipboardComplete));
        assert_eq!(table.len(), 1);

        assert!(table.resolve(7, Message::CropError { error: "bad".into() }));
        assert!(table.is_empty());
        assert!(!table.resolve(7, Message::CropError { error: "again".into() }));

        assert_eq!(rx.await.expect("reply"), Message::CropError { error: "bad".into() });
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let table = PendingTable::new();
        let _rx = table.register(1, &[MessageKind::ScrollComplete], Duration::from_secs(1)).expect("first");
        assert!(table.register(1, &[MessageKind::ScrollComplete], Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn cancelled_entry_closes_its_receiver() {
        let table = PendingTable::new();
        let rx = table.register(1, &[MessageKind::ClipboardComplete], Duration::from_secs(3)).expect("a");
        let _b = table.register(2, &[MessageKind::StitchComplete], Duration::from_secs(60)).expect("b");

        assert!(table.cancel(1));
        assert_eq!(table.len(), 1);
        assert!(rx.await.is_err());
        assert!(!table.resolve(1, Message::ClipboardComplete));
        assert!(table.resolve(2, Message::StitchComplete { image_data_url: crate::raster::DataUrl::from_png(b"png") }));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired() {
        let table = PendingTable::new();
        let _a = table.register(1, &[MessageKind::ClipboardComplete], Duration::from_secs(3)).expect("a");
        let _b = table.register(2, &[MessageKind::StitchComplete], Duration::from_secs(60)).expect("b");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(table.sweep_expired(Instant::now()), 1);
        assert_eq!(table.len(), 1);
    }
}
