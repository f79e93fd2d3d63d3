//! Single-slot handoff of the last capture to whoever renders it next
//!
//! The record lives under a fixed key, is valid for a short window and is
//! consumed on first read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{unix_millis, CaptureMetadata, CaptureOutcome};
use crate::raster::DataUrl;
use crate::Result;

/// Fixed key of the handoff slot.
pub const PENDING_CAPTURE_SLOT: &str = "pendingCapture";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCapture {
    pub image_data_url: DataUrl,
    pub metadata: CaptureMetadata,
    /// Unix milliseconds at write time
    pub timestamp: u64,
}

impl PendingCapture {
    pub fn new(outcome: CaptureOutcome) -> Self {
        Self { image_data_url: outcome.image, metadata: outcome.metadata, timestamp: unix_millis() }
    }

    pub fn is_fresh(&self, now_ms: u64, validity: Duration) -> bool {
        now_ms.saturating_sub(self.timestamp) < validity.as_millis() as u64
    }
}

/// Key-value storage behind the handoff slot.
pub trait HandoffStore: Send + Sync {
    fn put(&self, slot: &str, record: &PendingCapture) -> Result<()>;

    /// Remove and return whatever is in `slot`.
    fn remove(&self, slot: &str) -> Result<Option<PendingCapture>>;

    /// Overwrite the pending capture.
    fn store(&self, record: &PendingCapture) -> Result<()> {
        self.put(PENDING_CAPTURE_SLOT, record)
    }

    /// Consume the pending capture. The slot is cleared even when the record
    /// is too old to be returned.
    fn take(&self, validity: Duration) -> Result<Option<PendingCapture>> {
        let record = self.remove(PENDING_CAPTURE_SLOT)?;
        Ok(record.filter(|r| {
            let fresh = r.is_fresh(unix_millis(), validity);
            if !fresh {
                log::debug!("discarding stale capture from {}", r.timestamp);
            }
            fresh
        }))
    }
}

#[derive(Debug, Default)]
pub struct MemoryHandoff {
    slots: Mutex<HashMap<String, PendingCapture>>,
}

impl MemoryHandoff {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HandoffStore for MemoryHandoff {
    fn put(&self, slot: &str, record: &PendingCapture) -> Result<()> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).insert(slot.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<Option<PendingCapture>> {
        Ok(self.slots.lock().unwrap_or_else(|p| p.into_inner()).remove(slot))
    }
}

/// One JSON file per slot in a directory.
#[derive(Debug, Clone)]
pub struct FileHandoff {
    dir: PathBuf,
}

impl FileHandoff {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slot))
    }
}

impl HandoffStore for FileHandoff {
    fn put(&self, slot: &str, record: &PendingCapture) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(slot), serde_json::to_vec_pretty(record)?)?;
        log::info!("capture stored in {}", self.path(slot).display());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<Option<PendingCapture>> {
        let path = self.path(slot);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        std::fs::remove_file(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}
