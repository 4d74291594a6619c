//! Single-writer, many-reader holder for the latest published snapshot.
//!
//! Readers clone an `Arc` under a short read lock and never observe a partially
//! built snapshot. The JSON body is encoded before the write lock is taken.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::builder::BuiltSnapshot;
use crate::error::CacheError;
use crate::snapshot::ClusterStatus;

/// Nothing has been published yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cluster snapshot not ready")]
pub struct NotReady;

/// An immutable snapshot together with its pre-encoded JSON body.
#[derive(Debug)]
pub struct PublishedSnapshot {
    status: ClusterStatus,
    body: Bytes,
    local_node: String,
    published_at: DateTime<Utc>,
}

impl PublishedSnapshot {
    /// Serializes the snapshot once so every reader can share the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the status cannot be encoded.
    pub fn encode(built: BuiltSnapshot) -> Result<Self, CacheError> {
        let body = Bytes::from(serde_json::to_vec(&built.status)?);
        Ok(Self {
            status: built.status,
            body,
            local_node: built.local_node,
            published_at: Utc::now(),
        })
    }

    /// The structured snapshot.
    #[must_use]
    pub const fn status(&self) -> &ClusterStatus {
        &self.status
    }

    /// JSON encoding of [`Self::status`].
    #[must_use]
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    #[must_use]
    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    #[must_use]
    pub const fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }
}

type Slot = Arc<RwLock<Option<Arc<PublishedSnapshot>>>>;

/// Write half. Only the refresh task owns one.
#[derive(Debug)]
pub struct SnapshotPublisher {
    slot: Slot,
}

impl SnapshotPublisher {
    /// Replaces the current snapshot.
    pub fn publish(&self, snapshot: PublishedSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.slot.write() = Some(snapshot);
    }

    /// A reader attached to the same slot.
    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Read half, cheap to clone into every request handler.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    slot: Slot,
}

impl SnapshotReader {
    /// The most recently published snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`NotReady`] until the first publish.
    pub fn read(&self) -> Result<Arc<PublishedSnapshot>, NotReady> {
        self.slot.read().as_ref().map(Arc::clone).ok_or(NotReady)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Creates an empty cache and returns its two halves.
#[must_use]
pub fn snapshot_cache() -> (SnapshotPublisher, SnapshotReader) {
    let slot: Slot = Arc::new(RwLock::new(None));
    let reader = SnapshotReader {
        slot: Arc::clone(&slot),
    };
    (SnapshotPublisher { slot }, reader)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn built(node: &str) -> BuiltSnapshot {
        BuiltSnapshot {
            status: ClusterStatus {
                timestamp: Utc::now(),
                nodes: Vec::new(),
            },
            local_node: node.to_string(),
        }
    }

    #[test]
    fn empty_cache_is_not_ready() {
        let (_publisher, reader) = snapshot_cache();
        assert_eq!(reader.read().unwrap_err(), NotReady);
        assert!(!reader.is_ready());
    }

    #[test]
    fn publish_replaces_previous_snapshot() {
        let (publisher, reader) = snapshot_cache();
        publisher.publish(PublishedSnapshot::encode(built("a")).unwrap());
        let first = reader.read().unwrap();
        publisher.publish(PublishedSnapshot::encode(built("b")).unwrap());

        assert_eq!(first.local_node(), "a");
        assert_eq!(reader.read().unwrap().local_node(), "b");
        assert_eq!(publisher.reader().read().unwrap().local_node(), "b");
    }

    #[test]
    fn body_matches_status_encoding() {
        let snapshot = PublishedSnapshot::encode(built("a")).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&snapshot.body()).unwrap();
        assert_eq!(decoded, serde_json::to_value(snapshot.status()).unwrap());
        assert_eq!(decoded["nodes"], serde_json::json!([]));
    }
}
