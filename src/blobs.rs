//! In-memory store for generated media served back to the front-end.
//!
//! A [`BlobHandle`] is the server-side counterpart of a browser object URL:
//! it resolves to `/api/blobs/{id}` until it is released. Handles are not
//! `Clone`, and releasing consumes them, so one handle is released at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq)]
pub struct BlobHandle {
    id: Uuid,
}

impl BlobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("/api/blobs/{}", self.id)
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct BlobStats {
    pub created: u64,
    pub released: u64,
    pub live: usize,
}

#[derive(Debug, Default)]
pub struct BlobStore {
    entries: RwLock<HashMap<Uuid, Blob>>,
    created: AtomicU64,
    released: AtomicU64,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bytes: Bytes, content_type: impl Into<String>) -> BlobHandle {
        let id = Uuid::new_v4();
        let content_type = content_type.into();
        debug!(%id, %content_type, size = bytes.len(), "blob created");
        self.entries.write().insert(id, Blob { bytes, content_type });
        self.created.fetch_add(1, Ordering::SeqCst);
        BlobHandle { id }
    }

    pub fn get(&self, id: &Uuid) -> Option<Blob> {
        self.entries.read().get(id).cloned()
    }

    pub fn release(&self, handle: BlobHandle) {
        if self.entries.write().remove(&handle.id).is_none() {
            warn!(id = %handle.id, "released a blob that was not live");
            return;
        }
        debug!(id = %handle.id, "blob released");
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> BlobStats {
        BlobStats {
            created: self.created.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            live: self.entries.read().len(),
        }
    }
}
