//! Destination object store contract.
//!
//! The chunking layer is transport-agnostic: it only needs single-shot
//! puts and a transactional multipart session. Network-backed stores live
//! outside this crate; [`memory::MemoryStore`] is the in-tree conforming
//! implementation used by tests and local runs.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Identifier of an open multipart session, assigned by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Confirmation token returned for one uploaded part (an ETag-like value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartToken(pub String);

/// Destination write surface: single-shot puts plus multipart sessions.
///
/// Multipart lifecycle: `begin_multipart` → N× `upload_part` (any order,
/// any concurrency) → `complete_multipart` with parts sorted ascending by
/// part number, or `abort_multipart` to discard everything.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write one whole object.
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()>;

    /// Open a multipart session for `key`.
    async fn begin_multipart(&self, key: &str) -> Result<SessionId>;

    /// Upload one numbered part of an open session. Part numbers start at 1.
    async fn upload_part(
        &self,
        session: &SessionId,
        part_number: usize,
        data: Bytes,
    ) -> Result<PartToken>;

    /// Commit a session. `parts` must be sorted ascending by part number.
    async fn complete_multipart(
        &self,
        session: &SessionId,
        parts: Vec<(usize, PartToken)>,
    ) -> Result<()>;

    /// Discard a session; no object persists under its key.
    async fn abort_multipart(&self, session: &SessionId) -> Result<()>;
}
