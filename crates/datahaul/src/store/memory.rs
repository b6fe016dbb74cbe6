//! In-memory [`ObjectStore`] backend.
//!
//! Backs the integration tests and local dry runs. Enforces the same
//! session rules a real store does: unknown sessions are rejected,
//! completion requires ascending part numbers with matching tokens, and
//! an aborted session leaves no object behind.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::debug;
use uuid::Uuid;

use super::{ObjectStore, PartToken, SessionId};
use crate::error::{HaulError, Result};

struct PendingSession {
    key: String,
    parts: HashMap<usize, (PartToken, Bytes)>,
}

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Bytes>>,
    sessions: Mutex<HashMap<String, PendingSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored object's bytes.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().expect("objects lock").get(key).cloned()
    }

    /// Keys of all stored objects, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .expect("objects lock")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("objects lock").len()
    }

    /// Number of sessions still open (neither completed nor aborted).
    pub fn open_session_count(&self) -> usize {
        self.sessions.lock().expect("sessions lock").len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        debug!("memory store: put {} ({} bytes)", key, data.len());
        self.objects
            .lock()
            .expect("objects lock")
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn begin_multipart(&self, key: &str) -> Result<SessionId> {
        let id = Uuid::new_v4().to_string();
        debug!("memory store: begin multipart {} for {}", id, key);
        self.sessions.lock().expect("sessions lock").insert(
            id.clone(),
            PendingSession {
                key: key.to_string(),
                parts: HashMap::new(),
            },
        );
        Ok(SessionId(id))
    }

    async fn upload_part(
        &self,
        session: &SessionId,
        part_number: usize,
        data: Bytes,
    ) -> Result<PartToken> {
        if part_number == 0 {
            return Err(HaulError::session(
                session.0.clone(),
                "part numbers start at 1",
            ));
        }
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let pending = sessions.get_mut(&session.0).ok_or_else(|| {
            HaulError::session(session.0.clone(), "unknown or closed session")
        })?;
        let token = PartToken(format!("etag-{}", Uuid::new_v4()));
        pending.parts.insert(part_number, (token.clone(), data));
        Ok(token)
    }

    async fn complete_multipart(
        &self,
        session: &SessionId,
        parts: Vec<(usize, PartToken)>,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let pending = sessions.remove(&session.0).ok_or_else(|| {
            HaulError::session(session.0.clone(), "unknown or closed session")
        })?;

        let mut assembled = BytesMut::new();
        let mut last_number = 0usize;
        for (part_number, token) in &parts {
            if *part_number <= last_number {
                return Err(HaulError::session(
                    session.0.clone(),
                    format!(
                        "parts must be sorted ascending; {} follows {}",
                        part_number, last_number
                    ),
                ));
            }
            last_number = *part_number;
            let (expected, data) = pending.parts.get(part_number).ok_or_else(|| {
                HaulError::session(
                    session.0.clone(),
                    format!("part {} was never uploaded", part_number),
                )
            })?;
            if expected != token {
                return Err(HaulError::session(
                    session.0.clone(),
                    format!("token mismatch for part {}", part_number),
                ));
            }
            assembled.extend_from_slice(data);
        }

        debug!(
            "memory store: complete multipart {} -> {} ({} parts, {} bytes)",
            session.0,
            pending.key,
            parts.len(),
            assembled.len()
        );
        self.objects
            .lock()
            .expect("objects lock")
            .insert(pending.key, assembled.freeze());
        Ok(())
    }

    async fn abort_multipart(&self, session: &SessionId) -> Result<()> {
        let removed = self
            .sessions
            .lock()
            .expect("sessions lock")
            .remove(&session.0);
        match removed {
            Some(pending) => {
                debug!("memory store: aborted multipart {} for {}", session.0, pending.key);
                Ok(())
            }
            // Aborting an already-closed session is a no-op, matching the
            // idempotent abort real stores expose.
            None => Ok(()),
        }
    }
}
