//! Session message log
//!
//! Stores each session as a sorted set of JSON records scored by timestamp,
//! with token counts computed once at write time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::backend::{ScoredMember, StoreBackend, SwapOutcome};
use super::keys::SessionKeys;
use super::tokens::TokenCounter;
use crate::error::MemoryError;
use crate::models::{Message, StoredMessage};
use crate::Result;

/// Microsecond clock that never hands out the same value twice
#[derive(Debug, Default)]
struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    fn next_micros(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last_micros.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last_micros.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }

    /// Seconds since the Unix epoch
    fn next_timestamp(&self) -> f64 {
        self.next_micros() as f64 / 1_000_000.0
    }
}

/// Encode a stored record as a sorted-set member
pub fn encode_record(message: &StoredMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a sorted-set member; failures are `CorruptRecord`, never skipped
pub fn decode_record(key: &str, payload: &str) -> Result<StoredMessage> {
    serde_json::from_str(payload).map_err(|e| MemoryError::corrupt(key, e))
}

pub struct MessageStore {
    backend: Arc<dyn StoreBackend>,
    tokens: TokenCounter,
    keys: SessionKeys,
    ttl_seconds: u64,
    clock: MonotonicClock,
}

impl MessageStore {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        tokens: TokenCounter,
        keys: SessionKeys,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            backend,
            tokens,
            keys,
            ttl_seconds,
            clock: MonotonicClock::default(),
        }
    }

    /// TTL to apply, if any; `None` when disabled or the backend cannot expire keys
    fn effective_ttl(&self) -> Option<u64> {
        if self.ttl_seconds > 0 && self.backend.supports_expiry() {
            Some(self.ttl_seconds)
        } else {
            None
        }
    }

    fn build_stored(&self, message: Message) -> StoredMessage {
        let token_count = self.tokens.count(&message.content);
        StoredMessage {
            id: Uuid::new_v4().to_string(),
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            timestamp: self.clock.next_timestamp(),
            token_count,
        }
    }

    fn build_members(&self, messages: Vec<Message>) -> Result<(Vec<StoredMessage>, Vec<ScoredMember>)> {
        let stored: Vec<StoredMessage> = messages
            .into_iter()
            .map(|message| self.build_stored(message))
            .collect();
        let members = stored
            .iter()
            .map(|item| {
                Ok(ScoredMember {
                    score: item.timestamp,
                    member: encode_record(item)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((stored, members))
    }

    /// Append messages in submission order
    pub async fn append(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<StoredMessage>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let (stored, members) = self.build_members(messages)?;
        let key = self.keys.messages(session_id);
        let version_key = self.keys.version(session_id);

        let version = self
            .backend
            .sorted_add(&key, &version_key, &members, self.effective_ttl())
            .await?;

        debug!(
            session_id,
            appended = stored.len(),
            version,
            "session messages appended"
        );
        Ok(stored)
    }

    /// Chronological read.
    ///
    /// `None` returns the whole log, `limit <= 0` returns nothing, otherwise
    /// the last `min(limit, count)` entries.
    pub async fn list(&self, session_id: &str, limit: Option<i64>) -> Result<Vec<StoredMessage>> {
        let key = self.keys.messages(session_id);
        let entries = match limit {
            None => self.backend.sorted_range(&key, 0, -1).await?,
            Some(limit) if limit <= 0 => return Ok(Vec::new()),
            Some(limit) => self.backend.sorted_range(&key, -limit, -1).await?,
        };

        entries
            .iter()
            .map(|payload| decode_record(&key, payload))
            .collect()
    }

    pub async fn count(&self, session_id: &str) -> Result<usize> {
        self.backend.sorted_len(&self.keys.messages(session_id)).await
    }

    /// Remove the log. Deleting a missing session is a no-op for the log.
    ///
    /// The version key survives and is bumped, so a compaction that read the
    /// log before the delete can never match a version handed out after it.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let outcome = self
            .backend
            .sorted_swap(
                &self.keys.messages(session_id),
                &self.keys.version(session_id),
                None,
                &[],
                self.effective_ttl(),
            )
            .await?;
        if let SwapOutcome::Swapped { version } = outcome {
            debug!(session_id, version, "session log deleted");
        }
        Ok(())
    }

    /// Current log version; 0 for a session that was never written
    pub async fn version(&self, session_id: &str) -> Result<u64> {
        let key = self.keys.version(session_id);
        match self.backend.get(&key).await? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| MemoryError::corrupt(&key, e)),
        }
    }

    /// Unconditionally rewrite the log with fresh identities
    pub async fn replace(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<StoredMessage>> {
        self.swap(session_id, None, messages).await
    }

    /// Rewrite the log only if nothing was written since `expected_version`
    pub async fn replace_if_version(
        &self,
        session_id: &str,
        expected_version: u64,
        messages: Vec<Message>,
    ) -> Result<Vec<StoredMessage>> {
        self.swap(session_id, Some(expected_version), messages).await
    }

    async fn swap(
        &self,
        session_id: &str,
        expected_version: Option<u64>,
        messages: Vec<Message>,
    ) -> Result<Vec<StoredMessage>> {
        let (stored, members) = self.build_members(messages)?;
        let key = self.keys.messages(session_id);
        let version_key = self.keys.version(session_id);

        let outcome = self
            .backend
            .sorted_swap(
                &key,
                &version_key,
                expected_version,
                &members,
                self.effective_ttl(),
            )
            .await?;

        match outcome {
            SwapOutcome::Swapped { version } => {
                info!(
                    session_id,
                    messages = stored.len(),
                    version,
                    "session log replaced"
                );
                Ok(stored)
            }
            SwapOutcome::Conflict { found } => Err(MemoryError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version.unwrap_or_default(),
                found,
            }),
        }
    }
}
