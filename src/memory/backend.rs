//! Ephemeral store abstraction
//!
//! The session log is a sorted set scored by timestamp; config is a plain
//! value; the version is a counter bumped atomically with every log write.

use crate::Result;

/// One sorted-set member with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub score: f64,
    pub member: String,
}

/// Outcome of a compare-and-swap replace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Log rewritten; carries the new version
    Swapped { version: u64 },
    /// Version moved since the caller read it; nothing written
    Conflict { found: u64 },
}

/// Trait for the backing associative store
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// Add members to a sorted set, bump `version_key` and apply `ttl_secs`
    /// to both keys in the same atomic step. Returns the new version.
    async fn sorted_add(
        &self,
        key: &str,
        version_key: &str,
        members: &[ScoredMember],
        ttl_secs: Option<u64>,
    ) -> Result<u64>;

    /// Members by rank, inclusive, negative indices counting from the end
    async fn sorted_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    async fn sorted_len(&self, key: &str) -> Result<usize>;

    /// Atomically delete `key`, write `members` as a fresh set, bump
    /// `version_key` and apply `ttl_secs` to both keys.
    ///
    /// With `expected_version` set, the swap only happens if the current
    /// version still matches. Empty `members` clears the log while the
    /// version keeps counting up.
    async fn sorted_swap(
        &self,
        key: &str,
        version_key: &str,
        expected_version: Option<u64>,
        members: &[ScoredMember],
        ttl_secs: Option<u64>,
    ) -> Result<SwapOutcome>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Whether `expire` is backed by a real expiry mechanism
    fn supports_expiry(&self) -> bool;

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;
}
