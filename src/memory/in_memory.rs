//! In-process store backend
//!
//! Used when no Redis URL is configured, and by the test suite. Keys expire
//! lazily: an expired key is treated as absent on the next access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::backend::{ScoredMember, StoreBackend, SwapOutcome};
use crate::error::MemoryError;
use crate::Result;

#[derive(Debug, Clone)]
enum Entry {
    Sorted(Vec<ScoredMember>),
    Value(String),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

pub struct InMemoryBackend {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    expiry_calls: Arc<RwLock<Vec<(String, u64)>>>,
    supports_expiry: bool,
    unavailable: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            expiry_calls: Arc::new(RwLock::new(Vec::new())),
            supports_expiry: true,
            unavailable: AtomicBool::new(false),
        }
    }

    /// A backend that reports no expiry capability
    pub fn without_expiry() -> Self {
        Self {
            supports_expiry: false,
            ..Self::new()
        }
    }

    /// Every `(key, ttl_secs)` expiry applied so far, in call order
    pub async fn expiry_calls(&self) -> Vec<(String, u64)> {
        self.expiry_calls.read().await.clone()
    }

    /// Simulate an outage: every operation fails with `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MemoryError::StoreUnavailable(
                "in-memory backend marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn record_expiry(
        &self,
        slots: &mut HashMap<String, Slot>,
        key: &str,
        ttl_secs: u64,
    ) {
        if let Some(slot) = slots.get_mut(key) {
            slot.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        self.expiry_calls
            .write()
            .await
            .push((key.to_string(), ttl_secs));
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired(slots: &mut HashMap<String, Slot>, key: &str) {
    let now = Instant::now();
    if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
        slots.remove(key);
    }
}

fn wrong_type(key: &str) -> MemoryError {
    MemoryError::StoreUnavailable(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

fn read_counter(slots: &HashMap<String, Slot>, key: &str) -> Result<u64> {
    match slots.get(key).map(|slot| &slot.entry) {
        None => Ok(0),
        Some(Entry::Value(raw)) => raw
            .parse::<u64>()
            .map_err(|e| MemoryError::corrupt(key, e)),
        Some(Entry::Sorted(_)) => Err(wrong_type(key)),
    }
}

fn bump_counter(slots: &mut HashMap<String, Slot>, key: &str) -> Result<u64> {
    let next = read_counter(slots, key)? + 1;
    let expires_at = slots.get(key).and_then(|slot| slot.expires_at);
    slots.insert(
        key.to_string(),
        Slot {
            entry: Entry::Value(next.to_string()),
            expires_at,
        },
    );
    Ok(next)
}

/// ZADD semantics: an existing member has its score updated; ties on score
/// order by member bytes.
fn insert_sorted(set: &mut Vec<ScoredMember>, member: &ScoredMember) {
    set.retain(|existing| existing.member != member.member);
    set.push(member.clone());
    set.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.member.cmp(&b.member))
    });
}

/// ZRANGE rank semantics with negative indices
fn rank_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait::async_trait]
impl StoreBackend for InMemoryBackend {
    async fn sorted_add(
        &self,
        key: &str,
        version_key: &str,
        members: &[ScoredMember],
        ttl_secs: Option<u64>,
    ) -> Result<u64> {
        self.check_available()?;
        let mut slots = self.slots.write().await;
        purge_expired(&mut slots, key);
        purge_expired(&mut slots, version_key);

        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::Sorted(Vec::new()),
            expires_at: None,
        });
        let Entry::Sorted(set) = &mut slot.entry else {
            return Err(wrong_type(key));
        };
        for member in members {
            insert_sorted(set, member);
        }

        let version = bump_counter(&mut slots, version_key)?;
        if let Some(ttl) = ttl_secs.filter(|ttl| *ttl > 0) {
            self.record_expiry(&mut slots, key, ttl).await;
            self.record_expiry(&mut slots, version_key, ttl).await;
        }
        Ok(version)
    }

    async fn sorted_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.check_available()?;
        let slots = self.slots.read().await;
        let now = Instant::now();

        let Some(slot) = slots.get(key).filter(|slot| slot.is_live(now)) else {
            return Ok(Vec::new());
        };
        let Entry::Sorted(set) = &slot.entry else {
            return Err(wrong_type(key));
        };

        Ok(match rank_window(set.len(), start, stop) {
            Some((from, to)) => set[from..=to].iter().map(|m| m.member.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn sorted_len(&self, key: &str) -> Result<usize> {
        self.check_available()?;
        let slots = self.slots.read().await;
        let now = Instant::now();

        match slots.get(key).filter(|slot| slot.is_live(now)).map(|s| &s.entry) {
            None => Ok(0),
            Some(Entry::Sorted(set)) => Ok(set.len()),
            Some(Entry::Value(_)) => Err(wrong_type(key)),
        }
    }

    async fn sorted_swap(
        &self,
        key: &str,
        version_key: &str,
        expected_version: Option<u64>,
        members: &[ScoredMember],
        ttl_secs: Option<u64>,
    ) -> Result<SwapOutcome> {
        self.check_available()?;
        let mut slots = self.slots.write().await;
        purge_expired(&mut slots, key);
        purge_expired(&mut slots, version_key);

        let current = read_counter(&slots, version_key)?;
        if let Some(expected) = expected_version {
            if current != expected {
                return Ok(SwapOutcome::Conflict { found: current });
            }
        }

        slots.remove(key);
        if !members.is_empty() {
            let mut set = Vec::with_capacity(members.len());
            for member in members {
                insert_sorted(&mut set, member);
            }
            slots.insert(
                key.to_string(),
                Slot {
                    entry: Entry::Sorted(set),
                    expires_at: None,
                },
            );
        }
        let version = bump_counter(&mut slots, version_key)?;

        if let Some(ttl) = ttl_secs.filter(|ttl| *ttl > 0) {
            if !members.is_empty() {
                self.record_expiry(&mut slots, key, ttl).await;
            }
            self.record_expiry(&mut slots, version_key, ttl).await;
        }

        Ok(SwapOutcome::Swapped { version })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let slots = self.slots.read().await;
        let now = Instant::now();

        match slots.get(key).filter(|slot| slot.is_live(now)).map(|s| &s.entry) {
            None => Ok(None),
            Some(Entry::Value(value)) => Ok(Some(value.clone())),
            Some(Entry::Sorted(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut slots = self.slots.write().await;
        // SET clears any previous expiry
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Value(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.check_available()?;
        let mut slots = self.slots.write().await;
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }

    fn supports_expiry(&self) -> bool {
        self.supports_expiry
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.check_available()?;
        let mut slots = self.slots.write().await;
        purge_expired(&mut slots, key);
        self.record_expiry(&mut slots, key, ttl_secs).await;
        Ok(())
    }
}
