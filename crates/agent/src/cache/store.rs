//! Bounded LRU response cache with TTL expiry.
//!
//! Lookups are O(1) through a `HashMap`; recency is kept in a `BTreeMap`
//! keyed by a monotonically increasing access tick, so the least recently
//! used entry is always the first key. All state sits behind one
//! `std::sync::Mutex`: critical sections are short and never await.
//!
//! The cache can be snapshotted to a JSONL file (one entry per line, least
//! recently used first). Damaged lines are skipped and counted, never fatal.

use super::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use localcoder_core::engine::TokenUsage;
use localcoder_core::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A previously generated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response_text: String,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(response_text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            response_text: response_text.into(),
            usage,
            created_at: Utc::now(),
            hit_count: 0,
        }
    }
}

/// Counters describing cache behaviour since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    /// Entries pushed out by capacity pressure.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Snapshot lines that could not be restored.
    pub corruptions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Slot {
    entry: CacheEntry,
    inserted: Instant,
    tick: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Fingerprint, Slot>,
    recency: BTreeMap<u64, Fingerprint>,
    next_tick: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, fp: &Fingerprint) -> Option<Slot> {
        let slot = self.entries.remove(fp)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }
}

pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            ttl,
            enabled: true,
        }
    }

    /// A cache on which every lookup misses and every insert is ignored.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1, Duration::ZERO)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A panic while holding the lock cannot leave the maps inconsistent
        // in a way that matters more than losing the cache, so keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
        now.duration_since(slot.inserted) >= self.ttl
    }

    /// Look up a fingerprint. A hit refreshes recency and bumps the hit count.
    pub fn get(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let mut inner = self.lock();
        if !self.enabled {
            inner.stats.misses += 1;
            return None;
        }

        let now = Instant::now();
        let expired = match inner.entries.get(fp) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(slot) => self.is_expired(slot, now),
        };

        if expired {
            inner.remove(fp);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            debug!(fingerprint = %fp.short(), "Cache entry expired");
            return None;
        }

        let tick = inner.bump();
        let inner = &mut *inner;
        let slot = inner.entries.get_mut(fp)?;
        inner.recency.remove(&slot.tick);
        inner.recency.insert(tick, *fp);
        slot.tick = tick;
        slot.entry.hit_count += 1;
        inner.stats.hits += 1;
        Some(slot.entry.clone())
    }

    /// Insert or overwrite an entry, evicting the least recently used
    /// entries while over capacity.
    pub fn put(&self, fp: Fingerprint, entry: CacheEntry) {
        if !self.enabled {
            return;
        }
        let mut inner = self.lock();
        self.insert_at(&mut inner, fp, entry, Instant::now());
    }

    fn insert_at(&self, inner: &mut CacheInner, fp: Fingerprint, entry: CacheEntry, inserted: Instant) {
        inner.remove(&fp);
        let tick = inner.bump();
        inner.entries.insert(
            fp,
            Slot {
                entry,
                inserted,
                tick,
            },
        );
        inner.recency.insert(tick, fp);
        inner.stats.insertions += 1;

        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.stats.evictions += 1;
            debug!(fingerprint = %oldest.short(), "Evicted least recently used cache entry");
        }
    }

    /// Purge expired entries. Returns how many were removed.
    pub fn evict(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, slot)| self.is_expired(slot, now))
            .map(|(fp, _)| *fp)
            .collect();
        for fp in &expired {
            inner.remove(fp);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.lock().entries.contains_key(fp)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            enabled: self.enabled,
            size: inner.entries.len(),
            capacity: self.capacity,
            ..inner.stats.clone()
        }
    }

    // ── Snapshot ──────────────────────────────────────────────────────────

    /// Restore entries from a JSONL snapshot. A missing file is not an
    /// error. Returns the number of entries restored.
    pub fn load_snapshot(&self, path: &Path) -> Result<usize, StorageError> {
        if !self.enabled {
            return Ok(0);
        }
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read cache snapshot {}: {e}",
                    path.display()
                )));
            }
        };

        let now = Instant::now();
        let wall_now = Utc::now();
        let mut restored = 0;
        let mut inner = self.lock();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (fp, entry) = match parse_snapshot_line(line_no + 1, line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted cache entry");
                    inner.stats.corruptions += 1;
                    continue;
                }
            };

            let age = (wall_now - entry.created_at).to_std().unwrap_or(Duration::ZERO);
            if age >= self.ttl {
                continue;
            }
            let inserted = now.checked_sub(age).unwrap_or(now);
            self.insert_at(&mut inner, fp, entry, inserted);
            restored += 1;
        }

        // Restoring is not new work.
        inner.stats.insertions = inner.stats.insertions.saturating_sub(restored as u64);
        info!(path = %path.display(), restored, "Cache snapshot loaded");
        Ok(restored)
    }

    /// Write all live entries to a JSONL snapshot, least recently used first.
    /// A disabled cache leaves an existing snapshot untouched.
    pub fn save_snapshot(&self, path: &Path) -> Result<usize, StorageError> {
        if !self.enabled {
            return Ok(0);
        }
        let lines: Vec<String> = {
            let inner = self.lock();
            let now = Instant::now();
            inner
                .recency
                .values()
                .filter_map(|fp| inner.entries.get(fp).map(|slot| (fp, slot)))
                .filter(|(_, slot)| !self.is_expired(slot, now))
                .map(|(fp, slot)| {
                    serde_json::to_string(&SnapshotRecord {
                        fingerprint: fp.to_hex(),
                        entry: slot.entry.clone(),
                    })
                    .map_err(|e| StorageError::Serialization(e.to_string()))
                })
                .collect::<Result<_, _>>()?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Io(format!("Failed to create snapshot directory: {e}"))
            })?;
        }

        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(path, content)
            .map_err(|e| StorageError::Io(format!("Failed to write cache snapshot: {e}")))?;

        debug!(path = %path.display(), entries = lines.len(), "Cache snapshot saved");
        Ok(lines.len())
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    fingerprint: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

fn parse_snapshot_line(
    line_no: usize,
    line: &str,
) -> Result<(Fingerprint, CacheEntry), StorageError> {
    let corrupted = |reason: String| StorageError::Corrupted {
        key: format!("snapshot line {line_no}"),
        reason,
    };
    let record: SnapshotRecord =
        serde_json::from_str(line).map_err(|e| corrupted(e.to_string()))?;
    let fp = Fingerprint::from_hex(&record.fingerprint)
        .ok_or_else(|| corrupted(format!("invalid fingerprint '{}'", record.fingerprint)))?;
    if record.entry.response_text.trim().is_empty() {
        return Err(corrupted("empty response text".into()));
    }
    Ok((fp, record.entry))
}
