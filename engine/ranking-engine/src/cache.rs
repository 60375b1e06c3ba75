//! Versioned partition cache
//!
//! Each (event, age group) partition owns a slot with a wanted version and at
//! most one scheduled recompute. Invalidations bump the wanted version and only
//! enqueue work when nothing is scheduled yet, so bursts of writes collapse
//! into a single extra pass. A worker keeps recomputing until the entry it
//! published matches the wanted version.
//!
//! Slot states:
//!
//! ```text
//! Fresh --invalidate--> Stale --dispatch--> Recomputing --publish--> Fresh
//!                                               |  ^
//!                                               +--+ wanted advanced during the pass
//! ```

use crate::error::{RankingError, Result};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::partition::{PartitionStats, PlayerValues};
use crate::scoring::RankedPlayer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use evaluation_ledger::{AgeGroup, DrillId, DrillSchema, EventId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Cache key: one event, one age group or the wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub event_id: EventId,
    pub age_group: AgeGroup,
}

impl PartitionKey {
    pub fn new(event_id: impl Into<EventId>, age_group: AgeGroup) -> Self {
        Self { event_id: event_id.into(), age_group }
    }

    fn validate(&self) -> Result<()> {
        if self.event_id.is_empty() {
            return Err(RankingError::invalid_signal("partition key has an empty event id"));
        }
        Ok(())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.age_group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    NewEvaluation,
    RosterChange,
    BulkImport,
    Explicit,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            InvalidationReason::NewEvaluation => "new evaluation",
            InvalidationReason::RosterChange => "roster change",
            InvalidationReason::BulkImport => "bulk import",
            InvalidationReason::Explicit => "explicit",
        };
        f.write_str(reason)
    }
}

/// Everything needed to answer ranking queries for one partition
#[derive(Debug, Clone)]
pub struct RankingCacheEntry {
    pub key: PartitionKey,

    /// Wanted version this entry was computed against
    pub version: u64,

    /// Slot lifetime the version belongs to. Stamped on publish.
    pub epoch: Uuid,

    pub computed_at: DateTime<Utc>,
    pub schema: Arc<DrillSchema>,
    pub stats: BTreeMap<DrillId, PartitionStats>,

    /// Partition members, in player id order
    pub players: Vec<PlayerValues>,

    /// Ranking under the schema's default weights, if precomputed
    pub default_scores: Option<Vec<RankedPlayer>>,
}

/// Whether a read reflects every invalidation seen before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    /// Last known good entry served after the recompute timeout
    Stale { wanted_version: u64 },
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

/// Observable slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Fresh,
    Stale,
    Recomputing,
}

#[derive(Debug, Clone)]
pub struct CacheRead {
    pub entry: Arc<RankingCacheEntry>,
    pub freshness: Freshness,
}

/// Builds a complete cache entry for a partition
#[async_trait::async_trait]
pub trait PartitionBuilder: Send + Sync {
    async fn build(&self, key: &PartitionKey, version: u64) -> Result<RankingCacheEntry>;
}

type EntryCell = Option<Arc<RankingCacheEntry>>;

struct SlotState {
    wanted: u64,
    scheduled: bool,
    recomputing: bool,
}

struct PartitionSlot {
    /// Versions restart at 1 in every new slot
    epoch: Uuid,
    state: Mutex<SlotState>,
    entry: watch::Sender<EntryCell>,

    /// Held for the duration of any build writing to this slot
    build_lock: tokio::sync::Mutex<()>,
}

impl PartitionSlot {
    fn new() -> Self {
        let (entry, _) = watch::channel(None);
        Self {
            epoch: Uuid::new_v4(),
            state: Mutex::new(SlotState { wanted: 1, scheduled: false, recomputing: false }),
            entry,
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> EntryCell {
        self.entry.borrow().clone()
    }
}

struct CacheInner {
    builder: Arc<dyn PartitionBuilder>,
    slots: DashMap<PartitionKey, Arc<PartitionSlot>>,
    work_tx: mpsc::UnboundedSender<PartitionKey>,
    recompute_timeout: Duration,
    metrics: CacheMetrics,
}

impl CacheInner {
    fn slot(&self, key: &PartitionKey) -> Arc<PartitionSlot> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(PartitionSlot::new()))
            .value()
            .clone()
    }

    fn existing_slot(&self, key: &PartitionKey) -> Option<Arc<PartitionSlot>> {
        self.slots.get(key).map(|slot| slot.value().clone())
    }

    /// Advance the wanted version; enqueue a recompute unless one is already scheduled
    fn bump(&self, key: &PartitionKey, slot: &PartitionSlot, reason: InvalidationReason) -> u64 {
        let (wanted, enqueue) = {
            let mut state = slot.state.lock();
            state.wanted += 1;
            let enqueue = !state.scheduled;
            state.scheduled = true;
            (state.wanted, enqueue)
        };

        self.metrics.record_invalidation(!enqueue);
        tracing::debug!(
            "Invalidated {} ({}), wanted version {}{}",
            key,
            reason,
            wanted,
            if enqueue { "" } else { ", coalesced" }
        );

        if enqueue {
            self.enqueue(key);
        }
        wanted
    }

    fn schedule_if_idle(&self, key: &PartitionKey, slot: &PartitionSlot) {
        let enqueue = {
            let mut state = slot.state.lock();
            let enqueue = !state.scheduled;
            state.scheduled = true;
            enqueue
        };
        if enqueue {
            self.enqueue(key);
        }
    }

    fn enqueue(&self, key: &PartitionKey) {
        if self.work_tx.send(key.clone()).is_err() {
            tracing::error!("Recompute dispatcher is gone; {} was not scheduled", key);
        }
    }

    /// Publish unless a newer version is already visible. Returns the visible entry.
    fn publish(&self, slot: &PartitionSlot, mut entry: RankingCacheEntry) -> Arc<RankingCacheEntry> {
        entry.epoch = slot.epoch;
        let entry = Arc::new(entry);
        let version = entry.version;
        let published = slot.entry.send_if_modified(|current| match current {
            Some(existing) if existing.version >= version => false,
            _ => {
                *current = Some(entry.clone());
                true
            }
        });

        if published {
            tracing::debug!("Published {} version {}", entry.key, version);
        }
        slot.current().unwrap_or(entry)
    }
}

async fn dispatch(inner: Weak<CacheInner>, mut work_rx: mpsc::UnboundedReceiver<PartitionKey>) {
    while let Some(key) = work_rx.recv().await {
        let Some(cache) = inner.upgrade() else {
            break;
        };
        // Expired partitions drop out here
        if let Some(slot) = cache.existing_slot(&key) {
            tokio::spawn(recompute_until_settled(cache, key, slot));
        }
    }
    tracing::debug!("Recompute dispatcher stopped");
}

async fn recompute_until_settled(inner: Arc<CacheInner>, key: PartitionKey, slot: Arc<PartitionSlot>) {
    loop {
        let target = {
            let mut state = slot.state.lock();
            state.recomputing = true;
            state.wanted
        };

        inner.metrics.record_recompute_pass();
        let built = {
            let _guard = slot.build_lock.lock().await;
            inner.builder.build(&key, target).await
        };

        let succeeded = match built {
            Ok(entry) => {
                inner.publish(&slot, entry);
                true
            }
            Err(e) => {
                inner.metrics.record_build_failure();
                tracing::error!("Recompute of {} at version {} failed: {}", key, target, e);
                false
            }
        };

        let mut state = slot.state.lock();
        if state.wanted > target {
            tracing::debug!("{} moved to version {} during recompute, running again", key, state.wanted);
            continue;
        }
        if !succeeded {
            tracing::warn!("{} left at its last good version until the next invalidation", key);
        }
        state.scheduled = false;
        state.recomputing = false;
        break;
    }
}

async fn wait_for_version(rx: &mut watch::Receiver<EntryCell>, wanted: u64) -> Option<Arc<RankingCacheEntry>> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(entry) = current {
            if entry.version >= wanted {
                return Some(entry);
            }
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

/// Partitioned ranking cache with coalesced background recompute
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
}

impl CacheManager {
    /// Create the cache and start its dispatcher. Must be called inside a Tokio runtime.
    pub fn new(builder: Arc<dyn PartitionBuilder>, recompute_timeout: Duration) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(CacheInner {
            builder,
            slots: DashMap::new(),
            work_tx,
            recompute_timeout,
            metrics: CacheMetrics::new(),
        });

        tokio::spawn(dispatch(Arc::downgrade(&inner), work_rx));

        Self { inner }
    }

    /// Mark a partition stale and schedule its recompute. Returns the new wanted version.
    pub fn invalidate(&self, key: &PartitionKey, reason: InvalidationReason) -> Result<u64> {
        key.validate()?;
        let slot = self.inner.slot(key);
        Ok(self.inner.bump(key, &slot, reason))
    }

    /// Invalidate every cached partition of an event. Returns how many were touched.
    pub fn invalidate_event(&self, event_id: &EventId, reason: InvalidationReason) -> Result<usize> {
        if event_id.is_empty() {
            return Err(RankingError::invalid_signal("invalidation names an empty event id"));
        }

        let keys: Vec<PartitionKey> = self
            .inner
            .slots
            .iter()
            .filter(|slot| &slot.key().event_id == event_id)
            .map(|slot| slot.key().clone())
            .collect();

        let mut touched = 0;
        for key in keys {
            if let Some(slot) = self.inner.existing_slot(&key) {
                self.inner.bump(&key, &slot, reason);
                touched += 1;
            }
        }
        Ok(touched)
    }

    /// Best available entry for a partition.
    ///
    /// Fresh entries are returned immediately. A stale entry waits for the
    /// in-flight recompute up to the configured timeout and is then served as
    /// stale. A partition with no entry at all is built inline.
    pub async fn get_or_recompute(&self, key: &PartitionKey) -> Result<CacheRead> {
        key.validate()?;
        let slot = self.inner.slot(key);
        let wanted = slot.state.lock().wanted;

        match slot.current() {
            Some(entry) if entry.version >= wanted => {
                Ok(CacheRead { entry, freshness: Freshness::Fresh })
            }
            Some(stale) => {
                self.inner.schedule_if_idle(key, &slot);
                let mut rx = slot.entry.subscribe();
                match tokio::time::timeout(self.inner.recompute_timeout, wait_for_version(&mut rx, wanted)).await {
                    Ok(Some(entry)) => Ok(CacheRead { entry, freshness: Freshness::Fresh }),
                    _ => {
                        self.inner.metrics.record_stale_read();
                        let entry = slot.current().unwrap_or(stale);
                        tracing::warn!(
                            "Serving {} version {} while version {} is wanted",
                            key,
                            entry.version,
                            wanted
                        );
                        Ok(CacheRead { entry, freshness: Freshness::Stale { wanted_version: wanted } })
                    }
                }
            }
            None => self.build_now(key, &slot, wanted).await,
        }
    }

    async fn build_now(&self, key: &PartitionKey, slot: &PartitionSlot, wanted: u64) -> Result<CacheRead> {
        let _guard = slot.build_lock.lock().await;

        // A worker may have published while we waited for the lock
        let existing = slot.current();
        if let Some(entry) = existing {
            if entry.version >= wanted {
                return Ok(CacheRead { entry, freshness: Freshness::Fresh });
            }
        }

        let target = slot.state.lock().wanted;
        self.inner.metrics.record_synchronous_build();
        let entry = match self.inner.builder.build(key, target).await {
            Ok(entry) => entry,
            Err(e) => {
                self.inner.metrics.record_build_failure();
                return Err(e);
            }
        };

        tracing::debug!("Built {} version {} inline", key, target);
        let entry = self.inner.publish(slot, entry);
        Ok(CacheRead { entry, freshness: Freshness::Fresh })
    }

    /// Watch a partition's published entry. Schedules a first build if nothing is cached.
    pub fn subscribe(&self, key: &PartitionKey) -> Result<watch::Receiver<EntryCell>> {
        key.validate()?;
        let slot = self.inner.slot(key);
        if slot.current().is_none() {
            self.inner.schedule_if_idle(key, &slot);
        }
        Ok(slot.entry.subscribe())
    }

    /// Drop every partition of an event. Subscribers see their stream close.
    pub fn expire_event(&self, event_id: &EventId) -> usize {
        let before = self.inner.slots.len();
        self.inner.slots.retain(|key, _| &key.event_id != event_id);
        let removed = before.saturating_sub(self.inner.slots.len());
        tracing::info!("Expired {} cached partitions of event {}", removed, event_id);
        removed
    }

    pub fn state(&self, key: &PartitionKey) -> Option<PartitionState> {
        let slot = self.inner.existing_slot(key)?;
        let (wanted, recomputing) = {
            let state = slot.state.lock();
            (state.wanted, state.recomputing)
        };
        let published = slot.current().map(|entry| entry.version);

        Some(match published {
            Some(version) if version >= wanted => PartitionState::Fresh,
            _ if recomputing => PartitionState::Recomputing,
            _ => PartitionState::Stale,
        })
    }

    pub fn wanted_version(&self, key: &PartitionKey) -> Option<u64> {
        self.inner.existing_slot(key).map(|slot| slot.state.lock().wanted)
    }

    /// Epoch of the partition's current slot
    pub fn epoch(&self, key: &PartitionKey) -> Option<Uuid> {
        self.inner.existing_slot(key).map(|slot| slot.epoch)
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.inner.slots.contains_key(key)
    }

    /// Published entry without triggering any work
    pub fn peek(&self, key: &PartitionKey) -> Option<Arc<RankingCacheEntry>> {
        self.inner.existing_slot(key).and_then(|slot| slot.current())
    }

    pub fn keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self.inner.slots.iter().map(|slot| slot.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}
