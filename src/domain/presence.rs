//! Expert presence and availability tracking
//!
//! Per-expert online/busy/away/offline state with activity-based auto-away,
//! short-TTL read caching, and reference-counted status subscriptions.

use crate::domain::shared::value_objects::ExpertId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Expert presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Expert is online and can take calls
    Available,
    /// Expert is in a session
    Busy,
    /// Expert is idle past the auto-away timeout
    Away,
    /// Expert's client is disconnected
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Available => "available",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(PresenceStatus::Available),
            "busy" => Some(PresenceStatus::Busy),
            "away" => Some(PresenceStatus::Away),
            "offline" => Some(PresenceStatus::Offline),
            _ => None,
        }
    }

    /// Online means reachable for signaling, not necessarily free
    pub fn is_online(&self) -> bool {
        !matches!(self, PresenceStatus::Offline)
    }
}

/// One record per expert, upserted by that expert's own client and by the
/// away-sweep job. Transient - reconstructible from the activity timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub expert_id: ExpertId,
    pub status: PresenceStatus,
    pub last_activity_at: DateTime<Utc>,
    pub auto_away_enabled: bool,
    pub away_timeout_minutes: u32,
}

impl PresenceRecord {
    pub fn new(expert_id: ExpertId) -> Self {
        Self {
            expert_id,
            status: PresenceStatus::Offline,
            last_activity_at: Utc::now(),
            auto_away_enabled: true,
            away_timeout_minutes: 10,
        }
    }

    /// Whether the auto-away sweep should demote this record
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.auto_away_enabled
            && matches!(
                self.status,
                PresenceStatus::Available | PresenceStatus::Busy
            )
            && now - self.last_activity_at
                > chrono::Duration::minutes(i64::from(self.away_timeout_minutes))
    }
}

#[derive(Debug, Clone)]
struct CachedRecord {
    record: PresenceRecord,
    fetched_at: DateTime<Utc>,
}

struct ChannelSlot {
    tx: broadcast::Sender<PresenceRecord>,
    observers: usize,
}

/// A handle on one expert's presence stream. Multiple observers of the same
/// expert share one underlying channel; call
/// [`PresenceTracker::unsubscribe`] when done so the channel can be torn
/// down once the last observer leaves.
pub struct PresenceSubscription {
    pub expert_id: ExpertId,
    pub receiver: broadcast::Receiver<PresenceRecord>,
}

/// Presence summary statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceStatistics {
    pub total_experts: usize,
    pub available_count: usize,
    pub busy_count: usize,
    pub away_count: usize,
    pub offline_count: usize,
    pub open_channels: usize,
}

/// Presence tracker
///
/// Reads favor a short-TTL cache over the live record map to bound read
/// amplification; an entry older than its TTL is a cache miss and triggers
/// a fresh lookup, never a stale return.
pub struct PresenceTracker {
    records: Mutex<HashMap<ExpertId, PresenceRecord>>,
    cache: Mutex<HashMap<ExpertId, CachedRecord>>,
    channels: Mutex<HashMap<ExpertId, ChannelSlot>>,
    cache_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Upsert an expert's status. `touch_activity` also resets the idle
    /// clock, which is what client heartbeats do.
    pub fn set_status(&self, expert_id: ExpertId, status: PresenceStatus, touch_activity: bool) {
        let record = {
            let mut records = self.records.lock().unwrap();
            let record = records
                .entry(expert_id)
                .or_insert_with(|| PresenceRecord::new(expert_id));

            record.status = status;
            if touch_activity {
                record.last_activity_at = Utc::now();
            }
            record.clone()
        };

        self.publish(record);
    }

    /// Reset the activity clock and force the expert back to available.
    pub fn touch_activity(&self, expert_id: ExpertId) {
        self.set_status(expert_id, PresenceStatus::Available, true);
    }

    /// Configure auto-away behavior for one expert
    pub fn configure_auto_away(&self, expert_id: ExpertId, enabled: bool, timeout_minutes: u32) {
        let record = {
            let mut records = self.records.lock().unwrap();
            let record = records
                .entry(expert_id)
                .or_insert_with(|| PresenceRecord::new(expert_id));
            record.auto_away_enabled = enabled;
            record.away_timeout_minutes = timeout_minutes;
            record.clone()
        };

        self.publish(record);
    }

    /// Transition idle available/busy experts to away. Offline experts are
    /// untouched. Invoked on a fixed interval by the sweep job; returns the
    /// number of experts demoted.
    pub fn sweep_away(&self) -> usize {
        let now = Utc::now();
        let demoted: Vec<PresenceRecord> = {
            let mut records = self.records.lock().unwrap();
            records
                .values_mut()
                .filter(|record| record.is_idle(now))
                .map(|record| {
                    record.status = PresenceStatus::Away;
                    record.clone()
                })
                .collect()
        };

        let count = demoted.len();
        for record in demoted {
            debug!(expert_id = %record.expert_id, "auto-away sweep demoted expert");
            self.publish(record);
        }
        count
    }

    /// Cached presence read. A TTL-expired entry is treated as a miss and
    /// refreshed from the record map before returning.
    pub fn get_record(&self, expert_id: ExpertId) -> Option<PresenceRecord> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.cache_ttl).unwrap_or_default();

        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&expert_id) {
                if now - entry.fetched_at <= ttl {
                    return Some(entry.record.clone());
                }
            }
        }

        let fresh = {
            let records = self.records.lock().unwrap();
            records.get(&expert_id).cloned()
        };

        if let Some(record) = &fresh {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(
                expert_id,
                CachedRecord {
                    record: record.clone(),
                    fetched_at: now,
                },
            );
        }

        fresh
    }

    pub fn get_status(&self, expert_id: ExpertId) -> Option<PresenceStatus> {
        self.get_record(expert_id).map(|record| record.status)
    }

    pub fn get_last_activity(&self, expert_id: ExpertId) -> Option<DateTime<Utc>> {
        self.get_record(expert_id).map(|record| record.last_activity_at)
    }

    pub fn is_online(&self, expert_id: ExpertId) -> bool {
        self.get_status(expert_id)
            .map(|status| status.is_online())
            .unwrap_or(false)
    }

    /// Open (or share) the status channel for one expert. Channels are
    /// reference counted; every subscribe must be paired with an
    /// unsubscribe.
    pub fn subscribe(&self, expert_id: ExpertId) -> PresenceSubscription {
        let mut channels = self.channels.lock().unwrap();
        let slot = channels.entry(expert_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(16);
            ChannelSlot { tx, observers: 0 }
        });
        slot.observers += 1;

        PresenceSubscription {
            expert_id,
            receiver: slot.tx.subscribe(),
        }
    }

    /// Drop one observer; the channel is torn down when the last observer
    /// unsubscribes.
    pub fn unsubscribe(&self, expert_id: ExpertId) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(slot) = channels.get_mut(&expert_id) {
            slot.observers = slot.observers.saturating_sub(1);
            if slot.observers == 0 {
                channels.remove(&expert_id);
            }
        }
    }

    pub fn statistics(&self) -> PresenceStatistics {
        let records = self.records.lock().unwrap();
        let channels = self.channels.lock().unwrap();

        let mut stats = PresenceStatistics {
            total_experts: records.len(),
            open_channels: channels.len(),
            ..Default::default()
        };

        for record in records.values() {
            match record.status {
                PresenceStatus::Available => stats.available_count += 1,
                PresenceStatus::Busy => stats.busy_count += 1,
                PresenceStatus::Away => stats.away_count += 1,
                PresenceStatus::Offline => stats.offline_count += 1,
            }
        }

        stats
    }

    fn publish(&self, record: PresenceRecord) {
        // Keep the cache coherent with the write path; observers read
        // through the cache within the same TTL window.
        {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(
                record.expert_id,
                CachedRecord {
                    record: record.clone(),
                    fetched_at: Utc::now(),
                },
            );
        }

        let channels = self.channels.lock().unwrap();
        if let Some(slot) = channels.get(&record.expert_id) {
            // Nobody listening is fine
            let _ = slot.tx.send(record);
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_online() {
        assert!(PresenceStatus::Available.is_online());
        assert!(PresenceStatus::Busy.is_online());
        assert!(PresenceStatus::Away.is_online());
        assert!(!PresenceStatus::Offline.is_online());
    }

    #[test]
    fn test_set_and_get_status() {
        let tracker = PresenceTracker::default();
        let expert = ExpertId::new();

        tracker.set_status(expert, PresenceStatus::Available, true);
        assert_eq!(tracker.get_status(expert), Some(PresenceStatus::Available));
        assert!(tracker.is_online(expert));
    }

    #[test]
    fn test_unknown_expert_is_offline() {
        let tracker = PresenceTracker::default();
        assert!(!tracker.is_online(ExpertId::new()));
        assert_eq!(tracker.get_status(ExpertId::new()), None);
    }

    #[test]
    fn test_touch_activity_forces_available() {
        let tracker = PresenceTracker::default();
        let expert = ExpertId::new();

        tracker.set_status(expert, PresenceStatus::Away, false);
        tracker.touch_activity(expert);
        assert_eq!(tracker.get_status(expert), Some(PresenceStatus::Available));
    }

    #[test]
    fn test_sweep_demotes_idle_experts() {
        let tracker = PresenceTracker::default();
        let idle = ExpertId::new();
        let fresh = ExpertId::new();
        let offline = ExpertId::new();

        tracker.set_status(idle, PresenceStatus::Available, true);
        tracker.set_status(fresh, PresenceStatus::Busy, true);
        tracker.set_status(offline, PresenceStatus::Offline, false);

        // Backdate the idle expert past its away timeout
        {
            let mut records = tracker.records.lock().unwrap();
            let record = records.get_mut(&idle).unwrap();
            record.last_activity_at = Utc::now() - chrono::Duration::minutes(11);
        }

        let demoted = tracker.sweep_away();
        assert_eq!(demoted, 1);

        // Sweep wrote through the cache, so the read reflects it
        assert_eq!(tracker.get_status(idle), Some(PresenceStatus::Away));
        assert_eq!(tracker.get_status(fresh), Some(PresenceStatus::Busy));
        assert_eq!(tracker.get_status(offline), Some(PresenceStatus::Offline));
    }

    #[test]
    fn test_sweep_respects_auto_away_flag() {
        let tracker = PresenceTracker::default();
        let expert = ExpertId::new();

        tracker.set_status(expert, PresenceStatus::Available, true);
        tracker.configure_auto_away(expert, false, 10);
        {
            let mut records = tracker.records.lock().unwrap();
            records.get_mut(&expert).unwrap().last_activity_at =
                Utc::now() - chrono::Duration::minutes(60);
        }

        assert_eq!(tracker.sweep_away(), 0);
        assert_eq!(tracker.get_status(expert), Some(PresenceStatus::Available));
    }

    #[test]
    fn test_cache_ttl_expiry_is_a_miss() {
        // Zero TTL: every read must go back to the record map
        let tracker = PresenceTracker::new(Duration::from_secs(0));
        let expert = ExpertId::new();

        tracker.set_status(expert, PresenceStatus::Available, true);
        assert_eq!(tracker.get_status(expert), Some(PresenceStatus::Available));

        // Mutate the record map behind the cache; an expired entry must
        // not serve the old value
        {
            let mut records = tracker.records.lock().unwrap();
            records.get_mut(&expert).unwrap().status = PresenceStatus::Busy;
        }
        assert_eq!(tracker.get_status(expert), Some(PresenceStatus::Busy));
    }

    #[tokio::test]
    async fn test_shared_channel_reference_counting() {
        let tracker = PresenceTracker::default();
        let expert = ExpertId::new();

        let mut first = tracker.subscribe(expert);
        let mut second = tracker.subscribe(expert);
        assert_eq!(tracker.statistics().open_channels, 1);

        tracker.set_status(expert, PresenceStatus::Busy, true);
        assert_eq!(
            first.receiver.recv().await.unwrap().status,
            PresenceStatus::Busy
        );
        assert_eq!(
            second.receiver.recv().await.unwrap().status,
            PresenceStatus::Busy
        );

        tracker.unsubscribe(expert);
        assert_eq!(tracker.statistics().open_channels, 1);
        tracker.unsubscribe(expert);
        assert_eq!(tracker.statistics().open_channels, 0);
    }

    #[test]
    fn test_statistics() {
        let tracker = PresenceTracker::default();

        tracker.set_status(ExpertId::new(), PresenceStatus::Available, true);
        tracker.set_status(ExpertId::new(), PresenceStatus::Available, true);
        tracker.set_status(ExpertId::new(), PresenceStatus::Busy, true);
        tracker.set_status(ExpertId::new(), PresenceStatus::Offline, false);

        let stats = tracker.statistics();
        assert_eq!(stats.total_experts, 4);
        assert_eq!(stats.available_count, 2);
        assert_eq!(stats.busy_count, 1);
        assert_eq!(stats.offline_count, 1);
    }
}
