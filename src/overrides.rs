//! Priority-array override arbitration.
//!
//! The single synchronization point through which every protocol adapter's
//! write reaches the simulation. Each point path carries up to 16 numbered
//! override slots; the lowest occupied slot number wins. Expiry is lazy —
//! entries are purged when the point is next read, so the store needs no
//! timer of its own.
//!
//! The store is deliberately agnostic to topology: writing to a path no
//! equipment owns is not an error, it simply never gets consumed.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};

/// Lowest (strongest) command priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest (weakest) command priority.
pub const MAX_PRIORITY: u8 = 16;

/// Store-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Priority outside 1..=16. Rejected, never clamped.
    #[error("priority {0} outside 1..=16")]
    InvalidPriority(u8),
}

/// Time source for expiry checks; swapped for a manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One pending override on a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointOverride {
    pub value: f64,
    /// 1..=16, lower number is a stronger claim.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    /// None means the override never self-expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Who or what set the override.
    pub source: String,
}

impl PointOverride {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now > expires,
            None => false,
        }
    }
}

type OverrideTable = BTreeMap<u8, PointOverride>;

const SHARD_COUNT: usize = 16;

/// Concurrent override store, sharded by path hash so adapters writing
/// disjoint points do not contend on one lock.
pub struct OverrideStore {
    shards: Vec<Mutex<HashMap<String, OverrideTable>>>,
    clock: Arc<dyn Clock>,
}

impl Default for OverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            clock,
        }
    }

    /// Set an override. Replaces any existing entry at the same
    /// (path, priority). `ttl` of None means no self-expiry.
    pub fn set_override(
        &self,
        path: &str,
        value: f64,
        priority: u8,
        ttl: Option<Duration>,
        source: &str,
    ) -> Result<(), StoreError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(StoreError::InvalidPriority(priority));
        }

        let now = self.clock.now();
        let expires_at = ttl.and_then(|d| {
            chrono::Duration::from_std(d)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
        });

        let entry = PointOverride {
            value,
            priority,
            created_at: now,
            expires_at,
            source: source.to_string(),
        };

        let mut shard = self.shard(path);
        shard.entry(path.to_string()).or_default().insert(priority, entry);
        drop(shard);

        info!(
            "override set: {} = {} (priority {}, source: {})",
            path, value, priority, source
        );
        Ok(())
    }

    /// Release one priority slot, or every slot for the path when `priority`
    /// is None. Returns whether anything was removed.
    pub fn release_override(&self, path: &str, priority: Option<u8>) -> bool {
        let mut shard = self.shard(path);
        let released = match priority {
            None => shard.remove(path).is_some(),
            Some(p) => match shard.get_mut(path) {
                Some(table) => {
                    let removed = table.remove(&p).is_some();
                    if table.is_empty() {
                        shard.remove(path);
                    }
                    removed
                }
                None => false,
            },
        };
        drop(shard);

        if released {
            match priority {
                None => info!("all overrides released: {}", path),
                Some(p) => info!("override released: {} (priority {})", path, p),
            }
        }
        released
    }

    /// Winning (value, priority) for a path, purging expired entries first.
    /// Deletes the table when the purge empties it.
    pub fn get_effective(&self, path: &str) -> Option<(f64, u8)> {
        let now = self.clock.now();
        let mut shard = self.shard(path);
        let table = shard.get_mut(path)?;
        table.retain(|_, entry| !entry.is_expired(now));
        if table.is_empty() {
            shard.remove(path);
            debug!("override table emptied by expiry: {}", path);
            return None;
        }
        // BTreeMap keeps slots ordered, so the first entry is the winner.
        table
            .iter()
            .next()
            .map(|(priority, entry)| (entry.value, *priority))
    }

    /// Diagnostic snapshot of every live override, purging expiry as a side
    /// effect.
    pub fn list_active(&self) -> HashMap<String, Vec<PointOverride>> {
        let now = self.clock.now();
        let mut result = HashMap::new();
        for shard in &self.shards {
            let mut guard = shard.lock().unwrap_or_else(|e| e.into_inner());
            guard.retain(|path, table| {
                table.retain(|_, entry| !entry.is_expired(now));
                if table.is_empty() {
                    return false;
                }
                result.insert(path.clone(), table.values().cloned().collect());
                true
            });
        }
        result
    }

    fn shard(&self, path: &str) -> MutexGuard<'_, HashMap<String, OverrideTable>> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let index = (hasher.finish() as usize) % SHARD_COUNT;
        self.shards[index].lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Manually advanced clock for TTL tests.
    struct ManualClock {
        now: StdMutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: StdMutex::new(Utc::now()),
            })
        }

        fn advance(&self, d: Duration) {
            let mut now = self.now.lock().unwrap();
            *now = *now + chrono::Duration::from_std(d).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    const PATH: &str = "building_1.ahu_1.supply_temp_setpoint";

    #[test]
    fn lowest_priority_number_wins() {
        let store = OverrideStore::new();
        store.set_override(PATH, 60.0, 12, None, "schedule").unwrap();
        store.set_override(PATH, 55.0, 4, None, "operator").unwrap();
        store.set_override(PATH, 58.0, 8, None, "bacnet").unwrap();

        assert_eq!(store.get_effective(PATH), Some((55.0, 4)));

        // Releasing the strongest slot falls back to the next one.
        assert!(store.release_override(PATH, Some(4)));
        assert_eq!(store.get_effective(PATH), Some((58.0, 8)));
    }

    #[test]
    fn same_slot_overwrites_in_place() {
        let store = OverrideStore::new();
        store.set_override(PATH, 50.0, 8, None, "a").unwrap();
        store.set_override(PATH, 51.0, 8, None, "b").unwrap();

        assert_eq!(store.get_effective(PATH), Some((51.0, 8)));
        assert_eq!(store.list_active()[PATH].len(), 1);
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let store = OverrideStore::new();
        assert_eq!(
            store.set_override(PATH, 1.0, 0, None, "t"),
            Err(StoreError::InvalidPriority(0))
        );
        assert_eq!(
            store.set_override(PATH, 1.0, 17, None, "t"),
            Err(StoreError::InvalidPriority(17))
        );
        assert_eq!(store.get_effective(PATH), None);
    }

    #[test]
    fn releasing_last_entry_removes_the_path() {
        let store = OverrideStore::new();
        store.set_override(PATH, 42.0, 8, None, "t").unwrap();
        assert!(store.release_override(PATH, Some(8)));

        assert_eq!(store.get_effective(PATH), None);
        assert!(store.list_active().is_empty());
        // A second release is a no-op.
        assert!(!store.release_override(PATH, None));
    }

    #[test]
    fn release_all_clears_every_slot() {
        let store = OverrideStore::new();
        store.set_override(PATH, 1.0, 3, None, "t").unwrap();
        store.set_override(PATH, 2.0, 9, None, "t").unwrap();
        assert!(store.release_override(PATH, None));
        assert_eq!(store.get_effective(PATH), None);
    }

    #[test]
    fn ttl_expires_on_a_manual_clock() {
        let clock = ManualClock::new();
        let store = OverrideStore::with_clock(clock.clone());
        store
            .set_override(PATH, 72.5, 8, Some(Duration::from_secs(60)), "t")
            .unwrap();

        // Visible immediately and just before the deadline.
        assert_eq!(store.get_effective(PATH), Some((72.5, 8)));
        clock.advance(Duration::from_millis(59_900));
        assert_eq!(store.get_effective(PATH), Some((72.5, 8)));

        // Gone just after, and the path vanishes from the listing.
        clock.advance(Duration::from_millis(200));
        assert_eq!(store.get_effective(PATH), None);
        assert!(store.list_active().is_empty());
    }

    #[test]
    fn expired_entry_yields_to_weaker_survivor() {
        let clock = ManualClock::new();
        let store = OverrideStore::with_clock(clock.clone());
        store
            .set_override(PATH, 50.0, 2, Some(Duration::from_secs(10)), "t")
            .unwrap();
        store.set_override(PATH, 60.0, 10, None, "t").unwrap();

        assert_eq!(store.get_effective(PATH), Some((50.0, 2)));
        clock.advance(Duration::from_secs(11));
        assert_eq!(store.get_effective(PATH), Some((60.0, 10)));
    }

    #[test]
    fn concurrent_writers_to_one_slot_leave_one_value() {
        let store = Arc::new(OverrideStore::new());
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store
                    .set_override(PATH, f64::from(i), 8, None, "racer")
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let (value, priority) = store.get_effective(PATH).unwrap();
        assert_eq!(priority, 8);
        assert!((0.0..32.0).contains(&value));
        assert_eq!(store.list_active()[PATH].len(), 1);
    }

    #[test]
    fn points_are_independent() {
        let store = OverrideStore::new();
        store.set_override("a.x", 1.0, 8, None, "t").unwrap();
        store.set_override("b.y", 2.0, 8, None, "t").unwrap();

        assert!(store.release_override("a.x", None));
        assert_eq!(store.get_effective("a.x"), None);
        assert_eq!(store.get_effective("b.y"), Some((2.0, 8)));
    }
}
