// ── Value store ──
//
// Per-device cache of the last known sample for every register. Lock-free
// reads through `DashMap`, push-based change notification through a
// `watch` version counter. Only the coordinator's active poll or write
// mutates it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

use heatlink_api::Record;

use crate::catalog::Catalog;
use crate::transform::ValueTransform;
use crate::value::Value;

/// Last known state of one register.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub id: u32,
    /// Name reported by the device.
    pub name: String,
    pub raw: String,
    /// Classified raw value.
    pub value: Option<Value>,
    /// Output of the value transform; `None` when it reported no reading.
    pub transformed: Option<Value>,
    pub fetched_at: DateTime<Utc>,
    /// Poll cycle that produced this sample.
    pub cycle: u64,
}

/// Counters from one [`ValueStore::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Records in the response.
    pub received: usize,
    /// Samples replaced or inserted.
    pub stored: usize,
    /// Records without a value; the previous sample was kept.
    pub retained: usize,
    /// Records the transform rejected as "no reading".
    pub sentinel: usize,
}

pub struct ValueStore {
    catalog: Arc<Catalog>,
    samples: DashMap<u32, Arc<Sample>>,
    cycle: AtomicU64,
    version: watch::Sender<u64>,
    last_update: watch::Sender<Option<DateTime<Utc>>>,
}

impl ValueStore {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let (version, _) = watch::channel(0u64);
        let (last_update, _) = watch::channel(None);
        Self {
            catalog,
            samples: DashMap::new(),
            cycle: AtomicU64::new(0),
            version,
            last_update,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn get(&self, id: u32) -> Option<Arc<Sample>> {
        self.samples.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// All samples, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Sample>> {
        let mut all: Vec<Arc<Sample>> = self.samples.iter().map(|r| Arc::clone(r.value())).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Version counter, bumped after every merge or overwrite.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.borrow()
    }

    /// Number of the most recent merge cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    /// Whether the most recent merge refreshed `id`.
    pub fn in_last_cycle(&self, id: u32) -> bool {
        let current = self.cycle();
        current > 0 && self.get(id).is_some_and(|s| s.cycle == current)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Merge one poll cycle's records.
    ///
    /// Ids missing from `records` keep their previous sample. A record with
    /// an empty or `null` value, or one the transform rejects, also leaves
    /// the previous sample in place.
    pub fn merge(
        &self,
        records: &[Record],
        transform: &dyn ValueTransform,
        now: DateTime<Utc>,
    ) -> MergeStats {
        let cycle = self.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        let mut stats = MergeStats {
            received: records.len(),
            ..MergeStats::default()
        };

        for record in records {
            let Some(id) = record.numeric_id() else {
                continue;
            };
            let Some(value) = Value::classify(&record.value) else {
                stats.retained += 1;
                continue;
            };
            let Some(transformed) = transform.transform(self.catalog.get(id), value.clone()) else {
                stats.sentinel += 1;
                continue;
            };

            self.samples.insert(
                id,
                Arc::new(Sample {
                    id,
                    name: record.name.clone(),
                    raw: record.value.clone(),
                    value: Some(value),
                    transformed: Some(transformed),
                    fetched_at: now,
                    cycle,
                }),
            );
            stats.stored += 1;
        }

        self.publish(now);
        stats
    }

    /// Replace one sample after a successful write.
    pub fn overwrite(
        &self,
        id: u32,
        raw: &str,
        transform: &dyn ValueTransform,
        now: DateTime<Utc>,
    ) -> Arc<Sample> {
        let value = Value::classify(raw);
        let transformed = value
            .clone()
            .and_then(|v| transform.transform(self.catalog.get(id), v));
        let name = self
            .get(id)
            .map(|s| s.name.clone())
            .or_else(|| self.catalog.get(id).map(|d| d.vendor_name.clone()))
            .unwrap_or_else(|| format!("entity_{id}"));

        let sample = Arc::new(Sample {
            id,
            name,
            raw: raw.to_owned(),
            value,
            transformed,
            fetched_at: now,
            cycle: self.cycle(),
        });
        self.samples.insert(id, Arc::clone(&sample));
        self.publish(now);
        sample
    }

    fn publish(&self, now: DateTime<Utc>) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.last_update.send_modify(|t| *t = Some(now));
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}
