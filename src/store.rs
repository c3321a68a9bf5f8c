//! Shared state between the poll scheduler (sole writer) and readers such as
//! the HTTP API and the trend renderer.
//!
//! The latest snapshot lives behind an `Arc` that is swapped wholesale, so a
//! reader holds a consistent copy for as long as it needs without blocking the
//! writer. The rolling series are mutated in place under their own lock; each
//! (timestamp, value) pair is stored as one entry so a reader can never see
//! half of an append.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Local};
use log::debug;
use tokio::sync::RwLock;

use crate::message::{Batch, Field, Reading, Sample};

/// Latest sample per device, ordered by device id.
pub(crate) type Snapshot = BTreeMap<String, Sample>;

type Series = VecDeque<(DateTime<Local>, f64)>;

pub(crate) struct Store {
    latest: RwLock<Arc<Snapshot>>,
    series: RwLock<HashMap<Field, HashMap<String, Series>>>,
    capacity: usize,
}

impl Store {
    pub fn new(capacity: usize) -> Self {
        Self {
            latest: RwLock::new(Arc::new(Snapshot::new())),
            series: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Apply one poll: swap the snapshot and extend the series with the same timestamp.
    pub async fn publish(&self, batch: &Batch) {
        self.replace_latest(&batch.readings, batch.timestamp).await;
        self.append_series(&batch.readings, batch.timestamp).await;
    }

    /// Devices missing from `readings` are dropped from the snapshot.
    pub async fn replace_latest(&self, readings: &[Reading], time: DateTime<Local>) {
        let snapshot: Snapshot = readings
            .iter()
            .map(|reading| {
                (
                    reading.device.clone(),
                    Sample {
                        reading: reading.clone(),
                        time,
                    },
                )
            })
            .collect();
        debug!("snapshot replaced with {} device(s)", snapshot.len());
        *self.latest.write().await = Arc::new(snapshot);
    }

    /// Devices missing from `readings` keep their history untouched.
    pub async fn append_series(&self, readings: &[Reading], time: DateTime<Local>) {
        let mut series = self.series.write().await;
        for field in Field::TRACKED.iter() {
            let per_device = series.entry(*field).or_insert_with(HashMap::new);
            for reading in readings {
                let points = per_device
                    .entry(reading.device.clone())
                    .or_insert_with(|| VecDeque::with_capacity(self.capacity));
                // wall clock may step backwards, keep the series ordered
                let time = match points.back() {
                    Some((last, _)) if *last > time => *last,
                    _ => time,
                };
                points.push_back((time, reading.value(*field)));
                while points.len() > self.capacity {
                    points.pop_front();
                }
            }
        }
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.latest.read().await.clone()
    }

    pub async fn series(
        &self,
        field: Field,
        device: &str,
    ) -> Option<(Vec<DateTime<Local>>, Vec<f64>)> {
        let series = self.series.read().await;
        let points = series.get(&field)?.get(device)?;
        Some(points.iter().cloned().unzip())
    }

    /// Devices with a history for `field`, sorted.
    pub async fn devices(&self, field: Field) -> Vec<String> {
        let series = self.series.read().await;
        let mut devices: Vec<String> = series
            .get(&field)
            .map(|per_device| per_device.keys().cloned().collect())
            .unwrap_or_default();
        devices.sort();
        devices
    }
}
