use std::{fmt, sync::Arc};

use chrono::{DateTime, Local};
use log::{debug, info};
use tokio::sync::watch;

use crate::{message::Field, store::Store};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Summary {
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub since: DateTime<Local>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "last {} (min {}, max {}) over {} points since {}",
            self.last,
            self.min,
            self.max,
            self.count,
            self.since.format("%H:%M:%S")
        )
    }
}

pub(crate) fn summarize(timestamps: &[DateTime<Local>], values: &[f64]) -> Option<Summary> {
    let last = *values.last()?;
    let since = *timestamps.first()?;
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
            (min.min(*v), max.max(*v))
        });
    Some(Summary {
        last,
        min,
        max,
        count: values.len(),
        since,
    })
}

/// Redraw the rolling history each time the scheduler publishes. Runs until
/// the scheduler goes away.
pub(crate) async fn follow(
    store: Arc<Store>,
    mut refresh: watch::Receiver<Option<DateTime<Local>>>,
) {
    while refresh.changed().await.is_ok() {
        for field in Field::TRACKED.iter() {
            for device in store.devices(*field).await {
                if let Some((timestamps, values)) = store.series(*field, &device).await {
                    if let Some(summary) = summarize(&timestamps, &values) {
                        info!("{} of {}: {}", field, device, summary);
                    }
                }
            }
        }
    }
    debug!("trend renderer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn summary_of_series() {
        let start = Local::now();
        let timestamps: Vec<_> = (0..4).map(|i| start + Duration::seconds(i * 3)).collect();
        let summary = summarize(&timestamps, &[20.0, 22.5, 19.0, 21.0]).unwrap();
        assert_eq!(summary.last, 21.0);
        assert_eq!(summary.min, 19.0);
        assert_eq!(summary.max, 22.5);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.since, start);
    }

    #[test]
    fn empty_series_has_no_summary() {
        assert!(summarize(&[], &[]).is_none());
    }
}
