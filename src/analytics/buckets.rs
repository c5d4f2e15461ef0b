use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{Granularity, PerformanceWindow, Sample, ServerId};

/// Running totals for one open bucket
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    pub count: u64,
    pub latency_sum: u64,
    pub errors: u64,
    pub bytes: u64,
}

impl Accumulator {
    pub fn add(&mut self, sample: &Sample) {
        self.count += 1;
        self.latency_sum = self.latency_sum.saturating_add(sample.latency_ms());
        if !sample.success() {
            self.errors += 1;
        }
        self.bytes = self.bytes.saturating_add(sample.bytes());
    }

    pub fn mean_latency(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.latency_sum as f64 / self.count as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }

    fn window(
        &self,
        server_id: ServerId,
        granularity: Granularity,
        start: DateTime<Utc>,
    ) -> PerformanceWindow {
        PerformanceWindow {
            server_id,
            granularity,
            start,
            end: start + granularity.width(),
            sample_count: self.count,
            mean_latency_ms: self.mean_latency(),
            error_rate: self.error_rate(),
            bytes_transferred: self.bytes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenBucket {
    start: DateTime<Utc>,
    acc: Accumulator,
}

/// Open minute, hour and day buckets for every server
///
/// Each granularity accumulates samples directly. A sample older than the
/// open bucket folds into it; a newer one closes it.
#[derive(Debug, Default)]
pub struct BucketSet {
    open: HashMap<(ServerId, Granularity), OpenBucket>,
}

impl BucketSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample, returning any windows it closed
    pub fn ingest(&mut self, sample: &Sample) -> Vec<PerformanceWindow> {
        let server_id = sample.server_id();
        let ts = sample.timestamp();
        let mut closed = Vec::new();

        for granularity in Granularity::ALL {
            let start = granularity.bucket_start(ts);
            let bucket = self
                .open
                .entry((server_id, granularity))
                .or_insert(OpenBucket {
                    start,
                    acc: Accumulator::default(),
                });

            if start > bucket.start {
                closed.push(bucket.acc.window(server_id, granularity, bucket.start));
                *bucket = OpenBucket {
                    start,
                    acc: Accumulator::default(),
                };
            }
            bucket.acc.add(sample);
        }

        closed
    }

    /// Close every bucket whose period ended at or before `now`
    pub fn close_elapsed(&mut self, now: DateTime<Utc>) -> Vec<PerformanceWindow> {
        let mut closed = Vec::new();
        self.open.retain(|&(server_id, granularity), bucket| {
            if bucket.start + granularity.width() <= now {
                closed.push(bucket.acc.window(server_id, granularity, bucket.start));
                false
            } else {
                true
            }
        });
        closed.sort_by_key(|w| (w.server_id, w.start));
        closed
    }

    /// Partial window for the bucket still open, if any
    pub fn open_window(
        &self,
        server_id: ServerId,
        granularity: Granularity,
    ) -> Option<PerformanceWindow> {
        self.open
            .get(&(server_id, granularity))
            .map(|b| b.acc.window(server_id, granularity, b.start))
    }

    pub fn forget(&mut self, server_id: ServerId) {
        self.open.retain(|&(id, _), _| id != server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrafficSample;
    use chrono::{Duration, TimeZone};

    fn sample(ts: DateTime<Utc>, latency_ms: u64, success: bool) -> Sample {
        Sample::Traffic(TrafficSample {
            server_id: 1,
            subscriber_id: None,
            timestamp: ts,
            latency_ms,
            success,
            bytes: 100,
        })
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 3, 13, 47, 10).unwrap()
    }

    #[test]
    fn test_accumulates_until_next_bucket() {
        let mut buckets = BucketSet::new();
        let t0 = base();

        assert!(buckets.ingest(&sample(t0, 100, true)).is_empty());
        assert!(buckets.ingest(&sample(t0 + Duration::seconds(20), 300, false)).is_empty());

        let closed = buckets.ingest(&sample(t0 + Duration::seconds(60), 50, true));
        assert_eq!(closed.len(), 1);
        let window = &closed[0];
        assert_eq!(window.granularity, Granularity::Minute);
        assert_eq!(window.sample_count, 2);
        assert_eq!(window.mean_latency_ms, 200.0);
        assert_eq!(window.error_rate, 0.5);
        assert_eq!(window.bytes_transferred, 200);
        assert_eq!(window.end - window.start, Duration::minutes(1));

        let hour = buckets.open_window(1, Granularity::Hour).unwrap();
        assert_eq!(hour.sample_count, 3);
    }

    #[test]
    fn test_late_sample_folds_into_open_bucket() {
        let mut buckets = BucketSet::new();
        let t0 = base();

        buckets.ingest(&sample(t0 + Duration::minutes(2), 100, true));
        let closed = buckets.ingest(&sample(t0, 300, true));
        assert!(closed.is_empty());

        let minute = buckets.open_window(1, Granularity::Minute).unwrap();
        assert_eq!(minute.sample_count, 2);
        assert_eq!(minute.start, Granularity::Minute.bucket_start(t0 + Duration::minutes(2)));
    }

    #[test]
    fn test_close_elapsed_only_closes_finished_periods() {
        let mut buckets = BucketSet::new();
        let t0 = base();
        buckets.ingest(&sample(t0, 100, true));

        assert!(buckets.close_elapsed(t0 + Duration::seconds(10)).is_empty());

        let closed = buckets.close_elapsed(t0 + Duration::minutes(1));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].granularity, Granularity::Minute);
        assert!(buckets.open_window(1, Granularity::Minute).is_none());
        assert!(buckets.open_window(1, Granularity::Hour).is_some());

        let closed = buckets.close_elapsed(t0 + Duration::days(1));
        assert_eq!(closed.len(), 2);
    }
}
