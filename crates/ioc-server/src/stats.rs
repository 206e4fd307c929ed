//! Server counters and their JSON snapshot

use crate::protocol::ResponseKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds of the latency buckets, in microseconds.
const LATENCY_BUCKETS_US: [u64; 9] = [10, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Request latency distribution.
///
/// The last bucket also collects every value above its bound.
#[derive(Debug)]
pub struct LatencyHistogram {
    counts: [AtomicU64; LATENCY_BUCKETS_US.len()],
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    /// Empty histogram.
    pub fn new() -> Self {
        Self {
            counts: Default::default(),
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record one latency.
    pub fn observe(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let bucket = LATENCY_BUCKETS_US
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(LATENCY_BUCKETS_US.len() - 1);
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Mean latency in microseconds.
    pub fn mean_us(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum_us.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Number of observations.
    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn buckets(&self) -> Vec<BucketSnapshot> {
        LATENCY_BUCKETS_US
            .iter()
            .zip(&self.counts)
            .map(|(&le_us, count)| BucketSnapshot {
                le_us,
                count: count.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct RequestCounters {
    read: AtomicU64,
    write: AtomicU64,
    flush: AtomicU64,
    cow: AtomicU64,
    range_register: AtomicU64,
    range_unregister: AtomicU64,
}

impl RequestCounters {
    fn get(&self, kind: ResponseKind) -> &AtomicU64 {
        match kind {
            ResponseKind::ReadAck => &self.read,
            ResponseKind::WriteAck => &self.write,
            ResponseKind::FlushAck => &self.flush,
            ResponseKind::CowAck => &self.cow,
            ResponseKind::RangeRegisterAck => &self.range_register,
            ResponseKind::RangeUnregisterAck => &self.range_unregister,
        }
    }
}

/// Counters shared by the server and its tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    acks: RequestCounters,
    failures: AtomicU64,
    latency: LatencyHistogram,
}

impl ServerStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count bytes served to clients.
    pub fn add_read(&self, bytes: usize) {
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count bytes received from clients.
    pub fn add_write(&self, bytes: usize) {
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count an acknowledgement sent after `latency`.
    pub fn record_ack(&self, kind: ResponseKind, status: i64, latency: Duration) {
        self.acks.get(kind).fetch_add(1, Ordering::Relaxed);
        if status < 0 {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.observe(latency);
    }

    /// Bytes served to clients.
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    /// Bytes received from clients.
    pub fn write_bytes(&self) -> u64 {
        self.write_bytes.load(Ordering::Relaxed)
    }

    /// Acknowledgements of `kind` sent.
    pub fn acks(&self, kind: ResponseKind) -> u64 {
        self.acks.get(kind).load(Ordering::Relaxed)
    }

    /// Acknowledgements carrying a negative status.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Request latency distribution.
    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_bytes: self.read_bytes(),
            write_bytes: self.write_bytes(),
            read_acks: self.acks(ResponseKind::ReadAck),
            write_acks: self.acks(ResponseKind::WriteAck),
            flush_acks: self.acks(ResponseKind::FlushAck),
            cow_acks: self.acks(ResponseKind::CowAck),
            range_register_acks: self.acks(ResponseKind::RangeRegisterAck),
            range_unregister_acks: self.acks(ResponseKind::RangeUnregisterAck),
            failures: self.failures(),
            latency: LatencySnapshot {
                mean_us: self.latency.mean_us(),
                count: self.latency.total_count(),
                buckets: self.latency.buckets(),
            },
        }
    }
}

/// Serializable copy of [`ServerStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Bytes served to clients
    pub read_bytes: u64,
    /// Bytes received from clients
    pub write_bytes: u64,
    /// Read acknowledgements
    pub read_acks: u64,
    /// Write acknowledgements
    pub write_acks: u64,
    /// Flush acknowledgements
    pub flush_acks: u64,
    /// Copy-on-write acknowledgements
    pub cow_acks: u64,
    /// Range registration acknowledgements
    pub range_register_acks: u64,
    /// Range release acknowledgements
    pub range_unregister_acks: u64,
    /// Acknowledgements with a negative status
    pub failures: u64,
    /// Request latency
    pub latency: LatencySnapshot,
}

/// Summary of a [`LatencyHistogram`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    /// Mean latency in microseconds
    pub mean_us: f64,
    /// Number of observations
    pub count: u64,
    /// Per-bucket counts
    pub buckets: Vec<BucketSnapshot>,
}

/// One histogram bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Upper bound in microseconds
    pub le_us: u64,
    /// Observations in the bucket
    pub count: u64,
}

impl StatsSnapshot {
    /// Export as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export as compact JSON.
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Histogram ====================

    #[test]
    fn test_histogram_buckets() {
        let hist = LatencyHistogram::new();
        hist.observe(Duration::from_micros(5));
        hist.observe(Duration::from_micros(60));
        hist.observe(Duration::from_secs(1));

        assert_eq!(hist.total_count(), 3);
        let buckets = hist.buckets();
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[2].count, 1);
        assert_eq!(buckets.last().unwrap().count, 1);
    }

    #[test]
    fn test_histogram_mean() {
        let hist = LatencyHistogram::new();
        assert_eq!(hist.mean_us(), 0.0);
        hist.observe(Duration::from_micros(100));
        hist.observe(Duration::from_micros(300));
        assert!((hist.mean_us() - 200.0).abs() < 0.01);
    }

    // ==================== Counters ====================

    #[test]
    fn test_ack_counters() {
        let stats = ServerStats::new();
        stats.add_read(10);
        stats.add_write(4);
        stats.record_ack(ResponseKind::ReadAck, 10, Duration::ZERO);
        stats.record_ack(ResponseKind::WriteAck, -1, Duration::ZERO);

        assert_eq!(stats.read_bytes(), 10);
        assert_eq!(stats.write_bytes(), 4);
        assert_eq!(stats.acks(ResponseKind::ReadAck), 1);
        assert_eq!(stats.acks(ResponseKind::FlushAck), 0);
        assert_eq!(stats.failures(), 1);
    }

    #[test]
    fn test_snapshot_json() {
        let stats = ServerStats::new();
        stats.add_read(1234);
        stats.record_ack(ResponseKind::CowAck, 0, Duration::from_micros(20));

        let json = stats.snapshot().to_json().unwrap();
        assert!(json.contains("read_bytes"));
        assert!(json.contains("1234"));
        assert!(json.contains("cow_acks"));

        let back: StatsSnapshot = serde_json::from_str(&stats.snapshot().to_json_compact().unwrap()).unwrap();
        assert_eq!(back, stats.snapshot());
    }
}
