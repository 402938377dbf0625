//! Dispatch-period metrics.
//!
//! A ring buffer of measured scheduler dispatch periods, recorded
//! without heap allocation inside the dispatch loop. A stalled tick
//! shows up here as an oversized period; the stall count is the
//! externally observable face of the overrun policy.

use std::time::Duration;

/// Dispatch period metrics with a ring buffer for percentile queries.
#[derive(Debug)]
pub struct PeriodMetrics {
    /// Ring buffer of dispatch-to-dispatch periods in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples retained (saturates at buffer size).
    sample_count: usize,
    /// Total periods recorded.
    total_periods: u64,
    /// Minimum observed period in nanoseconds.
    min_ns: u64,
    /// Maximum observed period in nanoseconds.
    max_ns: u64,
    /// Sum of all periods for mean calculation.
    sum_ns: u64,
    /// Periods that exceeded the nominal base period.
    stall_count: u64,
    /// Nominal base period in nanoseconds.
    nominal_ns: u64,
}

impl PeriodMetrics {
    /// Create a collector retaining `capacity` samples.
    ///
    /// Periods longer than `nominal` (with a small jitter allowance)
    /// are counted as stalls.
    #[must_use]
    pub fn new(capacity: usize, nominal: Duration) -> Self {
        let size = capacity.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_periods: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            stall_count: 0,
            nominal_ns: nominal.as_nanos() as u64,
        }
    }

    /// Record one dispatch-to-dispatch period.
    pub fn record(&mut self, period: Duration) {
        let ns = period.as_nanos() as u64;

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = (self.sample_count + 1).min(self.samples.len());

        self.total_periods += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        // Allow 50% jitter before calling a period a stall; a true
        // stall waits at least one full extra period.
        if ns > self.nominal_ns + self.nominal_ns / 2 {
            self.stall_count += 1;
        }
    }

    /// Total periods recorded.
    #[must_use]
    pub fn total_periods(&self) -> u64 {
        self.total_periods
    }

    /// Minimum observed period.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_periods > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Maximum observed period.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_periods > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean period.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_periods > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_periods))
    }

    /// Number of periods that overran the nominal base period.
    #[must_use]
    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    /// Compute a percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` with no samples or an out-of-range percentile.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_nanos(sorted[idx.min(sorted.len() - 1)]))
    }

    /// Get an immutable snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_periods: self.total_periods,
            min_ns: (self.total_periods > 0).then_some(self.min_ns),
            max_ns: (self.total_periods > 0).then_some(self.max_ns),
            mean_ns: (self.total_periods > 0).then_some(self.sum_ns / self.total_periods),
            stall_count: self.stall_count,
            sample_count: self.sample_count,
        }
    }
}

/// Immutable snapshot of period metrics for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Total periods recorded.
    pub total_periods: u64,
    /// Minimum period in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum period in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean period in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Periods that overran the nominal base period.
    pub stall_count: u64,
    /// Number of samples retained in the ring.
    pub sample_count: usize,
}

impl MetricsSnapshot {
    /// Jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
