//! Per-message cost and call-rate accounting for the dispatch worker.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of entries printed per ranking.
const REPORT_TOP: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
struct MessageStat {
    elapsed: Duration,
    calls: u64,
}

impl MessageStat {
    fn per_call(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        let nanos = self.elapsed.as_nanos() / u128::from(self.calls);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Accumulates handler cost per message id over a reporting window.
///
/// Owned by the single dispatch worker; not shared across tasks.
#[derive(Debug)]
pub struct DispatchStats {
    stats: HashMap<String, MessageStat>,
    window_start: Instant,
    interval: Duration,
}

impl DispatchStats {
    pub fn new(interval: Duration) -> Self {
        Self {
            stats: HashMap::new(),
            window_start: Instant::now(),
            interval,
        }
    }

    pub fn record(&mut self, id: &str, elapsed: Duration) {
        let stat = self.stats.entry(id.to_string()).or_default();
        stat.elapsed += elapsed;
        stat.calls += 1;
    }

    /// Number of distinct message ids in the current window.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Up to `n` ids with the highest average cost per call.
    pub fn slowest(&self, n: usize) -> Vec<(String, Duration)> {
        let mut ranked: Vec<_> = self
            .stats
            .iter()
            .map(|(id, stat)| (id.clone(), stat.per_call()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Up to `n` ids with the highest call rate (calls per second over
    /// `window`).
    pub fn busiest(&self, n: usize, window: Duration) -> Vec<(String, f64)> {
        let secs = window.as_secs_f64().max(f64::EPSILON);
        let mut ranked: Vec<_> = self
            .stats
            .iter()
            .map(|(id, stat)| (id.clone(), stat.calls))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
            .into_iter()
            .map(|(id, calls)| (id, calls as f64 / secs))
            .collect()
    }

    /// Log both rankings and start a new window once the reporting interval
    /// has elapsed. Returns whether a report was emitted.
    pub fn maybe_report(&mut self, now: Instant) -> bool {
        let window = now.saturating_duration_since(self.window_start);
        if window < self.interval {
            return false;
        }

        debug!("=========== message stats start ============");
        let slowest = self.slowest(REPORT_TOP);
        let busiest = self.busiest(REPORT_TOP, window);
        for ((slow_id, per_call), (busy_id, rate)) in slowest.iter().zip(busiest.iter()) {
            debug!(
                "cost time per call: {} {:.2}ms, call per second {} {:.2}",
                slow_id,
                per_call.as_secs_f64() * 1000.0,
                busy_id,
                rate
            );
        }
        debug!("=========== message stats end ============");

        self.stats.clear();
        self.window_start = now;
        true
    }
}
