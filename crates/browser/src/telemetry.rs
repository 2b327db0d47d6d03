//! Per-method success/failure counters and mean execution time, queryable
//! but never the basis for correctness decisions (spec.md §4.E) — the
//! pipeline's retry ladder branches only on the immediate call's outcome.
//! Informs priority ordering only (e.g. which driver to try first next time).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MethodStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub mean_execution_ms: f64,
}

impl MethodStats {
    fn record(&mut self, ok: bool, elapsed: Duration) {
        let n = self.success_count + self.failure_count;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.mean_execution_ms = (self.mean_execution_ms * n as f64 + elapsed_ms) / (n + 1) as f64;
        if ok {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }
}

#[derive(Default)]
pub struct Telemetry {
    methods: Mutex<HashMap<String, MethodStats>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, ok: bool, elapsed: Duration) {
        self.methods
            .lock()
            .entry(method.to_owned())
            .or_default()
            .record(ok, elapsed);
    }

    pub fn snapshot(&self) -> HashMap<String, MethodStats> {
        self.methods.lock().clone()
    }

    pub fn get(&self, method: &str) -> MethodStats {
        self.methods.lock().get(method).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure_counts() {
        let telemetry = Telemetry::new();
        telemetry.record("navigate", true, Duration::from_millis(100));
        telemetry.record("navigate", false, Duration::from_millis(300));
        let stats = telemetry.get("navigate");
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.mean_execution_ms, 200.0);
    }

    #[test]
    fn unknown_method_reports_zeroed_stats() {
        let telemetry = Telemetry::new();
        let stats = telemetry.get("nonexistent");
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.mean_execution_ms, 0.0);
    }
}
