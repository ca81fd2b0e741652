//! Run-time diagnostics of the control loop
//!
//! Owned by whoever builds the [`ThermalManager`](super::ThermalManager) and
//! shared with it; counters live and die with that owner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug)]
pub struct DiagnosticContext {
    cycles: AtomicU64,
    last_cycle_us: AtomicU64,
    max_cycle_us: AtomicU64,
    emergencies: AtomicU64,
    scans: AtomicU64,
    actuations: AtomicU64,
    actuation_errors: AtomicU64,
    started: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticSnapshot {
    pub cycles: u64,
    pub last_cycle_us: u64,
    pub max_cycle_us: u64,
    pub emergencies: u64,
    pub scans: u64,
    pub actuations: u64,
    pub actuation_errors: u64,
    pub uptime_secs: u64,
}

impl Default for DiagnosticContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            last_cycle_us: AtomicU64::new(0),
            max_cycle_us: AtomicU64::new(0),
            emergencies: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            actuations: AtomicU64::new(0),
            actuation_errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_cycle(&self, took: Duration) {
        let us = took.as_micros().min(u64::MAX as u128) as u64;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_us.store(us, Ordering::Relaxed);
        self.max_cycle_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_emergency(&self) {
        self.emergencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actuation(&self, ok: bool) {
        if ok {
            self.actuations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actuation_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            last_cycle_us: self.last_cycle_us.load(Ordering::Relaxed),
            max_cycle_us: self.max_cycle_us.load(Ordering::Relaxed),
            emergencies: self.emergencies.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            actuations: self.actuations.load(Ordering::Relaxed),
            actuation_errors: self.actuation_errors.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_statistics() {
        let diag = DiagnosticContext::new();
        diag.record_cycle(Duration::from_micros(300));
        diag.record_cycle(Duration::from_micros(100));
        diag.record_actuation(true);
        diag.record_actuation(false);
        let snap = diag.snapshot();
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.last_cycle_us, 100);
        assert_eq!(snap.max_cycle_us, 300);
        assert_eq!((snap.actuations, snap.actuation_errors), (1, 1));
    }
}
