//! Consecutive-failure counter
//!
//! Tracks failures per named cause. A cause is faulted after `threshold`
//! consecutive failures and recovers on the first success. Logging is
//! throttled: the first few failures and then every Nth one.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::constants::retry;

#[derive(Debug, Clone)]
pub struct ErrorCounter {
    owner: String,
    threshold: u32,
    capacity: usize,
    counters: HashMap<String, u32>,
}

impl ErrorCounter {
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_limits(owner, retry::FAULT_THRESHOLD, retry::MAX_CAUSES)
    }

    pub fn with_limits(owner: impl Into<String>, threshold: u32, capacity: usize) -> Self {
        Self {
            owner: owner.into(),
            threshold: threshold.max(1),
            capacity: capacity.max(1),
            counters: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one failure of `cause`; returns the new consecutive count
    /// (0 if the cause could not be tracked)
    pub fn record_failure(&mut self, cause: &str, context: &str) -> u32 {
        if !self.counters.contains_key(cause) && !self.make_room(cause) {
            return 0;
        }

        let count = self.counters.entry(cause.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;

        if count <= retry::LOG_FIRST_N || count % retry::LOG_EVERY_N == 0 {
            warn!(
                owner = %self.owner,
                cause = %cause,
                count = count,
                "{}",
                context
            );
        }
        if count == self.threshold {
            warn!(owner = %self.owner, cause = %cause, "fault raised after {} consecutive failures", count);
        }
        count
    }

    /// Record a success of `cause`, resetting its counter
    pub fn record_success(&mut self, cause: &str) {
        if let Some(count) = self.counters.get_mut(cause) {
            if *count > 0 {
                info!(owner = %self.owner, cause = %cause, "recovered after {} failures", count);
                *count = 0;
            }
        }
    }

    pub fn count(&self, cause: &str) -> u32 {
        self.counters.get(cause).copied().unwrap_or(0)
    }

    pub fn is_faulted(&self, cause: &str) -> bool {
        self.count(cause) >= self.threshold
    }

    /// True if any tracked cause is faulted
    pub fn has_faults(&self) -> bool {
        self.counters.values().any(|c| *c >= self.threshold)
    }

    /// All currently faulted causes, sorted
    pub fn faulted_causes(&self) -> Vec<String> {
        let mut causes: Vec<String> = self
            .counters
            .iter()
            .filter(|(_, c)| **c >= self.threshold)
            .map(|(cause, _)| cause.clone())
            .collect();
        causes.sort();
        causes
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }

    pub fn reset(&mut self) {
        self.counters.clear();
    }

    /// Evict one resolved cause when full; refuse the new cause otherwise
    fn make_room(&mut self, cause: &str) -> bool {
        if self.counters.len() < self.capacity {
            return true;
        }
        let resolved = self
            .counters
            .iter()
            .find(|(_, c)| **c == 0)
            .map(|(k, _)| k.clone());
        match resolved {
            Some(key) => {
                self.counters.remove(&key);
                true
            }
            None => {
                warn!(
                    owner = %self.owner,
                    cause = %cause,
                    capacity = self.capacity,
                    "error counter full, cause not tracked"
                );
                false
            }
        }
    }
}
