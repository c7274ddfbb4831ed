//! Bounded rolling history of analysis results
//!
//! The only shared mutable state of the orchestrator. One short lock guards
//! the ring; it is taken for an append or a snapshot and never held across
//! an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rro_core::{HistoryConfig, RecoveryAnalysisResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ring of recent analyses, bounded by count and age
#[derive(Debug)]
pub struct RecoveryHistory {
    inner: Mutex<VecDeque<RecoveryAnalysisResult>>,
    capacity: usize,
    window: chrono::Duration,
    appended: AtomicU64,
}

impl RecoveryHistory {
    /// Create history with the given bounds
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        let window = i64::try_from(config.window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        let capacity = config.capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(4_096))),
            capacity,
            window,
            appended: AtomicU64::new(0),
        }
    }

    /// Append one result, evicting the oldest and anything past the window.
    /// Returns the sequence number of the append.
    pub fn append(&self, result: RecoveryAnalysisResult) -> u64 {
        let cutoff = Self::cutoff(self.window, Utc::now());
        let mut guard = self.inner.lock();
        while guard.front().is_some_and(|r| r.timestamp < cutoff) {
            guard.pop_front();
        }
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(result);
        self.appended.fetch_add(1, Ordering::Relaxed)
    }

    /// Results still inside the window, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<RecoveryAnalysisResult> {
        let cutoff = Self::cutoff(self.window, Utc::now());
        self.inner
            .lock()
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Retained results, including any that have aged out but not been evicted
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Appends since creation, evicted or not
    #[inline]
    #[must_use]
    pub fn total_appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Maximum retained results
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Window length in seconds
    #[inline]
    #[must_use]
    pub fn window_secs(&self) -> i64 {
        self.window.num_seconds()
    }

    fn cutoff(window: chrono::Duration, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for RecoveryHistory {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}
