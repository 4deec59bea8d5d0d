//! Job progress shared between engine workers and an external poller.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub percent: u8,
    pub mode: String,
}

impl ProgressSnapshot {
    /// `"processed/total"`, empty before a job has started
    pub fn processed_label(&self) -> String {
        if self.total == 0 {
            String::new()
        } else {
            format!("{}/{}", self.processed, self.total)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 100
    }
}

/// Counters for one job. Every read and write goes through a single lock,
/// so a snapshot never mixes a new total with a stale processed count.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reset(&self, total: usize, mode: &str) {
        let mut state = self.lock();
        *state = ProgressSnapshot {
            processed: 0,
            total,
            percent: 0,
            mode: mode.to_string(),
        };
    }

    /// Mark `n` more units complete. Saturates at the job total.
    pub fn advance(&self, n: usize) {
        let mut state = self.lock();
        state.processed = (state.processed + n).min(state.total);
        state.percent = percent_of(state.processed, state.total);
    }

    /// Pin the job to 100% regardless of how many units degraded
    pub fn finish(&self) {
        let mut state = self.lock();
        state.processed = state.total;
        state.percent = 100;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }
}

fn percent_of(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((processed * 100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_percent_is_truncated() {
        let tracker = ProgressTracker::new();
        tracker.reset(3, "Google Free");
        tracker.advance(1);
        assert_eq!(tracker.snapshot().percent, 33);
        tracker.advance(1);
        assert_eq!(tracker.snapshot().percent, 66);
        assert_eq!(tracker.snapshot().processed_label(), "2/3");
    }

    #[test]
    fn test_advance_never_exceeds_total() {
        let tracker = ProgressTracker::new();
        tracker.reset(2, "AI");
        tracker.advance(5);
        let snap = tracker.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.percent, 100);
    }

    #[test]
    fn test_finish_pins_to_complete() {
        let tracker = ProgressTracker::new();
        tracker.reset(10, "AI");
        tracker.advance(4);
        tracker.finish();
        let snap = tracker.snapshot();
        assert!(snap.is_complete());
        assert_eq!(snap.processed, 10);
        assert_eq!(snap.mode, "AI");
    }

    #[test]
    fn test_concurrent_advance_is_monotonic() {
        let tracker = Arc::new(ProgressTracker::new());
        tracker.reset(400, "Google Free");

        let poller = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1_000 {
                    let snap = tracker.snapshot();
                    assert!(snap.processed >= last);
                    assert!(snap.processed <= snap.total);
                    assert_eq!(snap.percent as usize, snap.processed * 100 / snap.total);
                    last = snap.processed;
                }
            })
        };

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.advance(1);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        poller.join().unwrap();

        assert_eq!(tracker.snapshot().processed, 400);
    }

    #[test]
    fn test_empty_snapshot_label() {
        assert_eq!(ProgressSnapshot::default().processed_label(), "");
    }
}
