//! Frame outcome counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::pipeline::FrameOutcome;

/// Lock-free counters shared between the engine thread and callers
#[derive(Debug, Default)]
pub struct EngineStats {
    frames_acquired: AtomicU64,
    frames_skipped: AtomicU64,
    no_detections: AtomicU64,
    ambiguous: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    gated: AtomicU64,
    emitted: AtomicU64,
    acquisition_failures: AtomicU64,
    failure_streak: AtomicU64,
    longest_failure_streak: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_acquired: u64,
    pub frames_skipped: u64,
    pub no_detections: u64,
    pub ambiguous: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub gated: u64,
    pub emitted: u64,
    pub acquisition_failures: u64,
    /// Consecutive frames that produced nothing usable
    pub failure_streak: u64,
    pub longest_failure_streak: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one acquired frame and its outcome
    pub fn record(&self, outcome: &FrameOutcome) {
        self.frames_acquired.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            FrameOutcome::Skipped => &self.frames_skipped,
            FrameOutcome::NoDetection => &self.no_detections,
            FrameOutcome::Ambiguous { .. } => &self.ambiguous,
            FrameOutcome::Rejected(_) => &self.rejected,
            FrameOutcome::Duplicate(_) => &self.duplicates,
            FrameOutcome::Gated(_) => &self.gated,
            FrameOutcome::Emitted(_) => &self.emitted,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if outcome.is_failure() {
            self.extend_streak();
        } else if !matches!(outcome, FrameOutcome::Skipped) {
            self.failure_streak.store(0, Ordering::Relaxed);
        }
    }

    /// Count a frame that could not be acquired
    pub fn record_acquisition_failure(&self) {
        self.acquisition_failures.fetch_add(1, Ordering::Relaxed);
        self.extend_streak();
    }

    fn extend_streak(&self) {
        let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
        self.longest_failure_streak.fetch_max(streak, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_acquired: load(&self.frames_acquired),
            frames_skipped: load(&self.frames_skipped),
            no_detections: load(&self.no_detections),
            ambiguous: load(&self.ambiguous),
            rejected: load(&self.rejected),
            duplicates: load(&self.duplicates),
            gated: load(&self.gated),
            emitted: load(&self.emitted),
            acquisition_failures: load(&self.acquisition_failures),
            failure_streak: load(&self.failure_streak),
            longest_failure_streak: load(&self.longest_failure_streak),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.frames_acquired,
            &self.frames_skipped,
            &self.no_detections,
            &self.ambiguous,
            &self.rejected,
            &self.duplicates,
            &self.gated,
            &self.emitted,
            &self.acquisition_failures,
            &self.failure_streak,
            &self.longest_failure_streak,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::RejectReason;

    #[test]
    fn test_counts_and_streaks() {
        let stats = EngineStats::new();
        stats.record(&FrameOutcome::NoDetection);
        stats.record(&FrameOutcome::NoDetection);
        stats.record(&FrameOutcome::Skipped);
        stats.record(&FrameOutcome::Rejected(RejectReason::MissingNumber));
        stats.record_acquisition_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_acquired, 4);
        assert_eq!(snap.no_detections, 2);
        assert_eq!(snap.frames_skipped, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.acquisition_failures, 1);
        assert_eq!(snap.failure_streak, 4);
        assert_eq!(snap.longest_failure_streak, 4);

        stats.record(&FrameOutcome::Gated(crate::vision::ResultSignature {
            number: crate::vision::RouletteNumber::new(1).unwrap(),
            color: crate::vision::RouletteColor::Red,
        }));
        stats.record(&FrameOutcome::NoDetection);
        let snap = stats.snapshot();
        assert_eq!(snap.failure_streak, 1);
        assert_eq!(snap.longest_failure_streak, 4);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
