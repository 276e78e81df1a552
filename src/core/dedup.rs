//! "New spin" versus "result still on screen"
//!
//! A winning number stays displayed for many frames, and the same number can
//! legitimately win two spins in a row. The state machine separates the two
//! with a time gap and, when frame indices are known, a frame gap.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::vision::ResultSignature;

/// Why a result counts as a new spin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewReason {
    /// Nothing tracked yet
    FirstDetection,
    /// Frame index went backwards; tracking was reset
    StreamRestart,
    /// Same signature as before, but outside both gap windows
    Repeat,
    /// Different signature from the one on screen
    Changed,
}

/// Why a result was suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Already emitted within the time gap
    AlreadyProcessed { elapsed: Duration },
    /// Still the displayed result, not yet emitted
    StillDisplayed {
        elapsed: Duration,
        frames: Option<u64>,
    },
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::AlreadyProcessed { elapsed } => {
                write!(f, "already processed {:.2}s ago", elapsed.as_secs_f64())
            }
            DuplicateReason::StillDisplayed { elapsed, frames } => match frames {
                Some(frames) => write!(
                    f,
                    "still displayed ({:.2}s, {} frames)",
                    elapsed.as_secs_f64(),
                    frames
                ),
                None => write!(f, "still displayed ({:.2}s)", elapsed.as_secs_f64()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    NewResult { reason: NewReason },
    Duplicate { reason: DuplicateReason },
}

impl DedupDecision {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupDecision::Duplicate { .. })
    }
}

/// Tracking record; cleared on (re)start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupState {
    pub last_signature: Option<ResultSignature>,
    pub last_result_at: Option<Instant>,
    pub last_result_frame: Option<u64>,
    pub last_processed_signature: Option<ResultSignature>,
    pub last_processed_at: Option<Instant>,
    pub last_processed_frame: Option<u64>,
    pub first_detection_seen: bool,
}

#[derive(Debug, Clone)]
pub struct DeduplicationStateMachine {
    state: DedupState,
    min_gap: Duration,
    min_gap_frames: u64,
}

impl DeduplicationStateMachine {
    pub fn new(min_gap: Duration, min_gap_frames: u64) -> Self {
        Self {
            state: DedupState::default(),
            min_gap,
            min_gap_frames,
        }
    }

    /// Gaps too large for a `Duration` saturate; `EngineConfig::validate`
    /// rejects them before the engine starts
    pub fn from_config(config: &EngineConfig) -> Self {
        let min_gap = Duration::try_from_secs_f64(config.dedup.min_result_gap_seconds).unwrap_or(Duration::MAX);
        Self::new(min_gap, config.min_result_gap_frames())
    }

    pub fn state(&self) -> &DedupState {
        &self.state
    }

    /// Classify `signature` seen at `now` (and `frame`, if known), updating tracking
    pub fn check(&mut self, signature: ResultSignature, now: Instant, frame: Option<u64>) -> DedupDecision {
        if let Some(frame) = frame {
            let last_frame = self.state.last_result_frame.max(self.state.last_processed_frame);
            if last_frame.is_some_and(|last| frame < last) {
                log::debug!(
                    "Frame index regressed {:?} -> {}; resetting dedup tracking",
                    last_frame,
                    frame
                );
                self.reset();
                self.track(signature, now, Some(frame));
                return DedupDecision::NewResult {
                    reason: NewReason::StreamRestart,
                };
            }
        }

        if self.state.last_signature.is_none() {
            self.track(signature, now, frame);
            return DedupDecision::NewResult {
                reason: NewReason::FirstDetection,
            };
        }

        if self.state.last_processed_signature == Some(signature) {
            let elapsed = elapsed_since(self.state.last_processed_at, now);
            if elapsed < self.min_gap {
                return DedupDecision::Duplicate {
                    reason: DuplicateReason::AlreadyProcessed { elapsed },
                };
            }
            self.state.last_processed_signature = None;
        }

        if self.state.last_signature == Some(signature) && self.state.first_detection_seen {
            let elapsed = elapsed_since(self.state.last_result_at, now);
            let frames = match (frame, self.state.last_result_frame) {
                (Some(current), Some(last)) => Some(current.saturating_sub(last)),
                _ => None,
            };

            if elapsed < self.min_gap || frames.is_some_and(|delta| delta <= self.min_gap_frames) {
                return DedupDecision::Duplicate {
                    reason: DuplicateReason::StillDisplayed { elapsed, frames },
                };
            }

            self.track(signature, now, frame);
            return DedupDecision::NewResult {
                reason: NewReason::Repeat,
            };
        }

        self.track(signature, now, frame);
        DedupDecision::NewResult {
            reason: NewReason::Changed,
        }
    }

    /// Decision `check` would make, without touching the tracking state
    pub fn peek(&self, signature: ResultSignature, now: Instant, frame: Option<u64>) -> DedupDecision {
        self.clone().check(signature, now, frame)
    }

    /// Record that `signature` went through downstream processing
    pub fn mark_processed(&mut self, signature: ResultSignature, now: Instant, frame: Option<u64>) {
        self.state.last_processed_signature = Some(signature);
        self.state.last_processed_at = Some(now);
        self.state.last_processed_frame = frame;
    }

    pub fn reset(&mut self) {
        self.state = DedupState::default();
    }

    fn track(&mut self, signature: ResultSignature, now: Instant, frame: Option<u64>) {
        self.state.last_signature = Some(signature);
        self.state.last_result_at = Some(match self.state.last_result_at {
            Some(previous) => previous.max(now),
            None => now,
        });
        self.state.last_result_frame = frame;
        self.state.first_detection_seen = true;
    }
}

fn elapsed_since(earlier: Option<Instant>, now: Instant) -> Duration {
    earlier.map_or(Duration::MAX, |at| now.saturating_duration_since(at))
}
