//! Per-frame detection pipeline
//!
//! Synchronous composition of region extraction, recognition, validation,
//! deduplication and the optional phase gate. The engine thread drives it;
//! tests drive it directly with synthetic timestamps.

use std::sync::Arc;
use std::time::Instant;

use super::dedup::{DedupDecision, DeduplicationStateMachine, DuplicateReason};
use super::events::ResultEvent;
use super::gate::GameStateGate;
use super::validator::{RejectReason, TemporalValidator};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::vision::{
    Candidate, Frame, Recognition, RecognitionArbiter, RegionExtractor, ResultSignature, TemplateSet,
};

/// What happened to one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Not analysed because of the frame stride
    Skipped,
    NoDetection,
    /// Near-tie below the acceptance bar
    Ambiguous { best: Candidate, runner_up: Candidate },
    Rejected(RejectReason),
    Duplicate(DuplicateReason),
    /// New result held back by the phase gate
    Gated(ResultSignature),
    Emitted(ResultEvent),
}

impl FrameOutcome {
    /// Frames that yielded nothing usable
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FrameOutcome::NoDetection | FrameOutcome::Ambiguous { .. } | FrameOutcome::Rejected(_)
        )
    }

    pub fn event(&self) -> Option<&ResultEvent> {
        match self {
            FrameOutcome::Emitted(event) => Some(event),
            _ => None,
        }
    }
}

pub struct DetectionPipeline {
    region: RegionExtractor,
    arbiter: RecognitionArbiter,
    validator: TemporalValidator,
    dedup: DeduplicationStateMachine,
    gate: Option<GameStateGate>,
    frame_stride: u64,
    acquired: u64,
    spin_sequence: u64,
}

impl DetectionPipeline {
    /// Pipeline around a custom arbiter; the gate is left off
    pub fn new(config: &EngineConfig, arbiter: RecognitionArbiter) -> Self {
        Self {
            region: RegionExtractor::new(config.region_of_interest),
            arbiter,
            validator: TemporalValidator::new(config),
            dedup: DeduplicationStateMachine::from_config(config),
            gate: None,
            frame_stride: config.frame_stride() as u64,
            acquired: 0,
            spin_sequence: 0,
        }
    }

    /// Standard pipeline: templates from disk, arbiter and gate from config
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let templates = Arc::new(load_templates(config)?);
        let arbiter = RecognitionArbiter::from_config(config, templates);
        let gate = GameStateGate::from_config(&config.game_state, config.templates.blur_sigma)?;

        let mut pipeline = Self::new(config, arbiter);
        pipeline.gate = gate;
        Ok(pipeline)
    }

    pub fn with_gate(mut self, gate: GameStateGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Events emitted since the last reset
    pub fn spin_sequence(&self) -> u64 {
        self.spin_sequence
    }

    pub fn validator(&self) -> &TemporalValidator {
        &self.validator
    }

    pub fn dedup(&self) -> &DeduplicationStateMachine {
        &self.dedup
    }

    /// Run one frame through every stage
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> FrameOutcome {
        self.acquired += 1;
        let position = frame.index.unwrap_or(self.acquired - 1);
        if position % self.frame_stride != 0 {
            return FrameOutcome::Skipped;
        }

        let Some(roi) = self.region.extract(&frame.image) else {
            log::trace!("Region outside {}x{} frame", frame.width(), frame.height());
            return FrameOutcome::NoDetection;
        };

        let recognition = self.arbiter.recognize(&roi);

        if let Some(gate) = self.gate.as_mut() {
            let number_found = matches!(&recognition, Recognition::Accepted(r) if r.number.is_some());
            gate.observe(&frame.image, number_found);
        }

        let result = match recognition {
            Recognition::Accepted(result) => result,
            Recognition::Ambiguous { best, runner_up } => {
                log::debug!(
                    "Frame {:?}: ambiguous {} ({:.3}) vs {} ({:.3})",
                    frame.index,
                    best.number,
                    best.score,
                    runner_up.number,
                    runner_up.score
                );
                return FrameOutcome::Ambiguous { best, runner_up };
            }
            Recognition::NoMatch => {
                log::trace!("Frame {:?}: no detection", frame.index);
                return FrameOutcome::NoDetection;
            }
        };

        if let Err(reason) = self.validator.validate(&result) {
            log::debug!("Frame {:?}: rejected, {}", frame.index, reason);
            return FrameOutcome::Rejected(reason);
        }

        let Some(signature) = result.signature() else {
            return FrameOutcome::Rejected(RejectReason::MissingNumber);
        };

        let gate_open = self.gate.as_ref().map_or(true, GameStateGate::is_open);
        let decision = if gate_open {
            self.dedup.check(signature, now, frame.index)
        } else {
            self.dedup.peek(signature, now, frame.index)
        };

        match decision {
            DedupDecision::Duplicate { reason } => {
                log::debug!("Frame {:?}: {} {}", frame.index, signature, reason);
                FrameOutcome::Duplicate(reason)
            }
            DedupDecision::NewResult { .. } if !gate_open => {
                log::debug!("Frame {:?}: {} held back by game state gate", frame.index, signature);
                FrameOutcome::Gated(signature)
            }
            DedupDecision::NewResult { reason } => {
                self.spin_sequence += 1;
                let event = ResultEvent {
                    number: signature.number,
                    color: signature.color,
                    confidence: result.confidence,
                    method: result.method,
                    spin_sequence: self.spin_sequence,
                    frame_index: frame.index,
                    detected_at: now,
                };
                self.dedup.mark_processed(signature, now, frame.index);
                log::info!(
                    "Spin #{}: {} ({:.2} via {}, {:?})",
                    event.spin_sequence,
                    signature,
                    event.confidence,
                    event.method,
                    reason
                );
                FrameOutcome::Emitted(event)
            }
        }
    }

    /// Forget history, dedup tracking, gate samples and the spin count
    pub fn reset(&mut self) {
        self.validator.reset();
        self.dedup.reset();
        if let Some(gate) = self.gate.as_mut() {
            gate.reset();
        }
        self.acquired = 0;
        self.spin_sequence = 0;
    }
}

/// Load the configured template set. A missing directory is fatal only when
/// templates are required.
fn load_templates(config: &EngineConfig) -> Result<TemplateSet> {
    let Some(dir) = config.templates.directory.as_deref() else {
        log::warn!("No template directory configured; running OCR/color only");
        return Ok(TemplateSet::default());
    };

    match TemplateSet::load_from_dir(dir, config.templates.blur_sigma) {
        Ok(set) => Ok(set),
        Err(e @ EngineError::TemplateDirectory { .. }) if !config.templates.required => {
            log::warn!("{}; running OCR/color only", e);
            Ok(TemplateSet::default())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate::InferredPhaseClassifier;
    use crate::vision::{
        CandidateRecognizer, RecognitionMethod, RecognitionResult, RouletteColor, RouletteNumber,
    };
    use image::RgbImage;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Recognizer that replays a shared script, one answer per call
    struct Scripted {
        answers: Arc<Mutex<Vec<Recognition>>>,
    }

    impl CandidateRecognizer for Scripted {
        fn method(&self) -> RecognitionMethod {
            RecognitionMethod::Template
        }

        fn recognize(&self, _roi: &RgbImage) -> Recognition {
            let mut answers = self.answers.lock();
            if answers.is_empty() {
                Recognition::NoMatch
            } else {
                answers.remove(0)
            }
        }
    }

    fn accept(value: u8, confidence: f32) -> Recognition {
        Recognition::Accepted(RecognitionResult::from_number(
            RouletteNumber::new(value).unwrap(),
            confidence,
            RecognitionMethod::Template,
        ))
    }

    fn pipeline(config: &EngineConfig, script: Vec<Recognition>) -> DetectionPipeline {
        let arbiter = RecognitionArbiter::new().with_strategy(Box::new(Scripted {
            answers: Arc::new(Mutex::new(script)),
        }));
        DetectionPipeline::new(config, arbiter)
    }

    fn frame(index: Option<u64>) -> Frame {
        Frame {
            image: RgbImage::new(8, 8),
            index,
        }
    }

    #[test]
    fn test_emit_then_duplicate() {
        let config = EngineConfig::live().with_ocr(false);
        let mut p = pipeline(&config, vec![accept(17, 0.95), accept(17, 0.95)]);
        let t0 = Instant::now();

        let first = p.process_frame(&frame(None), t0);
        let event = first.event().expect("event").clone();
        assert_eq!(event.number.value(), 17);
        assert_eq!(event.color, RouletteColor::Black);
        assert_eq!(event.spin_sequence, 1);

        let second = p.process_frame(&frame(None), t0 + Duration::from_millis(33));
        assert!(matches!(second, FrameOutcome::Duplicate(DuplicateReason::AlreadyProcessed { .. })));
        assert_eq!(p.spin_sequence(), 1);
    }

    #[test]
    fn test_ambiguous_and_rejected_outcomes() {
        let config = EngineConfig::live().with_ocr(false);
        let n = |v| RouletteNumber::new(v).unwrap();
        let ambiguous = Recognition::Ambiguous {
            best: Candidate::new(n(8), 0.80, RecognitionMethod::Template),
            runner_up: Candidate::new(n(3), 0.78, RecognitionMethod::Template),
        };
        let mut p = pipeline(&config, vec![ambiguous, accept(4, 0.3)]);
        let t0 = Instant::now();

        assert!(matches!(p.process_frame(&frame(None), t0), FrameOutcome::Ambiguous { .. }));
        assert!(matches!(
            p.process_frame(&frame(None), t0),
            FrameOutcome::Rejected(RejectReason::BelowFloor { .. })
        ));
        assert_eq!(p.process_frame(&frame(None), t0), FrameOutcome::NoDetection);
    }

    #[test]
    fn test_stride_with_indices() {
        let config = EngineConfig::recorded().with_ocr(false);
        let mut p = pipeline(&config, vec![]);
        let t0 = Instant::now();
        let outcomes: Vec<bool> = (1..=10)
            .map(|i| p.process_frame(&frame(Some(i)), t0) == FrameOutcome::Skipped)
            .collect();
        assert_eq!(
            outcomes,
            vec![true, true, true, true, false, true, true, true, true, false]
        );
    }

    #[test]
    fn test_stride_without_indices() {
        let config = EngineConfig::live().with_ocr(false).with_frame_stride(3);
        let mut p = pipeline(&config, vec![]);
        let t0 = Instant::now();
        let skipped: Vec<bool> = (0..6)
            .map(|_| p.process_frame(&frame(None), t0) == FrameOutcome::Skipped)
            .collect();
        assert_eq!(skipped, vec![false, true, true, false, true, true]);
    }

    #[test]
    fn test_gate_holds_result_until_open() {
        let config = EngineConfig::live().with_ocr(false);
        let mut p = pipeline(
            &config,
            vec![
                Recognition::NoMatch,
                Recognition::NoMatch,
                accept(21, 0.95),
                accept(21, 0.95),
            ],
        )
        .with_gate(GameStateGate::new(Box::new(InferredPhaseClassifier)));
        let t0 = Instant::now();

        assert_eq!(p.process_frame(&frame(None), t0), FrameOutcome::NoDetection);
        assert_eq!(p.process_frame(&frame(None), t0), FrameOutcome::NoDetection);
        // one positive sample out of three: gate still closed
        assert!(matches!(p.process_frame(&frame(None), t0), FrameOutcome::Gated(_)));
        // two out of three: open, and the held-back result is still new
        let outcome = p.process_frame(&frame(None), t0 + Duration::from_millis(50));
        assert_eq!(outcome.event().map(|e| e.number.value()), Some(21));
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let config = EngineConfig::live().with_ocr(false);
        let mut p = pipeline(&config, vec![accept(9, 0.95), accept(9, 0.95)]);
        let t0 = Instant::now();

        assert!(p.process_frame(&frame(None), t0).event().is_some());
        p.reset();
        assert_eq!(p.spin_sequence(), 0);
        assert!(p.validator().is_empty());

        let outcome = p.process_frame(&frame(None), t0 + Duration::from_millis(10));
        assert_eq!(outcome.event().map(|e| e.spin_sequence), Some(1));
    }

    #[test]
    fn test_missing_template_dir() {
        let mut config = EngineConfig::live()
            .with_ocr(false)
            .with_template_dir("/nonexistent/roulette-templates");
        assert!(matches!(
            DetectionPipeline::from_config(&config),
            Err(EngineError::TemplateDirectory { .. })
        ));

        config.templates.required = false;
        assert!(DetectionPipeline::from_config(&config).is_ok());
    }
}
