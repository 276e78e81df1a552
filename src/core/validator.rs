//! Temporal plausibility checks over recent accepted results

use std::collections::VecDeque;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::vision::{RecognitionMethod, RecognitionResult, RouletteNumber};

/// Why a recognized result was not accepted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("no number recognized")]
    MissingNumber,
    #[error("OCR confidence {confidence:.2} below {required:.2}")]
    OcrBelowThreshold { confidence: f32, required: f32 },
    #[error("confidence {confidence:.2} below floor {floor:.2}")]
    BelowFloor { confidence: f32, floor: f32 },
    #[error("repeat of {number} needs {required:.2}, got {confidence:.2}")]
    WeakRepeat {
        number: RouletteNumber,
        confidence: f32,
        required: f32,
    },
    #[error("isolated {number} needs {required:.2}, got {confidence:.2}")]
    WeakIsolated {
        number: RouletteNumber,
        confidence: f32,
        required: f32,
    },
}

/// Accepted result kept in the history window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub number: RouletteNumber,
    pub confidence: f32,
    pub method: RecognitionMethod,
}

/// Rejects detections that do not fit the recent history
#[derive(Debug, Clone)]
pub struct TemporalValidator {
    history: VecDeque<HistoryEntry>,
    capacity: usize,
    ocr_threshold: f32,
    min_confidence: f32,
    repeat_confidence: f32,
    isolated_confidence: f32,
}

impl TemporalValidator {
    pub fn new(config: &EngineConfig) -> Self {
        let capacity = config.validation.history_size.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            ocr_threshold: config.ocr.confidence_threshold,
            min_confidence: config.validation.min_confidence,
            repeat_confidence: config.validation.repeat_confidence,
            isolated_confidence: config.validation.isolated_confidence,
        }
    }

    /// Check `result` and record it on acceptance
    pub fn validate(&mut self, result: &RecognitionResult) -> Result<RouletteNumber, RejectReason> {
        let number = self.check(result)?;

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            number,
            confidence: result.confidence,
            method: result.method,
        });
        Ok(number)
    }

    fn check(&self, result: &RecognitionResult) -> Result<RouletteNumber, RejectReason> {
        let number = result.number.ok_or(RejectReason::MissingNumber)?;
        let confidence = result.confidence;

        if result.method == RecognitionMethod::Ocr && confidence < self.ocr_threshold {
            return Err(RejectReason::OcrBelowThreshold {
                confidence,
                required: self.ocr_threshold,
            });
        }

        if confidence < self.min_confidence {
            return Err(RejectReason::BelowFloor {
                confidence,
                floor: self.min_confidence,
            });
        }

        let Some(previous) = self.history.back() else {
            return Ok(number);
        };

        if previous.number == number {
            if confidence < self.repeat_confidence {
                return Err(RejectReason::WeakRepeat {
                    number,
                    confidence,
                    required: self.repeat_confidence,
                });
            }
            return Ok(number);
        }

        let seen_before = self.history.iter().any(|entry| entry.number == number);
        if result.method == RecognitionMethod::Template
            && !seen_before
            && confidence < self.isolated_confidence
        {
            return Err(RejectReason::WeakIsolated {
                number,
                confidence,
                required: self.isolated_confidence,
            });
        }

        Ok(number)
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
