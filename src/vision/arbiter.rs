//! Strategy arbitration
//!
//! Strategies always run template → OCR → color. Adding them in a different
//! order does not change that.

use super::color::ColorClassifier;
use super::detector::{CandidateRecognizer, Recognition, RecognitionMethod};
use super::ocr::TextRecognizer;
use super::template::{TemplateMatcher, TemplateSet};
use crate::config::EngineConfig;
use image::RgbImage;
use std::sync::Arc;

fn priority(method: RecognitionMethod) -> u8 {
    match method {
        RecognitionMethod::Template => 0,
        RecognitionMethod::Ocr => 1,
        RecognitionMethod::Color => 2,
    }
}

/// Runs recognizers in priority order and returns the first acceptance
#[derive(Default)]
pub struct RecognitionArbiter {
    strategies: Vec<Box<dyn CandidateRecognizer>>,
}

impl RecognitionArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard strategy stack for a configuration
    pub fn from_config(config: &EngineConfig, templates: Arc<TemplateSet>) -> Self {
        let mut arbiter = Self::new().with_strategy(Box::new(TemplateMatcher::from_config(
            templates,
            &config.templates,
        )));
        if config.ocr.enabled {
            arbiter = arbiter.with_strategy(Box::new(TextRecognizer::from_config(&config.ocr)));
        }
        if config.color.enabled {
            arbiter = arbiter.with_strategy(Box::new(ColorClassifier::new(&config.color)));
        }
        arbiter
    }

    /// Add a strategy; it is slotted in by priority
    pub fn with_strategy(mut self, strategy: Box<dyn CandidateRecognizer>) -> Self {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| priority(s.method()));
        self
    }

    /// Methods in the order they will run
    pub fn methods(&self) -> Vec<RecognitionMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// First accepted result; otherwise the first ambiguity, otherwise no match
    pub fn recognize(&self, roi: &RgbImage) -> Recognition {
        let mut ambiguous = None;

        for strategy in &self.strategies {
            match strategy.recognize(roi) {
                Recognition::Accepted(result) => return Recognition::Accepted(result),
                Recognition::Ambiguous { best, runner_up } => {
                    ambiguous.get_or_insert(Recognition::Ambiguous { best, runner_up });
                }
                Recognition::NoMatch => {}
            }
        }

        ambiguous.unwrap_or(Recognition::NoMatch)
    }
}
