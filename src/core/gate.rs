//! Optional game phase gating
//!
//! Results are only released while the table shows a result. Raw phase
//! readings flicker, so the gate keeps the last few samples and acts on the
//! majority.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use image::{imageops, GrayImage, RgbImage};

use crate::config::{GameStateConfig, PhaseMethod};
use crate::error::{EngineError, Result};
use crate::vision::template::{correlation_score, preprocess};
use crate::vision::RegionExtractor;

/// Samples in the smoothing window
const SMOOTHING_WINDOW: usize = 3;

/// Phase template file extensions
const PHASE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamePhase {
    Betting,
    Spinning,
    ResultShown,
    Unknown,
}

impl GamePhase {
    /// Phases that can be recognized from a template
    pub const DETECTABLE: [GamePhase; 3] = [GamePhase::Betting, GamePhase::Spinning, GamePhase::ResultShown];

    /// Template file stem for this phase
    pub fn file_stem(self) -> &'static str {
        match self {
            GamePhase::Betting => "betting",
            GamePhase::Spinning => "spinning",
            GamePhase::ResultShown => "result_shown",
            GamePhase::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Produces a raw phase reading for one frame
pub trait PhaseClassifier: Send {
    /// `number_found` tells whether the arbiter recognized a number on this frame
    fn classify(&self, frame: &RgbImage, number_found: bool) -> GamePhase;
}

/// Treats "a number is visible" as "the result is shown"
#[derive(Debug, Clone, Copy, Default)]
pub struct InferredPhaseClassifier;

impl PhaseClassifier for InferredPhaseClassifier {
    fn classify(&self, _frame: &RgbImage, number_found: bool) -> GamePhase {
        if number_found {
            GamePhase::ResultShown
        } else {
            GamePhase::Unknown
        }
    }
}

/// Matches per-phase templates against a dedicated region
pub struct TemplatePhaseClassifier {
    region: RegionExtractor,
    templates: Vec<(GamePhase, GrayImage)>,
    threshold: f32,
    blur_sigma: f32,
}

impl TemplatePhaseClassifier {
    pub fn new(region: RegionExtractor, threshold: f32, blur_sigma: f32) -> Self {
        Self {
            region,
            templates: Vec::new(),
            threshold,
            blur_sigma,
        }
    }

    /// Add a phase template from a raw grayscale image
    pub fn with_template(mut self, phase: GamePhase, raw: &GrayImage) -> Self {
        self.templates.push((phase, preprocess(raw, self.blur_sigma)));
        self
    }

    /// Load `betting`, `spinning` and `result_shown` images from `dir`.
    /// Missing phases are skipped with a warning.
    pub fn load(dir: &Path, region: RegionExtractor, threshold: f32, blur_sigma: f32) -> Result<Self> {
        if !dir.is_dir() {
            return Err(EngineError::TemplateDirectory {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let mut classifier = Self::new(region, threshold, blur_sigma);
        for phase in GamePhase::DETECTABLE {
            let found = PHASE_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{}.{}", phase.file_stem(), ext)))
                .find(|path| path.is_file());

            let Some(path) = found else {
                log::warn!("No {} phase template in {:?}", phase, dir);
                continue;
            };

            match image::open(&path) {
                Ok(img) => classifier = classifier.with_template(phase, &img.to_luma8()),
                Err(e) => log::warn!("Skipping phase template {:?}: {}", path, e),
            }
        }

        if classifier.templates.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "no usable phase templates in {:?}",
                dir
            )));
        }
        Ok(classifier)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl PhaseClassifier for TemplatePhaseClassifier {
    fn classify(&self, frame: &RgbImage, _number_found: bool) -> GamePhase {
        let Some(roi) = self.region.extract(frame) else {
            return GamePhase::Unknown;
        };
        let roi = preprocess(&imageops::grayscale(&roi), self.blur_sigma);

        self.templates
            .iter()
            .map(|(phase, template)| (*phase, correlation_score(&roi, template)))
            .filter(|(_, score)| *score >= self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(phase, _)| phase)
            .unwrap_or(GamePhase::Unknown)
    }
}

/// Majority-vote gate over the last few phase readings
pub struct GameStateGate {
    classifier: Box<dyn PhaseClassifier>,
    samples: VecDeque<GamePhase>,
}

impl GameStateGate {
    pub fn new(classifier: Box<dyn PhaseClassifier>) -> Self {
        Self {
            classifier,
            samples: VecDeque::with_capacity(SMOOTHING_WINDOW),
        }
    }

    /// Gate for a configuration; `None` when gating is disabled
    pub fn from_config(config: &GameStateConfig, blur_sigma: f32) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let classifier: Box<dyn PhaseClassifier> = match config.method {
            PhaseMethod::Inferred => Box::new(InferredPhaseClassifier),
            PhaseMethod::Template => {
                let dir = config.templates.as_deref().ok_or_else(|| {
                    EngineError::InvalidConfig("game_state.templates is required for the template method".into())
                })?;
                let classifier = TemplatePhaseClassifier::load(
                    dir,
                    RegionExtractor::new(config.region),
                    config.threshold,
                    blur_sigma,
                )?;
                log::info!("Game state gate loaded {} phase templates", classifier.len());
                Box::new(classifier)
            }
        };
        Ok(Some(Self::new(classifier)))
    }

    /// Classify a frame and return the smoothed phase
    pub fn observe(&mut self, frame: &RgbImage, number_found: bool) -> GamePhase {
        let raw = self.classifier.classify(frame, number_found);
        self.push(raw)
    }

    /// Record a raw reading and return the smoothed phase
    pub fn push(&mut self, phase: GamePhase) -> GamePhase {
        if self.samples.len() == SMOOTHING_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(phase);
        self.phase()
    }

    /// Majority over the window; ties go to the most recent sample
    pub fn phase(&self) -> GamePhase {
        let mut best = GamePhase::Unknown;
        let mut best_count = 0;

        for candidate in self.samples.iter().rev() {
            let count = self.samples.iter().filter(|p| *p == candidate).count();
            if count > best_count {
                best = *candidate;
                best_count = count;
            }
        }
        best
    }

    /// Whether results may be released
    pub fn is_open(&self) -> bool {
        self.phase() == GamePhase::ResultShown
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Region;
    use image::Luma;

    fn gate() -> GameStateGate {
        GameStateGate::new(Box::new(InferredPhaseClassifier))
    }

    #[test]
    fn test_majority_vote() {
        let mut g = gate();
        assert_eq!(g.push(GamePhase::Spinning), GamePhase::Spinning);
        assert_eq!(g.push(GamePhase::ResultShown), GamePhase::ResultShown);
        assert_eq!(g.push(GamePhase::Spinning), GamePhase::Spinning);
        // window: ResultShown, Spinning, ResultShown
        assert_eq!(g.push(GamePhase::ResultShown), GamePhase::ResultShown);
        // window: Spinning, ResultShown, ResultShown
        assert_eq!(g.push(GamePhase::ResultShown), GamePhase::ResultShown);
        // window: ResultShown, ResultShown, Betting
        assert_eq!(g.push(GamePhase::Betting), GamePhase::ResultShown);
        assert!(g.is_open());
    }

    #[test]
    fn test_single_flicker_ignored() {
        let mut g = gate();
        for _ in 0..3 {
            g.push(GamePhase::Spinning);
        }
        g.push(GamePhase::ResultShown);
        assert!(!g.is_open());
    }

    #[test]
    fn test_three_way_tie_goes_to_latest() {
        let mut g = gate();
        g.push(GamePhase::Betting);
        g.push(GamePhase::Spinning);
        assert_eq!(g.push(GamePhase::ResultShown), GamePhase::ResultShown);
    }

    #[test]
    fn test_inferred_classifier() {
        let mut g = gate();
        let frame = RgbImage::new(4, 4);
        g.observe(&frame, true);
        assert!(g.is_open());
        g.observe(&frame, false);
        g.observe(&frame, false);
        assert!(!g.is_open());
        g.reset();
        assert_eq!(g.phase(), GamePhase::Unknown);
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(GameStateGate::from_config(&GameStateConfig::default(), 0.8)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_template_classifier() {
        let stripes = GrayImage::from_fn(16, 16, |x, _| Luma([if (x / 4) % 2 == 0 { 20 } else { 230 }]));
        let blocks = GrayImage::from_fn(16, 16, |_, y| Luma([if y < 8 { 20 } else { 230 }]));

        let classifier = TemplatePhaseClassifier::new(RegionExtractor::new(Some(Region::new(0, 0, 16, 16))), 0.8, 0.0)
            .with_template(GamePhase::Spinning, &stripes)
            .with_template(GamePhase::ResultShown, &blocks);

        let mut frame = RgbImage::new(32, 32);
        for (x, y, pixel) in blocks.enumerate_pixels() {
            let v = pixel.0[0];
            frame.put_pixel(x, y, image::Rgb([v, v, v]));
        }
        assert_eq!(classifier.classify(&frame, false), GamePhase::ResultShown);

        let outside = TemplatePhaseClassifier::new(RegionExtractor::new(Some(Region::new(100, 100, 16, 16))), 0.8, 0.0)
            .with_template(GamePhase::ResultShown, &blocks);
        assert_eq!(outside.classify(&frame, false), GamePhase::Unknown);
    }

    #[test]
    fn test_template_method_requires_directory() {
        let config = GameStateConfig {
            enabled: true,
            method: PhaseMethod::Template,
            ..Default::default()
        };
        assert!(matches!(
            GameStateGate::from_config(&config, 0.8),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
