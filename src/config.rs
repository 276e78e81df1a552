//! Configuration types for the result engine
//!
//! These types define the structure of engine configurations loaded from TOML
//! files. Every field has a default, so a file only needs to name what it
//! changes.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with a `frame_width` x `frame_height` frame.
    /// Returns `(x, y, width, height)` or `None` if nothing is left.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some((self.x, self.y, width, height))
    }
}

/// Whether frames come from live capture or a recorded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Live,
    Recorded,
}

impl StreamMode {
    /// Frames skipped between analyses when no stride is configured
    pub fn default_frame_stride(self) -> u32 {
        match self {
            StreamMode::Live => 1,
            StreamMode::Recorded => 5,
        }
    }

    /// Frame gap that still counts as the same spin.
    /// Recorded streams have a known fixed spin duration, so the gap is smaller.
    pub fn default_gap_frames(self) -> u64 {
        match self {
            StreamMode::Live => 90,
            StreamMode::Recorded => 15,
        }
    }
}

/// Template matching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Directory holding one image per number (`17.png`, `17_black.png`, ...)
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Fail at startup when the directory cannot be read
    #[serde(default = "default_true")]
    pub required: bool,
    /// Minimum normalized correlation to accept a match
    #[serde(default = "default_template_threshold")]
    pub threshold: f32,
    /// Gaussian blur applied to both ROI and templates
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            directory: None,
            required: true,
            threshold: default_template_threshold(),
            blur_sigma: default_blur_sigma(),
        }
    }
}

/// OCR fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum reported confidence (inclusive)
    #[serde(default = "default_ocr_threshold")]
    pub confidence_threshold: f32,
    /// Command for the primary backend
    #[serde(default = "default_ocr_command")]
    pub primary_command: String,
    /// Command for the backend used when the primary is unavailable
    #[serde(default)]
    pub secondary_command: Option<String>,
    /// Scale factor for the raw upscaled variant
    #[serde(default = "default_ocr_upscale")]
    pub upscale: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_ocr_threshold(),
            primary_command: default_ocr_command(),
            secondary_command: None,
            upscale: default_ocr_upscale(),
        }
    }
}

/// Inclusive HSV bounds (OpenCV scale: H 0-179, S/V 0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

/// Color fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_red_ranges")]
    pub red: Vec<HsvRange>,
    #[serde(default = "default_black_ranges")]
    pub black: Vec<HsvRange>,
    #[serde(default = "default_green_ranges")]
    pub green: Vec<HsvRange>,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            red: default_red_ranges(),
            black: default_black_ranges(),
            green: default_green_ranges(),
        }
    }
}

/// Temporal validation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Accepted results kept for plausibility checks
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Global confidence floor
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Required when the previous entry has the same number
    #[serde(default = "default_repeat_confidence")]
    pub repeat_confidence: f32,
    /// Required for a template result seen nowhere else in history
    #[serde(default = "default_isolated_confidence")]
    pub isolated_confidence: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            min_confidence: default_min_confidence(),
            repeat_confidence: default_repeat_confidence(),
            isolated_confidence: default_isolated_confidence(),
        }
    }
}

/// Deduplication windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Same signature within this many seconds is the same spin
    #[serde(default = "default_gap_seconds")]
    pub min_result_gap_seconds: f64,
    /// Same signature within this many frames is the same spin.
    /// Defaults to the stream mode's value.
    #[serde(default)]
    pub min_result_gap_frames: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_result_gap_seconds: default_gap_seconds(),
            min_result_gap_frames: None,
        }
    }
}

/// End-of-iteration sleeps and acquisition retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Sleep after a frame with no detection
    #[serde(default = "default_no_detection_ms")]
    pub no_detection_ms: u64,
    /// Consecutive misses before the first idle tier
    #[serde(default = "default_idle_tier1_after")]
    pub idle_tier1_after: u32,
    #[serde(default = "default_idle_tier1_ms")]
    pub idle_tier1_ms: u64,
    /// Consecutive misses before the second idle tier
    #[serde(default = "default_idle_tier2_after")]
    pub idle_tier2_after: u32,
    #[serde(default = "default_idle_tier2_ms")]
    pub idle_tier2_ms: u64,
    /// Sleep after a duplicate; the result is still on screen
    #[serde(default = "default_duplicate_ms")]
    pub duplicate_ms: u64,
    /// Sleep after an emitted result
    #[serde(default = "default_success_ms")]
    pub success_ms: u64,
    /// Backoff between acquisition retries
    #[serde(default = "default_acquisition_retry_ms")]
    pub acquisition_retry_ms: u64,
    /// Attempts per iteration for transient acquisition failures
    #[serde(default = "default_acquisition_retries")]
    pub acquisition_retries: u32,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            no_detection_ms: default_no_detection_ms(),
            idle_tier1_after: default_idle_tier1_after(),
            idle_tier1_ms: default_idle_tier1_ms(),
            idle_tier2_after: default_idle_tier2_after(),
            idle_tier2_ms: default_idle_tier2_ms(),
            duplicate_ms: default_duplicate_ms(),
            success_ms: default_success_ms(),
            acquisition_retry_ms: default_acquisition_retry_ms(),
            acquisition_retries: default_acquisition_retries(),
        }
    }
}

impl DelayConfig {
    /// No sleeping at all; for replaying recordings as fast as possible
    pub fn none() -> Self {
        Self {
            no_detection_ms: 0,
            idle_tier1_ms: 0,
            idle_tier2_ms: 0,
            duplicate_ms: 0,
            success_ms: 0,
            acquisition_retry_ms: 0,
            ..Default::default()
        }
    }
}

/// How the game phase is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseMethod {
    /// Result is shown whenever a number was found
    #[default]
    Inferred,
    /// Match phase templates against a dedicated region
    Template,
}

/// Optional game phase gating
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub method: PhaseMethod,
    /// Directory with `betting.png`, `spinning.png`, `result_shown.png`
    #[serde(default)]
    pub templates: Option<PathBuf>,
    /// Minimum correlation for a phase template
    #[serde(default = "default_phase_threshold")]
    pub threshold: f32,
    /// Region holding the phase indicator (template method)
    #[serde(default)]
    pub region: Option<Region>,
}

impl Default for GameStateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: PhaseMethod::default(),
            templates: None,
            threshold: default_phase_threshold(),
            region: None,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name of this configuration, used in logs
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub mode: StreamMode,
    /// Analyse every n-th frame. Defaults to the stream mode's value.
    #[serde(default)]
    pub frame_stride: Option<u32>,
    /// Seconds between frame statistics log lines
    #[serde(default = "default_stats_interval")]
    pub stats_log_interval_secs: u64,
    /// Number display area; absent means the full frame
    #[serde(default)]
    pub region_of_interest: Option<Region>,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub game_state: GameStateConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            mode: StreamMode::default(),
            frame_stride: None,
            stats_log_interval_secs: default_stats_interval(),
            region_of_interest: None,
            templates: TemplateConfig::default(),
            ocr: OcrConfig::default(),
            color: ColorConfig::default(),
            validation: ValidationConfig::default(),
            dedup: DedupConfig::default(),
            delays: DelayConfig::default(),
            game_state: GameStateConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Preset for live screen capture
    pub fn live() -> Self {
        Self::new("live").with_mode(StreamMode::Live)
    }

    /// Preset for recorded streams
    pub fn recorded() -> Self {
        Self::new("recorded").with_mode(StreamMode::Recorded)
    }

    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded engine config '{}' from {:?}", config.name, path.as_ref());
        Ok(config)
    }

    /// Parse from TOML text and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Set the stream mode
    pub fn with_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number display region
    pub fn with_region(mut self, region: Region) -> Self {
        self.region_of_interest = Some(region);
        self
    }

    /// Set the template directory
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates.directory = Some(dir.into());
        self
    }

    /// Set the frame stride
    pub fn with_frame_stride(mut self, stride: u32) -> Self {
        self.frame_stride = Some(stride);
        self
    }

    /// Set the end-of-iteration delays
    pub fn with_delays(mut self, delays: DelayConfig) -> Self {
        self.delays = delays;
        self
    }

    /// Enable or disable OCR
    pub fn with_ocr(mut self, enabled: bool) -> Self {
        self.ocr.enabled = enabled;
        self
    }

    /// Enable game phase gating
    pub fn with_game_state(mut self, game_state: GameStateConfig) -> Self {
        self.game_state = game_state;
        self
    }

    /// Effective frame stride
    pub fn frame_stride(&self) -> u32 {
        self.frame_stride
            .unwrap_or_else(|| self.mode.default_frame_stride())
            .max(1)
    }

    /// Effective same-spin frame gap
    pub fn min_result_gap_frames(&self) -> u64 {
        self.dedup
            .min_result_gap_frames
            .unwrap_or_else(|| self.mode.default_gap_frames())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, value
                )))
            }
        };

        unit("templates.threshold", self.templates.threshold)?;
        unit("ocr.confidence_threshold", self.ocr.confidence_threshold)?;
        unit("validation.min_confidence", self.validation.min_confidence)?;
        unit("validation.repeat_confidence", self.validation.repeat_confidence)?;
        unit("validation.isolated_confidence", self.validation.isolated_confidence)?;
        unit("game_state.threshold", self.game_state.threshold)?;

        if self.templates.blur_sigma < 0.0 {
            return Err(EngineError::InvalidConfig(
                "templates.blur_sigma must not be negative".into(),
            ));
        }
        if self.validation.history_size == 0 {
            return Err(EngineError::InvalidConfig(
                "validation.history_size must be at least 1".into(),
            ));
        }
        if self.frame_stride == Some(0) {
            return Err(EngineError::InvalidConfig("frame_stride must be at least 1".into()));
        }
        if self.ocr.upscale == 0 {
            return Err(EngineError::InvalidConfig("ocr.upscale must be at least 1".into()));
        }
        if Duration::try_from_secs_f64(self.dedup.min_result_gap_seconds).is_err() {
            return Err(EngineError::InvalidConfig(format!(
                "dedup.min_result_gap_seconds must be a non-negative duration, got {}",
                self.dedup.min_result_gap_seconds
            )));
        }
        if self.delays.idle_tier2_after < self.delays.idle_tier1_after {
            return Err(EngineError::InvalidConfig(
                "delays.idle_tier2_after must not be below delays.idle_tier1_after".into(),
            ));
        }
        for region in self.region_of_interest.iter().chain(self.game_state.region.iter()) {
            if region.width == 0 || region.height == 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "region {:?} has zero size",
                    region
                )));
            }
        }
        let ranges = self.color.red.iter().chain(&self.color.black).chain(&self.color.green);
        for range in ranges {
            if (0..3).any(|i| range.lower[i] > range.upper[i]) {
                return Err(EngineError::InvalidConfig(format!(
                    "color range {:?} has lower bound above upper bound",
                    range
                )));
            }
        }
        if self.game_state.enabled
            && self.game_state.method == PhaseMethod::Template
            && self.game_state.templates.is_none()
        {
            return Err(EngineError::InvalidConfig(
                "game_state.templates is required for the template method".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_name() -> String {
    "roulette".to_string()
}

fn default_stats_interval() -> u64 {
    5
}

fn default_template_threshold() -> f32 {
    0.75
}

fn default_blur_sigma() -> f32 {
    0.8
}

fn default_ocr_threshold() -> f32 {
    0.9
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}

fn default_ocr_upscale() -> u32 {
    3
}

fn default_red_ranges() -> Vec<HsvRange> {
    vec![
        HsvRange::new([0, 100, 80], [10, 255, 255]),
        HsvRange::new([160, 100, 80], [179, 255, 255]),
    ]
}

fn default_black_ranges() -> Vec<HsvRange> {
    vec![HsvRange::new([0, 0, 0], [179, 255, 60])]
}

fn default_green_ranges() -> Vec<HsvRange> {
    vec![HsvRange::new([35, 80, 60], [85, 255, 255])]
}

fn default_history_size() -> usize {
    10
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_repeat_confidence() -> f32 {
    0.9
}

fn default_isolated_confidence() -> f32 {
    0.95
}

fn default_gap_seconds() -> f64 {
    3.0
}

fn default_no_detection_ms() -> u64 {
    100
}

fn default_idle_tier1_after() -> u32 {
    30
}

fn default_idle_tier1_ms() -> u64 {
    300
}

fn default_idle_tier2_after() -> u32 {
    150
}

fn default_idle_tier2_ms() -> u64 {
    1000
}

fn default_duplicate_ms() -> u64 {
    500
}

fn default_success_ms() -> u64 {
    100
}

fn default_acquisition_retry_ms() -> u64 {
    50
}

fn default_acquisition_retries() -> u32 {
    3
}

fn default_phase_threshold() -> f32 {
    0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.templates.threshold, 0.75);
        assert_eq!(config.ocr.confidence_threshold, 0.9);
        assert_eq!(config.dedup.min_result_gap_seconds, 3.0);
        assert_eq!(config.min_result_gap_frames(), 90);
        assert_eq!(config.frame_stride(), 1);
        assert!(!config.game_state.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recorded_preset() {
        let config = EngineConfig::recorded();
        assert_eq!(config.min_result_gap_frames(), 15);
        assert_eq!(config.frame_stride(), 5);
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            name = "table-3"
            mode = "recorded"
            region_of_interest = { x = 10, y = 20, width = 64, height = 48 }

            [templates]
            directory = "templates"
            threshold = 0.8

            [dedup]
            min_result_gap_frames = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "table-3");
        assert_eq!(config.mode, StreamMode::Recorded);
        assert_eq!(config.region_of_interest, Some(Region::new(10, 20, 64, 48)));
        assert_eq!(config.templates.threshold, 0.8);
        assert_eq!(config.min_result_gap_frames(), 30);
        assert_eq!(config.frame_stride(), 5);
        assert_eq!(config.ocr.confidence_threshold, 0.9);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::recorded().with_region(Region::new(1, 2, 3, 4));
        let text = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.mode, StreamMode::Recorded);
        assert_eq!(parsed.region_of_interest, config.region_of_interest);
        assert_eq!(parsed.color.red, config.color.red);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig::default();
        config.templates.threshold = 1.5;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig::default().with_frame_stride(0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.color.red.push(HsvRange::new([20, 0, 0], [10, 255, 255]));
        assert!(config.validate().is_err());

        let config = EngineConfig::default().with_game_state(GameStateConfig {
            enabled: true,
            method: PhaseMethod::Template,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        for gap in [-1.0, f64::NAN, f64::INFINITY, 1e20] {
            let mut config = EngineConfig::default();
            config.dedup.min_result_gap_seconds = gap;
            assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))), "gap {}", gap);
        }
    }

    #[test]
    fn test_region_clamp() {
        let region = Region::new(8, 8, 10, 10);
        assert_eq!(region.clamp_to(12, 20), Some((8, 8, 4, 10)));
        assert_eq!(region.clamp_to(8, 20), None);
    }

    #[test]
    fn test_hsv_range() {
        let range = HsvRange::new([0, 100, 80], [10, 255, 255]);
        assert!(range.contains([5, 200, 200]));
        assert!(!range.contains([11, 200, 200]));
        assert!(!range.contains([5, 50, 200]));
    }
}
