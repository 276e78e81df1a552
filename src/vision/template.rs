//! Template matching for the winning-number display
//!
//! Templates and ROIs go through the same preprocessing (grayscale, histogram
//! equalization, light Gaussian blur) so illumination shared by all templates
//! cancels out before correlation.

use super::detector::{Candidate, CandidateRecognizer, Recognition, RecognitionMethod, RecognitionResult, RouletteNumber};
use crate::config::TemplateConfig;
use crate::error::{EngineError, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supported template file extensions
const TEMPLATE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// ROI must be this many times larger than a template (in one dimension) to
/// search it with a sliding window instead of resizing it
const SLIDING_SCALE: f32 = 1.5;

/// Scores at or above this (and far enough above threshold) stop the scan
const EARLY_ACCEPT_SCORE: f32 = 0.98;
const EARLY_ACCEPT_MARGIN: f32 = 0.15;

/// Ambiguity gates as `(gap upper bound, required best score)`, checked in
/// order. A gap at or above the last bound is accepted unconditionally.
const AMBIGUITY_GATES: [(f32, f32); 2] = [(0.03, 0.90), (0.04, 0.85)];

/// Grayscale, equalize and blur an image for correlation
pub fn preprocess(gray: &GrayImage, blur_sigma: f32) -> GrayImage {
    let equalized = imageproc::contrast::equalize_histogram(gray);
    if blur_sigma > 0.0 {
        imageproc::filter::gaussian_blur_f32(&equalized, blur_sigma)
    } else {
        equalized
    }
}

/// Zero-mean normalized cross-correlation of a preprocessed ROI against a
/// preprocessed template, in 0.0..=1.0. Anti-correlation counts as 0.
///
/// When the ROI is much larger than the template the template is slid over it
/// and the best position wins; otherwise the ROI is resized to the template
/// and compared directly. A flat window or a flat template scores 0, so a
/// blank display never looks like a number.
pub fn correlation_score(roi: &GrayImage, template: &GrayImage) -> f32 {
    let (rw, rh) = roi.dimensions();
    let (tw, th) = template.dimensions();
    if rw == 0 || rh == 0 || tw == 0 || th == 0 {
        return 0.0;
    }

    let fits = rw >= tw && rh >= th;
    let much_larger = rw as f32 >= tw as f32 * SLIDING_SCALE || rh as f32 >= th as f32 * SLIDING_SCALE;

    let best = if fits && much_larger {
        best_window_score(roi, template)
    } else {
        let resized = imageops::resize(roi, tw, th, FilterType::Triangle);
        window_score(&resized, 0, 0, &TemplateStats::new(template))
    };

    if best.is_finite() {
        best.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Template sums reused for every window position
struct TemplateStats<'a> {
    image: &'a GrayImage,
    n: i128,
    sum: i128,
    /// `n * sum(t^2) - sum(t)^2`
    spread: i128,
}

impl<'a> TemplateStats<'a> {
    fn new(image: &'a GrayImage) -> Self {
        let n = image.width() as i128 * image.height() as i128;
        let (sum, sum_sq) = image.pixels().fold((0i128, 0i128), |(s, sq), p| {
            let v = p.0[0] as i128;
            (s + v, sq + v * v)
        });
        Self {
            image,
            n,
            sum,
            spread: n * sum_sq - sum * sum,
        }
    }
}

fn best_window_score(roi: &GrayImage, template: &GrayImage) -> f64 {
    let stats = TemplateStats::new(template);
    if stats.spread <= 0 {
        return 0.0;
    }

    let (tw, th) = template.dimensions();
    let mut best = 0.0f64;
    for y in 0..=(roi.height() - th) {
        for x in 0..=(roi.width() - tw) {
            best = best.max(window_score(roi, x, y, &stats));
        }
    }
    best
}

/// Correlation coefficient of the template-sized window at `(x, y)`. Sums are
/// kept in integers so flat windows come out exactly flat.
fn window_score(roi: &GrayImage, x: u32, y: u32, template: &TemplateStats<'_>) -> f64 {
    if template.spread <= 0 {
        return 0.0;
    }

    let (mut sum, mut sum_sq, mut cross) = (0i128, 0i128, 0i128);
    for (tx, ty, t) in template.image.enumerate_pixels() {
        let r = roi.get_pixel(x + tx, y + ty).0[0] as i128;
        sum += r;
        sum_sq += r * r;
        cross += r * t.0[0] as i128;
    }

    let spread = template.n * sum_sq - sum * sum;
    if spread <= 0 {
        return 0.0;
    }

    let numerator = (template.n * cross - sum * template.sum) as f64;
    numerator / ((spread as f64) * (template.spread as f64)).sqrt()
}

/// Required best score for a best/runner-up gap, or `None` when the gap is
/// wide enough to accept unconditionally
pub fn required_score_for_gap(gap: f32) -> Option<f32> {
    AMBIGUITY_GATES
        .iter()
        .find(|(upper, _)| gap < *upper)
        .map(|(_, required)| *required)
}

/// Apply threshold and ambiguity gating to the two best candidates
pub fn gate_candidates(best: Candidate, runner_up: Option<Candidate>, threshold: f32) -> Recognition {
    if best.score < threshold {
        return Recognition::NoMatch;
    }

    if let Some(runner_up) = runner_up.filter(|c| c.score >= threshold) {
        let gap = best.score - runner_up.score;
        if let Some(required) = required_score_for_gap(gap) {
            if best.score < required {
                return Recognition::Ambiguous { best, runner_up };
            }
        }
    }

    Recognition::Accepted(RecognitionResult::from_number(best.number, best.score, best.method))
}

/// A preprocessed template for one number
#[derive(Debug, Clone)]
pub struct Template {
    pub label: RouletteNumber,
    pub image: GrayImage,
    pub path: Option<PathBuf>,
}

impl Template {
    /// Build a template from a raw grayscale image
    pub fn new(label: RouletteNumber, raw: &GrayImage, blur_sigma: f32) -> Self {
        Self {
            label,
            image: preprocess(raw, blur_sigma),
            path: None,
        }
    }

    /// Load a template file; the label comes from the leading digits of the
    /// file stem (`17.png`, `17_black.png`)
    pub fn load(path: &Path, blur_sigma: f32) -> Result<Self> {
        let invalid = |reason: String| EngineError::InvalidTemplate {
            path: path.to_path_buf(),
            reason,
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| invalid("missing file name".into()))?;
        let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(invalid(format!("name '{}' does not start with a number", stem)));
        }
        let label = digits
            .parse::<u8>()
            .ok()
            .and_then(RouletteNumber::new)
            .ok_or_else(|| invalid(format!("label {} outside 0..=36", digits)))?;

        let raw = image::open(path)
            .map_err(|e| invalid(e.to_string()))?
            .to_luma8();
        if raw.width() == 0 || raw.height() == 0 {
            return Err(invalid("empty image".into()));
        }

        let mut template = Self::new(label, &raw, blur_sigma);
        template.path = Some(path.to_path_buf());
        Ok(template)
    }
}

/// Immutable set of templates, shared read-only once loaded
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
    labels: BTreeSet<RouletteNumber>,
}

impl TemplateSet {
    pub fn new(mut templates: Vec<Template>) -> Self {
        templates.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.path.cmp(&b.path)));
        let labels = templates.iter().map(|t| t.label).collect();
        Self { templates, labels }
    }

    /// Load every template in `dir`. Bad files are skipped with a warning;
    /// only an unreadable directory is an error.
    pub fn load_from_dir(dir: &Path, blur_sigma: f32) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|source| EngineError::TemplateDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut templates = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let supported = path
                .extension()
                .map(|ext| TEMPLATE_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()))
                .unwrap_or(false);
            if !supported {
                continue;
            }

            match Template::load(&path, blur_sigma) {
                Ok(template) => templates.push(template),
                Err(e) => log::warn!("Skipping template: {}", e),
            }
        }

        let set = Self::new(templates);
        if set.is_empty() {
            log::warn!("No templates loaded from {:?}; falling back to OCR/color only", dir);
        } else {
            log::info!(
                "Loaded {} templates covering {} numbers from {:?}",
                set.len(),
                set.labels.len(),
                dir
            );
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn contains_label(&self, label: RouletteNumber) -> bool {
        self.labels.contains(&label)
    }

    pub fn labels(&self) -> impl Iterator<Item = RouletteNumber> + '_ {
        self.labels.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }
}

/// Template-matching recognizer
pub struct TemplateMatcher {
    templates: Arc<TemplateSet>,
    threshold: f32,
    blur_sigma: f32,
}

impl TemplateMatcher {
    pub fn new(templates: Arc<TemplateSet>, threshold: f32, blur_sigma: f32) -> Self {
        Self {
            templates,
            threshold,
            blur_sigma,
        }
    }

    pub fn from_config(templates: Arc<TemplateSet>, config: &TemplateConfig) -> Self {
        Self::new(templates, config.threshold, config.blur_sigma)
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Best score per label, highest first (ties by label)
    pub fn score_all(&self, roi: &RgbImage) -> Vec<Candidate> {
        let gray = preprocess(&imageops::grayscale(roi), self.blur_sigma);
        self.scan(&gray, false).0
    }

    /// Scores every template; with `early_exit` the scan stops at the first
    /// decisive score and reports it
    fn scan(&self, roi: &GrayImage, early_exit: bool) -> (Vec<Candidate>, Option<Candidate>) {
        let mut per_label: BTreeMap<RouletteNumber, f32> = BTreeMap::new();

        for template in self.templates.iter() {
            let score = correlation_score(roi, &template.image);
            let entry = per_label.entry(template.label).or_insert(score);
            if score > *entry {
                *entry = score;
            }

            if early_exit && score >= EARLY_ACCEPT_SCORE && score >= self.threshold + EARLY_ACCEPT_MARGIN {
                let candidate = Candidate::new(template.label, score, RecognitionMethod::Template);
                return (Vec::new(), Some(candidate));
            }
        }

        let mut candidates: Vec<Candidate> = per_label
            .into_iter()
            .map(|(label, score)| Candidate::new(label, score, RecognitionMethod::Template))
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.number.cmp(&b.number)));
        (candidates, None)
    }
}

impl CandidateRecognizer for TemplateMatcher {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Template
    }

    fn recognize(&self, roi: &RgbImage) -> Recognition {
        if self.templates.is_empty() {
            return Recognition::NoMatch;
        }

        let gray = preprocess(&imageops::grayscale(roi), self.blur_sigma);
        let (candidates, early) = self.scan(&gray, true);

        if let Some(candidate) = early {
            log::trace!("Template early accept: {} ({:.3})", candidate.number, candidate.score);
            return Recognition::Accepted(RecognitionResult::from_number(
                candidate.number,
                candidate.score,
                RecognitionMethod::Template,
            ));
        }

        let Some(best) = candidates.first().copied() else {
            return Recognition::NoMatch;
        };
        let runner_up = candidates.get(1).copied();

        match gate_candidates(best, runner_up, self.threshold) {
            Recognition::Accepted(result) => {
                if result.number.is_some_and(|n| self.templates.contains_label(n)) {
                    Recognition::Accepted(result)
                } else {
                    Recognition::NoMatch
                }
            }
            Recognition::Ambiguous { best, runner_up } => {
                log::debug!(
                    "Ambiguous template match: {} ({:.3}) vs {} ({:.3})",
                    best.number,
                    best.score,
                    runner_up.number,
                    runner_up.score
                );
                Recognition::Ambiguous { best, runner_up }
            }
            Recognition::NoMatch => {
                log::trace!("Best template {} below threshold ({:.3})", best.number, best.score);
                Recognition::NoMatch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn number(n: u8) -> RouletteNumber {
        RouletteNumber::new(n).unwrap()
    }

    fn candidate(n: u8, score: f32) -> Candidate {
        Candidate::new(number(n), score, RecognitionMethod::Template)
    }

    /// Distinct synthetic glyph per label: vertical bars at label-dependent offsets
    fn glyph(label: u8) -> GrayImage {
        GrayImage::from_fn(24, 32, |x, y| {
            let bar = (x + label as u32 * 3) % 8 < 3;
            let band = (y + label as u32 * 5) % 11 < 4;
            if bar ^ band {
                Luma([230])
            } else {
                Luma([20])
            }
        })
    }

    fn to_rgb(gray: &GrayImage) -> RgbImage {
        image::DynamicImage::ImageLuma8(gray.clone()).to_rgb8()
    }

    #[test]
    fn test_gap_table() {
        assert_eq!(required_score_for_gap(0.01), Some(0.90));
        assert_eq!(required_score_for_gap(0.035), Some(0.85));
        // bounds are exclusive: a gap of exactly 0.03 is in the 0.85 tier
        assert_eq!(required_score_for_gap(0.03), Some(0.85));
        assert_eq!(required_score_for_gap(0.04), None);
        assert_eq!(required_score_for_gap(0.2), None);
    }

    #[test]
    fn test_near_tie_rejected() {
        let decision = gate_candidates(candidate(8, 0.80), Some(candidate(3, 0.78)), 0.75);
        assert!(matches!(decision, Recognition::Ambiguous { .. }));
    }

    #[test]
    fn test_clear_winner_accepted() {
        let decision = gate_candidates(candidate(8, 0.95), Some(candidate(3, 0.80)), 0.75);
        match decision {
            Recognition::Accepted(result) => {
                assert_eq!(result.number, Some(number(8)));
                assert_eq!(result.method, RecognitionMethod::Template);
            }
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_strong_score_overrides_mild_ambiguity() {
        let decision = gate_candidates(candidate(8, 0.92), Some(candidate(3, 0.90)), 0.75);
        assert!(decision.is_accepted());

        let decision = gate_candidates(candidate(8, 0.86), Some(candidate(3, 0.825)), 0.75);
        assert!(decision.is_accepted());

        let decision = gate_candidates(candidate(8, 0.84), Some(candidate(3, 0.805)), 0.75);
        assert!(matches!(decision, Recognition::Ambiguous { .. }));
    }

    #[test]
    fn test_runner_up_below_threshold_ignored() {
        let decision = gate_candidates(candidate(8, 0.76), Some(candidate(3, 0.74)), 0.75);
        assert!(decision.is_accepted());
    }

    #[test]
    fn test_below_threshold() {
        let decision = gate_candidates(candidate(8, 0.70), None, 0.75);
        assert_eq!(decision, Recognition::NoMatch);
    }

    #[test]
    fn test_exact_template_scores_one() {
        let processed = preprocess(&glyph(17), 0.8);
        let score = correlation_score(&processed, &processed);
        assert!((score - 1.0).abs() < 1e-3, "score was {}", score);
    }

    #[test]
    fn test_sliding_window_finds_embedded_template() {
        let template = glyph(5);
        let mut roi = GrayImage::from_pixel(80, 80, Luma([20]));
        imageops::replace(&mut roi, &template, 30, 20);
        let score = correlation_score(&roi, &template);
        assert!((score - 1.0).abs() < 1e-3, "score was {}", score);
    }

    #[test]
    fn test_recognize_deterministic() {
        let templates: Vec<Template> = [4u8, 17, 29]
            .iter()
            .map(|&n| Template::new(number(n), &glyph(n), 0.8))
            .collect();
        let matcher = TemplateMatcher::new(Arc::new(TemplateSet::new(templates)), 0.75, 0.8);
        let roi = to_rgb(&glyph(17));

        let first = matcher.score_all(&roi);
        let second = matcher.score_all(&roi);
        assert_eq!(first, second);
        assert_eq!(first[0].number, number(17));

        let a = matcher.recognize(&roi);
        let b = matcher.recognize(&roi);
        assert_eq!(a, b);
        match a {
            Recognition::Accepted(result) => assert_eq!(result.number, Some(number(17))),
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_flat_roi_scores_zero() {
        let template = preprocess(&glyph(17), 0.8);
        for value in [0u8, 128, 255] {
            let flat = GrayImage::from_pixel(24, 32, Luma([value]));
            assert_eq!(correlation_score(&preprocess(&flat, 0.8), &template), 0.0);
            let large = GrayImage::from_pixel(80, 80, Luma([value]));
            assert_eq!(correlation_score(&large, &template), 0.0);
        }

        let flat_template = GrayImage::from_pixel(24, 32, Luma([200]));
        assert_eq!(correlation_score(&template, &flat_template), 0.0);
    }

    #[test]
    fn test_inverted_glyph_scores_zero() {
        let original = glyph(9);
        let inverted = GrayImage::from_fn(24, 32, |x, y| Luma([255 - original.get_pixel(x, y).0[0]]));
        assert_eq!(correlation_score(&inverted, &original), 0.0);
    }

    #[test]
    fn test_blank_roi_is_no_match() {
        let templates: Vec<Template> = [1u8, 4, 17, 22]
            .iter()
            .map(|&n| Template::new(number(n), &glyph(n), 0.8))
            .collect();
        let matcher = TemplateMatcher::new(Arc::new(TemplateSet::new(templates)), 0.75, 0.8);

        for value in [0u8, 128, 255] {
            let blank = RgbImage::from_pixel(24, 32, image::Rgb([value, value, value]));
            assert!(matcher.score_all(&blank).iter().all(|c| c.score == 0.0));
            assert_eq!(matcher.recognize(&blank), Recognition::NoMatch);
        }
    }

    #[test]
    fn test_empty_set_no_match() {
        let matcher = TemplateMatcher::new(Arc::new(TemplateSet::default()), 0.75, 0.8);
        assert_eq!(matcher.recognize(&RgbImage::new(10, 10)), Recognition::NoMatch);
    }

    #[test]
    fn test_load_skips_bad_files() {
        let dir = std::env::temp_dir().join(format!("roulette-vision-tpl-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        glyph(7).save(dir.join("7.png")).unwrap();
        glyph(7).save(dir.join("7_alt.png")).unwrap();
        glyph(12).save(dir.join("12_red.png")).unwrap();
        glyph(1).save(dir.join("40.png")).unwrap();
        glyph(1).save(dir.join("zero.png")).unwrap();
        fs::write(dir.join("3.png"), b"not an image").unwrap();

        let set = TemplateSet::load_from_dir(&dir, 0.8).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.labels().map(|n| n.value()).collect::<Vec<_>>(), vec![7, 12]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory_is_error() {
        let result = TemplateSet::load_from_dir(Path::new("/nonexistent/roulette-templates"), 0.8);
        assert!(matches!(result, Err(EngineError::TemplateDirectory { .. })));
    }
}
