//! OCR fallback for the number display
//!
//! Consulted only when template matching finds nothing. Several preprocessing
//! variants are tried against several page segmentation modes; the first read
//! that parses to a wheel number with a reported confidence at or above the
//! threshold wins. Reads without a confidence are never accepted.

use super::detector::{CandidateRecognizer, Recognition, RecognitionMethod, RecognitionResult, RouletteNumber};
use crate::config::OcrConfig;
use crate::error::OcrError;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One line of recognized text
#[derive(Debug, Clone, PartialEq)]
pub struct OcrRead {
    pub text: String,
    /// Backend confidence (0.0 - 1.0), if it reported one
    pub confidence: Option<f32>,
}

impl OcrRead {
    pub fn new(text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Page segmentation hint passed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegmentation {
    SingleLine,
    SingleWord,
    Block,
}

impl PageSegmentation {
    /// Attempt order
    pub const ALL: [PageSegmentation; 3] = [
        PageSegmentation::SingleLine,
        PageSegmentation::SingleWord,
        PageSegmentation::Block,
    ];

    /// Tesseract `--psm` value
    pub fn psm(self) -> u8 {
        match self {
            PageSegmentation::SingleLine => 7,
            PageSegmentation::SingleWord => 8,
            PageSegmentation::Block => 6,
        }
    }
}

/// An OCR engine
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine can be used at all
    fn is_available(&self) -> bool;

    /// Read digits from `image`
    fn read(&self, image: &GrayImage, mode: PageSegmentation) -> Result<Vec<OcrRead>, OcrError>;
}

/// Number from a read, if its confidence clears `min_confidence` (inclusive)
pub fn accept_read(read: &OcrRead, min_confidence: f32) -> Option<(RouletteNumber, f32)> {
    let confidence = read.confidence?;
    if confidence.is_nan() || confidence < min_confidence {
        return None;
    }
    let number = RouletteNumber::parse(&read.text)?;
    Some((number, confidence.clamp(0.0, 1.0)))
}

/// Preprocessing variants in attempt order: Otsu binarized, Otsu inverted,
/// raw grayscale. All are upscaled by `upscale` first.
pub fn preprocessing_variants(roi: &RgbImage, upscale: u32) -> Vec<GrayImage> {
    let gray = imageops::grayscale(roi);
    if gray.width() == 0 || gray.height() == 0 {
        return Vec::new();
    }

    let upscale = upscale.max(1);
    let raw = if upscale > 1 {
        imageops::resize(
            &gray,
            gray.width() * upscale,
            gray.height() * upscale,
            FilterType::CatmullRom,
        )
    } else {
        gray
    };

    let level = otsu_level(&raw);
    vec![
        threshold(&raw, level, ThresholdType::Binary),
        threshold(&raw, level, ThresholdType::BinaryInverted),
        raw,
    ]
}

/// Process-wide OCR engine handle, created on first use
static SHARED_OCR: Lazy<Mutex<Option<Arc<dyn OcrBackend>>>> = Lazy::new(|| Mutex::new(None));

/// Shared OCR handle; `init` runs only if no handle exists yet (or the
/// existing one has a different name). Concurrent callers wait on the lock
/// instead of initializing twice.
pub fn shared_ocr<F>(name: &str, init: F) -> Arc<dyn OcrBackend>
where
    F: FnOnce() -> Arc<dyn OcrBackend>,
{
    let mut guard = SHARED_OCR.lock();
    match guard.as_ref() {
        Some(backend) if backend.name() == name => backend.clone(),
        _ => {
            let backend = init();
            log::info!("Initialized shared OCR engine '{}'", backend.name());
            *guard = Some(backend.clone());
            backend
        }
    }
}

/// Drop the shared OCR handle. The next `shared_ocr` call initializes a new one.
pub fn shutdown_shared_ocr() {
    if let Some(backend) = SHARED_OCR.lock().take() {
        log::info!("Shut down shared OCR engine '{}'", backend.name());
    }
}

/// OCR recognizer with a primary and an optional secondary backend
pub struct TextRecognizer {
    primary: Option<Arc<dyn OcrBackend>>,
    secondary: Option<Arc<dyn OcrBackend>>,
    min_confidence: f32,
    upscale: u32,
}

impl TextRecognizer {
    pub fn new(
        primary: Option<Arc<dyn OcrBackend>>,
        secondary: Option<Arc<dyn OcrBackend>>,
        min_confidence: f32,
        upscale: u32,
    ) -> Self {
        Self {
            primary,
            secondary,
            min_confidence,
            upscale,
        }
    }

    /// Tesseract-backed recognizer; the primary engine is the shared handle
    #[cfg(feature = "tesseract")]
    pub fn from_config(config: &OcrConfig) -> Self {
        let command = config.primary_command.clone();
        let primary = shared_ocr(&command, || {
            Arc::new(TesseractBackend::new(command.clone())) as Arc<dyn OcrBackend>
        });
        let secondary = config
            .secondary_command
            .as_ref()
            .map(|cmd| Arc::new(TesseractBackend::new(cmd.clone())) as Arc<dyn OcrBackend>);
        Self::new(Some(primary), secondary, config.confidence_threshold, config.upscale)
    }

    /// Without a built-in backend, OCR never produces a result
    #[cfg(not(feature = "tesseract"))]
    pub fn from_config(config: &OcrConfig) -> Self {
        log::warn!("Built without the 'tesseract' feature; OCR fallback disabled");
        Self::new(None, None, config.confidence_threshold, config.upscale)
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Backends that are currently usable, primary first
    fn available_backends(&self) -> Vec<&Arc<dyn OcrBackend>> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .filter(|backend| backend.is_available())
            .collect()
    }

    /// Run every variant x mode on one backend until a read is accepted
    fn recognize_with(
        &self,
        backend: &dyn OcrBackend,
        variants: &[GrayImage],
    ) -> Result<Option<(RouletteNumber, f32)>, OcrError> {
        for variant in variants {
            for mode in PageSegmentation::ALL {
                let reads = match backend.read(variant, mode) {
                    Ok(reads) => reads,
                    Err(OcrError::Unavailable(name)) => return Err(OcrError::Unavailable(name)),
                    Err(e) => {
                        log::debug!("OCR attempt failed: {}", e);
                        continue;
                    }
                };

                for read in &reads {
                    if let Some(accepted) = accept_read(read, self.min_confidence) {
                        return Ok(Some(accepted));
                    }
                    log::trace!(
                        "OCR read '{}' rejected (confidence {:?})",
                        read.text.trim(),
                        read.confidence
                    );
                }
            }
        }
        Ok(None)
    }
}

impl CandidateRecognizer for TextRecognizer {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Ocr
    }

    fn recognize(&self, roi: &RgbImage) -> Recognition {
        let backends = self.available_backends();
        if backends.is_empty() {
            return Recognition::NoMatch;
        }

        let variants = preprocessing_variants(roi, self.upscale);
        if variants.is_empty() {
            return Recognition::NoMatch;
        }

        for backend in backends {
            match self.recognize_with(backend.as_ref(), &variants) {
                Ok(Some((number, confidence))) => {
                    log::trace!("OCR ({}) read {} ({:.2})", backend.name(), number, confidence);
                    return Recognition::Accepted(RecognitionResult::from_number(
                        number,
                        confidence,
                        RecognitionMethod::Ocr,
                    ));
                }
                Ok(None) => return Recognition::NoMatch,
                Err(e) => {
                    log::warn!("{}; trying next OCR backend", e);
                }
            }
        }
        Recognition::NoMatch
    }
}

/// Tesseract command line backend
#[cfg(feature = "tesseract")]
pub struct TesseractBackend {
    command: String,
    available: once_cell::sync::OnceCell<bool>,
}

#[cfg(feature = "tesseract")]
impl TesseractBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            available: once_cell::sync::OnceCell::new(),
        }
    }
}

#[cfg(feature = "tesseract")]
impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        &self.command
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let found = std::process::Command::new(&self.command)
                .arg("--version")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            if !found {
                log::warn!("OCR command '{}' not found", self.command);
            }
            found
        })
    }

    fn read(&self, image: &GrayImage, mode: PageSegmentation) -> Result<Vec<OcrRead>, OcrError> {
        use std::io::{Cursor, Write};
        use std::process::{Command, Stdio};

        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

        let mut child = Command::new(&self.command)
            .arg("stdin")
            .arg("stdout")
            .arg("--psm")
            .arg(mode.psm().to_string())
            .arg("-c")
            .arg("tessedit_char_whitelist=0123456789")
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::Unavailable(self.command.clone()),
                _ => OcrError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png)?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                backend: self.command.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse Tesseract TSV output into one read per text line.
///
/// Word texts on a line are concatenated; the line confidence is the lowest
/// word confidence, and is missing if any word reports none.
pub fn parse_tsv(tsv: &str) -> Vec<OcrRead> {
    const WORD_LEVEL: &str = "5";

    let mut reads: Vec<OcrRead> = Vec::new();
    let mut current_line: Option<(String, String, String)> = None;

    for row in tsv.lines().skip(1) {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }
        let text = columns[11].trim();
        if text.is_empty() {
            continue;
        }
        let confidence = columns[10]
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|c| *c >= 0.0)
            .map(|c| c / 100.0);

        let line_key = (columns[2].to_string(), columns[3].to_string(), columns[4].to_string());
        let same_line = current_line.as_ref() == Some(&line_key);

        match reads.last_mut() {
            Some(last) if same_line => {
                last.text.push_str(text);
                last.confidence = match (last.confidence, confidence) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    _ => None,
                };
            }
            _ => {
                reads.push(OcrRead::new(text, confidence));
                current_line = Some(line_key);
            }
        }
    }

    reads
}

/// Backend returning scripted reads, for tests and offline replay
pub struct MockOcrBackend {
    name: String,
    available: bool,
    reads: Vec<OcrRead>,
    calls: AtomicUsize,
}

impl MockOcrBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            reads: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Reads returned on every call
    pub fn with_reads(mut self, reads: Vec<OcrRead>) -> Self {
        self.reads = reads;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Number of `read` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrBackend for MockOcrBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn read(&self, _image: &GrayImage, _mode: PageSegmentation) -> Result<Vec<OcrRead>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(OcrError::Unavailable(self.name.clone()));
        }
        Ok(self.reads.clone())
    }
}
