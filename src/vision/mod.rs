//! Frame analysis for the roulette number display
//!
//! Frames come from a [`FrameSource`], get cropped by the [`RegionExtractor`]
//! and are handed to the [`RecognitionArbiter`], which runs the template,
//! OCR and color strategies in that order.
//!
//! # Example
//!
//! ```ignore
//! use roulette_vision::vision::{RecognitionArbiter, TemplateSet};
//!
//! let templates = Arc::new(TemplateSet::load_from_dir("templates".as_ref(), 0.8)?);
//! let arbiter = RecognitionArbiter::from_config(&config, templates);
//! if let Recognition::Accepted(result) = arbiter.recognize(&roi) {
//!     println!("{:?} via {}", result.number, result.method);
//! }
//! ```

pub mod arbiter;
pub mod capture;
pub mod color;
pub mod detector;
pub mod ocr;
pub mod region;
pub mod template;

pub use arbiter::RecognitionArbiter;
pub use capture::{Frame, FrameSequenceSource, FrameSource, MockFrameSource};
pub use color::ColorClassifier;
pub use detector::{
    Candidate, CandidateRecognizer, Recognition, RecognitionMethod, RecognitionResult, ResultSignature,
    RouletteColor, RouletteNumber,
};
#[cfg(feature = "tesseract")]
pub use ocr::TesseractBackend;
pub use ocr::{shutdown_shared_ocr, MockOcrBackend, OcrBackend, OcrRead, TextRecognizer};
pub use region::RegionExtractor;
pub use template::{Template, TemplateMatcher, TemplateSet};
