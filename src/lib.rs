//! Roulette Vision
//!
//! Detects the winning number of a roulette game from a video feed and emits
//! exactly one event per spin.
//!
//! Frames flow through region extraction, three recognition strategies
//! (template matching, OCR, color), temporal validation, deduplication and an
//! optional game phase gate. The engine never decides what to bet; it only
//! reports what happened.
//!
//! # Example
//!
//! ```no_run
//! use roulette_vision::{EngineConfig, FrameSequenceSource, ResultEngine};
//!
//! # fn main() -> roulette_vision::Result<()> {
//! let config = EngineConfig::recorded().with_template_dir("templates");
//! let mut engine = ResultEngine::new(config);
//! engine.on_result(|event| {
//!     println!("spin #{}: {} {}", event.spin_sequence, event.number, event.color);
//! });
//!
//! let source = FrameSequenceSource::from_directory("recording", false)?;
//! engine.start(Box::new(source))?;
//! engine.wait();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod vision;

// Re-export commonly used types
pub use crate::core::{
    DetectionPipeline, EngineState, FrameOutcome, RejectReason, ResultEngine, ResultEvent, StatsSnapshot,
};
pub use config::{EngineConfig, Region, StreamMode};
pub use error::{CaptureError, EngineError, OcrError, Result};
pub use vision::{
    Frame, FrameSequenceSource, FrameSource, MockFrameSource, RecognitionMethod, RouletteColor, RouletteNumber,
};
