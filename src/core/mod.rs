//! Core engine abstractions
//!
//! This module turns recognized frames into spin results:
//! - `TemporalValidator` - plausibility checks against recent results
//! - `DeduplicationStateMachine` - new spin versus result still on screen
//! - `GameStateGate` - optional phase gating
//! - `DetectionPipeline` - the per-frame composition of all stages
//! - `ResultEngine` - worker thread, pacing and event delivery

pub mod dedup;
pub mod gate;
pub mod pipeline;
pub mod validator;

mod events;
mod runner;
mod stats;

pub use dedup::{DedupDecision, DedupState, DeduplicationStateMachine, DuplicateReason, NewReason};
pub use events::{EventHandler, ResultCallback, ResultEvent};
pub use gate::{GamePhase, GameStateGate, InferredPhaseClassifier, PhaseClassifier, TemplatePhaseClassifier};
pub use pipeline::{DetectionPipeline, FrameOutcome};
pub use runner::{next_delay, EngineState, PipelineBuilder, ResultEngine};
pub use stats::{EngineStats, StatsSnapshot};
pub use validator::{HistoryEntry, RejectReason, TemporalValidator};
