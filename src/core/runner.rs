//! Result engine runner
//!
//! Owns the worker thread that pulls frames from a [`FrameSource`], pushes
//! them through the [`DetectionPipeline`] and delivers emitted events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::events::{EventHandler, ResultCallback, ResultEvent};
use super::pipeline::{DetectionPipeline, FrameOutcome};
use super::stats::{EngineStats, StatsSnapshot};
use crate::config::{DelayConfig, EngineConfig};
use crate::error::{CaptureError, EngineError, Result};
use crate::vision::{shutdown_shared_ocr, Frame, FrameSource};

/// Lifecycle state of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
    /// The source reported end of stream
    Finished,
}

/// Builds a fresh pipeline for each run
pub type PipelineBuilder = Arc<dyn Fn(&EngineConfig) -> Result<DetectionPipeline> + Send + Sync>;

/// Result of one acquisition attempt sequence
enum Acquired {
    Frame(Frame),
    EndOfStream,
    Failed(CaptureError),
}

/// Sleep at the end of an iteration.
///
/// `misses` is the number of consecutive frames without anything usable,
/// including the current one.
pub fn next_delay(outcome: &FrameOutcome, misses: u32, delays: &DelayConfig) -> Duration {
    let ms = match outcome {
        FrameOutcome::Skipped => 0,
        FrameOutcome::Emitted(_) => delays.success_ms,
        FrameOutcome::Duplicate(_) | FrameOutcome::Gated(_) => delays.duplicate_ms,
        FrameOutcome::NoDetection | FrameOutcome::Ambiguous { .. } | FrameOutcome::Rejected(_) => {
            if misses >= delays.idle_tier2_after {
                delays.idle_tier2_ms
            } else if misses >= delays.idle_tier1_after {
                delays.idle_tier1_ms
            } else {
                delays.no_detection_ms
            }
        }
    };
    Duration::from_millis(ms)
}

/// Detection engine running on a dedicated thread
pub struct ResultEngine {
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    events: Arc<Mutex<EventHandler>>,
    stats: Arc<EngineStats>,
    builder: PipelineBuilder,
    /// Set once a run has started; cleared by `stop`
    started: bool,
}

impl ResultEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(EngineState::Stopped)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            events: Arc::new(Mutex::new(EventHandler::new())),
            stats: Arc::new(EngineStats::new()),
            builder: Arc::new(DetectionPipeline::from_config),
            started: false,
        }
    }

    /// Replace how the per-run pipeline is built
    pub fn with_pipeline_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&EngineConfig) -> Result<DetectionPipeline> + Send + Sync + 'static,
    {
        self.builder = Arc::new(builder);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a callback, invoked on the engine thread for every event.
    /// Callbacks must not register further listeners.
    pub fn on_result<F>(&self, callback: F)
    where
        F: Fn(ResultEvent) + Send + Sync + 'static,
    {
        let callback: ResultCallback = Box::new(callback);
        self.events.lock().on_result(callback);
    }

    /// Channel receiving every subsequent event
    pub fn subscribe(&self) -> Receiver<ResultEvent> {
        self.events.lock().subscribe()
    }

    /// Start processing `source` on a new worker thread with fresh state
    pub fn start(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        // a previous run may have ended on its own
        self.join_worker();

        let pipeline = (self.builder)(&self.config)?;
        self.stats.reset();

        self.running.store(true, Ordering::SeqCst);
        *self.state.lock() = EngineState::Running;

        let worker = Worker {
            running: self.running.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            stats: self.stats.clone(),
            delays: self.config.delays.clone(),
            stats_interval: Duration::from_secs(self.config.stats_log_interval_secs.max(1)),
            name: self.config.name.clone(),
        };

        let spawned = thread::Builder::new()
            .name("result-engine".into())
            .spawn(move || worker.run(source, pipeline));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.started = true;
                log::info!("Result engine '{}' started ({:?} mode)", self.config.name, self.config.mode);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                *self.state.lock() = EngineState::Stopped;
                Err(EngineError::Io(e))
            }
        }
    }

    /// Stop the worker and start again on `source` with cleared state
    pub fn restart(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        self.halt();
        log::info!("Result engine '{}' restarting", self.config.name);
        self.start(source)
    }

    /// Block until the worker exits on its own (end of stream)
    pub fn wait(&mut self) {
        self.join_worker();
    }

    /// Stop the worker and release the shared OCR engine
    pub fn stop(&mut self) {
        self.halt();
        if std::mem::take(&mut self.started) {
            shutdown_shared_ocr();
            log::info!("Result engine '{}' stopped", self.config.name);
        }
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_worker();
        *self.state.lock() = EngineState::Stopped;
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Result engine worker panicked");
            }
        }
    }
}

impl Drop for ResultEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved onto the worker thread
struct Worker {
    running: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
    events: Arc<Mutex<EventHandler>>,
    stats: Arc<EngineStats>,
    delays: DelayConfig,
    stats_interval: Duration,
    name: String,
}

impl Worker {
    fn run(self, mut source: Box<dyn FrameSource>, mut pipeline: DetectionPipeline) {
        let restartable = source.supports_restart();
        let mut misses: u32 = 0;
        let mut last_index: Option<u64> = None;
        let mut last_log = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let frame = match self.acquire(source.as_mut()) {
                Acquired::Frame(frame) => frame,
                Acquired::EndOfStream => {
                    log::info!("Frame source for '{}' ended", self.name);
                    *self.state.lock() = EngineState::Finished;
                    break;
                }
                Acquired::Failed(e) => {
                    log::warn!("Frame acquisition failed: {}", e);
                    self.stats.record_acquisition_failure();
                    misses = misses.saturating_add(1);
                    self.sleep(Duration::from_millis(self.delays.no_detection_ms));
                    continue;
                }
            };

            let frame = match frame.index.or_else(|| source.current_frame_index()) {
                Some(index) => Frame {
                    index: Some(index),
                    ..frame
                },
                None => frame,
            };

            if let (Some(previous), Some(index)) = (last_index, frame.index) {
                if index < previous {
                    if restartable {
                        log::info!("Stream looped ({} -> {})", previous, index);
                    } else {
                        log::warn!("Frame index went backwards ({} -> {})", previous, index);
                    }
                }
            }
            last_index = frame.index.or(last_index);

            let outcome = pipeline.process_frame(&frame, Instant::now());
            self.stats.record(&outcome);

            if outcome.is_failure() {
                misses = misses.saturating_add(1);
            } else if !matches!(outcome, FrameOutcome::Skipped) {
                misses = 0;
            }

            let delay = next_delay(&outcome, misses, &self.delays);
            if let FrameOutcome::Emitted(event) = outcome {
                self.events.lock().emit(event);
            }

            if last_log.elapsed() >= self.stats_interval {
                let s = self.stats.snapshot();
                log::info!(
                    "Engine '{}': {} frames, {} results, {} duplicates, {} misses in a row",
                    self.name,
                    s.frames_acquired,
                    s.emitted,
                    s.duplicates,
                    s.failure_streak
                );
                last_log = Instant::now();
            }

            self.sleep(delay);
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Pull a frame, retrying transient failures with a short backoff
    fn acquire(&self, source: &mut dyn FrameSource) -> Acquired {
        let mut attempt = 0;
        loop {
            match source.next_frame() {
                Ok(Some(frame)) => return Acquired::Frame(frame),
                Ok(None) => return Acquired::EndOfStream,
                Err(e) if e.is_transient() && attempt < self.delays.acquisition_retries => {
                    attempt += 1;
                    log::debug!("Acquisition attempt {} failed: {}", attempt, e);
                    self.sleep(Duration::from_millis(self.delays.acquisition_retry_ms));
                    if !self.running.load(Ordering::SeqCst) {
                        return Acquired::Failed(e);
                    }
                }
                Err(e) => return Acquired::Failed(e),
            }
        }
    }

    fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}
