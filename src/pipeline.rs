//! Producer loop: read frames, run the detector, publish shared state, report.
//!
//! In interval mode one frame per period is inferred, classified, published and
//! dispatched; frames in between are drained. In triggered mode every frame is
//! inferred and published, and classification runs on the trigger worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use log::{debug, error, info, warn};

use crate::annotate::Annotator;
use crate::classify::{classify, Classification, SeverityThresholds};
use crate::detect::{DetectorBackend, PredictParams};
use crate::dispatch::Dispatcher;
use crate::extract::{extract, DetectionInstance};
use crate::frame::Frame;
use crate::ingest::VideoSource;
use crate::report::InspectionReport;
use crate::roles::ClassRoleMap;
use crate::state::{FrameState, SharedInference};
use crate::transport::SnapshotStore;
use crate::trigger::{TriggerReceiver, TriggerWorker};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_SETTLING_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceMode {
    /// Infer and report one frame every `period`.
    Interval { period: Duration },
    /// Infer every frame; report `settling_delay` after each trigger.
    Triggered { settling_delay: Duration },
}

impl InferenceMode {
    pub fn name(&self) -> &'static str {
        match self {
            InferenceMode::Interval { .. } => "interval",
            InferenceMode::Triggered { .. } => "triggered",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub mode: InferenceMode,
    pub predict: PredictParams,
    pub retry_delay: Duration,
    pub stats_interval: Duration,
    /// Stop after this many frames have been read.
    pub frame_limit: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: InferenceMode::Interval {
                period: Duration::from_secs(7),
            },
            predict: PredictParams::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
            stats_interval: DEFAULT_STATS_INTERVAL,
            frame_limit: None,
        }
    }
}

/// Counters shared between the driver and the trigger worker.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub frames_read: AtomicU64,
    pub frames_inferred: AtomicU64,
    pub detector_failures: AtomicU64,
    pub reconnects: AtomicU64,
    pub reports: AtomicU64,
}

impl DriverStats {
    pub fn log_summary(&self) {
        info!(
            "driver stats: frames_read={} inferred={} detector_failures={} reconnects={} reports={}",
            self.frames_read.load(Ordering::Relaxed),
            self.frames_inferred.load(Ordering::Relaxed),
            self.detector_failures.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.reports.load(Ordering::Relaxed),
        );
    }
}

/// Detector plus extraction and instance annotation.
pub struct InferenceEngine {
    detector: Arc<Mutex<dyn DetectorBackend>>,
    roles: Arc<ClassRoleMap>,
    params: PredictParams,
    annotator: Annotator,
}

impl InferenceEngine {
    pub fn new(
        detector: Arc<Mutex<dyn DetectorBackend>>,
        roles: Arc<ClassRoleMap>,
        params: PredictParams,
    ) -> Self {
        Self {
            detector,
            roles,
            params,
            annotator: Annotator::default(),
        }
    }

    pub fn infer(&self, frame: &Frame) -> Result<Vec<DetectionInstance>> {
        let raw = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?
            .predict(frame, self.params)
            .context("detector predict")?;
        Ok(extract(&raw, &self.roles))
    }

    pub fn annotate(&self, frame: &Frame, instances: &[DetectionInstance]) -> Frame {
        self.annotator.draw_instances(frame, instances, &self.roles)
    }
}

/// Classification, snapshot hand-off and dispatch of one inspected frame.
pub struct Reporter {
    roles: Arc<ClassRoleMap>,
    thresholds: SeverityThresholds,
    annotator: Annotator,
    snapshots: Option<SnapshotStore>,
    dispatcher: Dispatcher,
    state: Arc<SharedInference>,
}

impl Reporter {
    pub fn new(
        roles: Arc<ClassRoleMap>,
        thresholds: SeverityThresholds,
        dispatcher: Dispatcher,
        state: Arc<SharedInference>,
    ) -> Self {
        Self {
            roles,
            thresholds,
            annotator: Annotator::default(),
            snapshots: None,
            dispatcher,
            state,
        }
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn evaluate(&self, instances: &[DetectionInstance]) -> Classification {
        classify(instances, &self.roles, &self.thresholds)
    }

    /// Draw classification boxes onto `frame`.
    pub fn mark(&self, frame: &mut Frame, classification: &Classification) {
        self.annotator.draw_results(frame, &classification.results);
    }

    /// Build the report, store a snapshot when due, and dispatch to every sink.
    pub fn deliver(
        &self,
        sequence: u64,
        classification: &Classification,
        annotated: &Frame,
    ) -> Arc<InspectionReport> {
        let mut report = InspectionReport::from_classification(
            sequence,
            Local::now().naive_local(),
            classification,
        );
        if let Some(store) = &self.snapshots {
            if store.should_capture(&report) {
                match store.save(annotated, report.detection_time) {
                    Ok(snapshot) => report.image_url = snapshot.url,
                    Err(err) => warn!("snapshot failed: {:#}", err),
                }
            }
        }

        info!(
            "frame {}: {} ({} defect(s): {})",
            sequence, report.status, report.defect_count, report.defect_summary
        );
        for defect in &report.defects {
            debug!(
                "  {} {:?} {} conf={:.2}",
                defect.source_class, defect.severity, defect.reason_detail, defect.confidence
            );
        }

        let report = Arc::new(report);
        self.state.set_latest_report(Arc::clone(&report));
        self.dispatcher.dispatch(Arc::clone(&report));
        report
    }

    /// Classify a published state and report it. Severity marks go on a private copy
    /// used for the snapshot; the shared state keeps the detector annotation.
    pub fn report_state(&self, state: &FrameState) -> Arc<InspectionReport> {
        let classification = self.evaluate(&state.instances);
        let mut annotated = state.annotated_frame.clone();
        self.mark(&mut annotated, &classification);
        self.deliver(state.sequence, &classification, &annotated)
    }
}

pub struct PipelineDriver {
    source: Box<dyn VideoSource>,
    engine: InferenceEngine,
    reporter: Arc<Reporter>,
    state: Arc<SharedInference>,
    config: PipelineConfig,
    stop: Arc<AtomicBool>,
    stats: Arc<DriverStats>,
    trigger: Option<TriggerReceiver>,
}

impl PipelineDriver {
    pub fn new(
        source: Box<dyn VideoSource>,
        engine: InferenceEngine,
        reporter: Arc<Reporter>,
        state: Arc<SharedInference>,
        config: PipelineConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            engine,
            reporter,
            state,
            config,
            stop,
            stats: Arc::new(DriverStats::default()),
            trigger: None,
        }
    }

    /// Trigger tokens to listen to in triggered mode.
    pub fn with_trigger(mut self, trigger: TriggerReceiver) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn stats(&self) -> Arc<DriverStats> {
        Arc::clone(&self.stats)
    }

    /// Open the source once; failure here is fatal.
    pub fn open_source(&mut self) -> Result<()> {
        self.source
            .open()
            .with_context(|| format!("open video source {}", self.source.describe()))
    }

    /// Run until the stop flag is set or the frame limit is reached.
    ///
    /// The source must already be open (see `open_source`).
    pub fn run(mut self) -> Result<Arc<DriverStats>> {
        let worker = self.start_trigger_worker()?;
        info!(
            "pipeline running in {} mode on {}",
            self.config.mode.name(),
            self.source.describe()
        );

        let mut next_tick = Instant::now();
        let mut last_stats = Instant::now();
        while !self.stop.load(Ordering::SeqCst) {
            if let Some(limit) = self.config.frame_limit {
                if self.stats.frames_read.load(Ordering::Relaxed) >= limit {
                    break;
                }
            }
            if last_stats.elapsed() >= self.config.stats_interval {
                self.stats.log_summary();
                last_stats = Instant::now();
            }

            let frame = match self.source.read() {
                Ok(frame) => frame,
                Err(err) => {
                    self.reconnect(err);
                    continue;
                }
            };
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);

            match self.config.mode {
                InferenceMode::Interval { period } => {
                    let now = Instant::now();
                    if now < next_tick {
                        continue;
                    }
                    next_tick = now + period;
                    self.inspect_frame(frame);
                }
                InferenceMode::Triggered { .. } => self.publish_frame(frame),
            }
        }

        self.source.release();
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("trigger worker panicked");
            }
        }
        self.stats.log_summary();
        info!("pipeline stopped");
        Ok(self.stats)
    }

    fn start_trigger_worker(&mut self) -> Result<Option<JoinHandle<()>>> {
        let InferenceMode::Triggered { settling_delay } = self.config.mode else {
            return Ok(None);
        };
        let receiver = self
            .trigger
            .take()
            .ok_or_else(|| anyhow!("triggered mode needs a trigger channel"))?;
        let worker = TriggerWorker::new(
            receiver,
            Arc::clone(&self.reporter),
            Arc::clone(&self.state),
            settling_delay.min(MAX_SETTLING_DELAY),
            Arc::clone(&self.stop),
            Arc::clone(&self.stats),
        );
        Ok(Some(worker.spawn()?))
    }

    fn reconnect(&mut self, err: anyhow::Error) {
        warn!(
            "read from {} failed: {:#}; reconnecting in {:?}",
            self.source.describe(),
            err,
            self.config.retry_delay
        );
        self.source.release();
        sleep_unless_stopped(self.config.retry_delay, &self.stop);
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.source.open() {
            warn!("reopen of {} failed: {:#}", self.source.describe(), err);
        }
    }

    fn infer(&self, frame: &Frame) -> Option<Vec<DetectionInstance>> {
        match self.engine.infer(frame) {
            Ok(instances) => {
                self.stats.frames_inferred.fetch_add(1, Ordering::Relaxed);
                Some(instances)
            }
            Err(err) => {
                self.stats.detector_failures.fetch_add(1, Ordering::Relaxed);
                warn!("skipping frame {}: {:#}", frame.index, err);
                None
            }
        }
    }

    /// Interval mode: infer, classify, annotate, publish, report.
    fn inspect_frame(&self, frame: Frame) {
        let Some(instances) = self.infer(&frame) else {
            return;
        };
        let classification = self.reporter.evaluate(&instances);
        let mut annotated = self.engine.annotate(&frame, &instances);
        self.reporter.mark(&mut annotated, &classification);
        let state = self.state.publish(frame, instances, annotated);
        self.reporter
            .deliver(state.sequence, &classification, &state.annotated_frame);
        self.stats.reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Triggered mode: infer, annotate instances, publish.
    fn publish_frame(&self, frame: Frame) {
        let Some(instances) = self.infer(&frame) else {
            return;
        };
        let annotated = self.engine.annotate(&frame, &instances);
        self.state.publish(frame, instances, annotated);
    }
}

/// Sleep in short steps so a stop request is honoured promptly.
pub fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}
