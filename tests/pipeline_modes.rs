use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use fruit_inspector::detect::default_class_names;
use fruit_inspector::pipeline::DriverStats;
use fruit_inspector::roles::RoleAssignment;
use fruit_inspector::trigger;
use fruit_inspector::{
    source_for, BackendRegistry, BinaryMask, BoundingBox, ClassRoleMap, Dispatcher, Frame,
    InferenceEngine, InferenceMode, InlineSpawner, InspectionReport, InspectionStatus,
    PipelineConfig, PipelineDriver, PredictParams, RawDetection, RawDetections, Reporter,
    ResultSink, Severity, SeverityThresholds, SharedInference, SourceConfig, StubBackend,
    VideoSource,
};

const BELT: [u8; 3] = [96, 96, 96];
const APPLE: [u8; 3] = [200, 35, 30];
const BLEMISH: [u8; 3] = [40, 25, 15];

#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<InspectionReport>>,
}

impl RecordingSink {
    fn reports(&self) -> Vec<InspectionReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ResultSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver(&self, report: &InspectionReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Replays one frame forever; reads listed in `fail_on` fail once.
struct LoopSource {
    frame: Frame,
    reads: usize,
    fail_on: VecDeque<usize>,
    opens: Arc<AtomicUsize>,
    open: bool,
    pace: Duration,
}

impl LoopSource {
    fn new(frame: Frame) -> Self {
        Self {
            frame,
            reads: 0,
            fail_on: VecDeque::new(),
            opens: Arc::new(AtomicUsize::new(0)),
            open: false,
            pace: Duration::ZERO,
        }
    }
}

impl VideoSource for LoopSource {
    fn describe(&self) -> String {
        "loop://test".to_string()
    }

    fn open(&mut self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("not open"));
        }
        self.reads += 1;
        if self.fail_on.front() == Some(&self.reads) {
            self.fail_on.pop_front();
            return Err(anyhow!("stream hiccup"));
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        Ok(self.frame.clone().with_index(self.reads as u64))
    }

    fn release(&mut self) {
        self.open = false;
    }
}

/// 40x30 belt with a 20x20 apple; the blemish is `blemish_w` x 8 pixels on it.
fn apple_frame(blemish_w: u32) -> Frame {
    let mut frame = Frame::filled(40, 30, BELT).unwrap();
    for y in 5..25 {
        for x in 10..30 {
            frame.put_pixel(x, y, APPLE);
        }
    }
    for y in 8..16 {
        for x in 12..12 + blemish_w {
            frame.put_pixel(x, y, BLEMISH);
        }
    }
    frame
}

fn roles_for(class_names: &std::collections::BTreeMap<u32, String>) -> Arc<ClassRoleMap> {
    let assignment = RoleAssignment {
        reference: vec!["Apple".into()],
        unconditional_defect: vec!["Bruise".into(), "rotten".into()],
        area_defect: vec!["Black Dot".into(), "dent".into(), "scratch".into(), "unriped".into()],
        labels: Default::default(),
    };
    Arc::new(ClassRoleMap::build(class_names, &assignment))
}

struct Harness {
    sink: Arc<RecordingSink>,
    state: Arc<SharedInference>,
    stop: Arc<AtomicBool>,
}

fn build_driver(
    backend: StubBackend,
    source: Box<dyn VideoSource>,
    mode: InferenceMode,
    frame_limit: Option<u64>,
) -> (PipelineDriver, Harness) {
    let mut registry = BackendRegistry::new();
    registry.register(backend);
    let detector = registry.segmenter("stub").unwrap();
    let roles = roles_for(&default_class_names());

    let sink = Arc::new(RecordingSink::default());
    let mut dispatcher = Dispatcher::new().with_spawner(Arc::new(InlineSpawner));
    dispatcher.add_sink(Arc::clone(&sink) as Arc<dyn ResultSink>);

    let state = Arc::new(SharedInference::new());
    let reporter = Reporter::new(
        Arc::clone(&roles),
        SeverityThresholds::new(10.0, 15.0).unwrap(),
        dispatcher,
        Arc::clone(&state),
    );
    let engine = InferenceEngine::new(detector, roles, PredictParams::default());
    let stop = Arc::new(AtomicBool::new(false));
    let config = PipelineConfig {
        mode,
        predict: PredictParams::default(),
        retry_delay: Duration::from_millis(10),
        stats_interval: Duration::from_secs(60),
        frame_limit,
    };
    let driver = PipelineDriver::new(
        source,
        engine,
        Arc::new(reporter),
        Arc::clone(&state),
        config,
        Arc::clone(&stop),
    );
    (driver, Harness { sink, state, stop })
}

fn every_frame() -> InferenceMode {
    InferenceMode::Interval {
        period: Duration::ZERO,
    }
}

#[test]
fn interval_mode_reports_every_inspected_frame() {
    // 64 blemish pixels on a 400 pixel apple: 16% -> Severe.
    let source = Box::new(LoopSource::new(apple_frame(8)));
    let (mut driver, harness) = build_driver(StubBackend::new(), source, every_frame(), Some(3));
    driver.open_source().unwrap();
    let stats = driver.run().unwrap();

    assert_eq!(stats.frames_read.load(Ordering::Relaxed), 3);
    assert_eq!(stats.reports.load(Ordering::Relaxed), 3);
    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 3);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.sequence, i as u64 + 1);
        assert_eq!(report.status, InspectionStatus::Defective);
        assert_eq!(report.defect_count, 1);
        assert_eq!(report.defect_summary, "Black Dot");
        let defect = &report.defects[0];
        assert_eq!(defect.severity, Severity::Severe);
        assert_eq!(defect.reason_detail, "Black Dot (16.00%)");
    }
    assert_eq!(harness.state.sequence(), 3);
    assert_eq!(
        harness.state.latest_report().map(|r| r.sequence),
        Some(3)
    );
    assert!(harness.stop.load(Ordering::SeqCst));
}

#[test]
fn minor_overlap_is_substandard() {
    // 48 / 400 = 12%.
    let source = Box::new(LoopSource::new(apple_frame(6)));
    let (mut driver, harness) = build_driver(StubBackend::new(), source, every_frame(), Some(1));
    driver.open_source().unwrap();
    driver.run().unwrap();

    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, InspectionStatus::Substandard);
    assert_eq!(reports[0].defects[0].severity, Severity::Minor);
}

#[test]
fn interval_mode_skips_frames_between_ticks() {
    let source = Box::new(LoopSource::new(apple_frame(0)));
    let mode = InferenceMode::Interval {
        period: Duration::from_secs(60),
    };
    let (mut driver, harness) = build_driver(StubBackend::new(), source, mode, Some(20));
    driver.open_source().unwrap();
    let stats = driver.run().unwrap();

    assert_eq!(stats.frames_read.load(Ordering::Relaxed), 20);
    assert_eq!(stats.frames_inferred.load(Ordering::Relaxed), 1);
    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_normal());
    assert_eq!(reports[0].defect_summary, "Normal");
}

#[test]
fn read_failure_reconnects_and_continues() {
    let mut source = LoopSource::new(apple_frame(8));
    source.fail_on = VecDeque::from([2]);
    let opens = Arc::clone(&source.opens);
    let (mut driver, harness) =
        build_driver(StubBackend::new(), Box::new(source), every_frame(), Some(3));
    driver.open_source().unwrap();
    let stats = driver.run().unwrap();

    assert_eq!(stats.reconnects.load(Ordering::Relaxed), 1);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(harness.sink.reports().len(), 3);
}

#[test]
fn detector_failure_skips_the_frame() {
    let mut backend = StubBackend::new();
    backend.push_failure("inference timeout");
    let source = Box::new(LoopSource::new(apple_frame(8)));
    let (mut driver, harness) = build_driver(backend, source, every_frame(), Some(2));
    driver.open_source().unwrap();
    let stats = driver.run().unwrap();

    assert_eq!(stats.detector_failures.load(Ordering::Relaxed), 1);
    assert_eq!(stats.frames_inferred.load(Ordering::Relaxed), 1);
    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].sequence, 1);
}

#[test]
fn missing_reference_still_sends_a_normal_report() {
    let mut backend = StubBackend::new();
    let mut raw = RawDetections::new(default_class_names());
    raw.push(RawDetection {
        class_id: 4,
        confidence: 0.9,
        bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        mask: Some(BinaryMask::from_rect(40, 30, 0, 0, 10, 10)),
    });
    backend.push(raw);
    let source = Box::new(LoopSource::new(apple_frame(8)));
    let (mut driver, harness) = build_driver(backend, source, every_frame(), Some(1));
    driver.open_source().unwrap();
    driver.run().unwrap();

    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, InspectionStatus::Normal);
    assert_eq!(reports[0].defect_count, 0);
}

#[test]
fn triggered_mode_reports_only_on_trigger() {
    let mut source = LoopSource::new(apple_frame(8));
    source.pace = Duration::from_millis(5);
    let mode = InferenceMode::Triggered {
        settling_delay: Duration::from_millis(20),
    };
    let (driver, harness) = build_driver(StubBackend::new(), Box::new(source), mode, None);
    let (tx, rx) = trigger::channel();
    let mut driver = driver.with_trigger(rx);
    driver.open_source().unwrap();
    let runner = thread::spawn(move || driver.run());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !harness.state.is_ready() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(harness.state.is_ready());
    thread::sleep(Duration::from_millis(50));
    assert!(harness.sink.reports().is_empty());

    assert!(tx.fire());
    while harness.sink.reports().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    harness.stop.store(true, Ordering::SeqCst);
    let stats = runner.join().unwrap().unwrap();

    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, InspectionStatus::Defective);
    assert!(reports[0].sequence >= 1);
    assert!(stats.frames_inferred.load(Ordering::Relaxed) >= reports[0].sequence);
    assert_eq!(stats.reports.load(Ordering::Relaxed), 1);
}

#[test]
fn triggered_mode_requires_a_trigger_channel() {
    let source = Box::new(LoopSource::new(apple_frame(0)));
    let mode = InferenceMode::Triggered {
        settling_delay: Duration::ZERO,
    };
    let (mut driver, _harness) = build_driver(StubBackend::new(), source, mode, Some(1));
    driver.open_source().unwrap();
    assert!(driver.run().is_err());
}

#[test]
fn trigger_before_first_inference_is_ignored() {
    let sink = Arc::new(RecordingSink::default());
    let mut dispatcher = Dispatcher::new().with_spawner(Arc::new(InlineSpawner));
    dispatcher.add_sink(sink.clone());
    let state = Arc::new(SharedInference::new());
    let reporter = Arc::new(Reporter::new(
        roles_for(&default_class_names()),
        SeverityThresholds::default(),
        dispatcher,
        Arc::clone(&state),
    ));
    let stop = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(DriverStats::default());
    let (tx, rx) = trigger::channel();
    let worker = trigger::TriggerWorker::new(
        rx,
        reporter,
        Arc::clone(&state),
        Duration::ZERO,
        Arc::clone(&stop),
        Arc::clone(&stats),
    )
    .spawn()
    .unwrap();

    assert!(tx.fire());
    thread::sleep(Duration::from_millis(300));
    assert!(sink.reports().is_empty());
    assert_eq!(stats.reports.load(Ordering::Relaxed), 0);

    // The worker keeps serving once a result exists.
    let frame = apple_frame(0);
    state.publish(frame.clone(), Vec::new(), frame);
    assert!(tx.fire());
    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.reports().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    stop.store(true, Ordering::SeqCst);
    worker.join().unwrap();

    assert_eq!(sink.reports().len(), 1);
    assert_eq!(stats.reports.load(Ordering::Relaxed), 1);
}

#[test]
fn synthetic_conveyor_produces_defects_on_blemished_passes() {
    let config = SourceConfig {
        url: "stub://conveyor?fps=0&width=100&height=60&seed=11".to_string(),
        ..SourceConfig::default()
    };
    let source = source_for(&config).unwrap();
    let (mut driver, harness) = build_driver(StubBackend::new(), source, every_frame(), Some(180));
    driver.open_source().unwrap();
    driver.run().unwrap();

    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 180);
    assert!(reports[..60].iter().all(|r| r.is_normal()));
    assert!(reports[120..]
        .iter()
        .any(|r| r.status == InspectionStatus::Defective));
}
