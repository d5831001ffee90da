//! inspectord - fruit defect inspection daemon
//!
//! This daemon:
//! 1. Reads frames from the configured camera source
//! 2. Runs the segmentation detector and resolves class roles
//! 3. Grades area defects by overlap with the fruit, in interval or triggered mode
//! 4. Publishes reports to MQTT / HTTP and stores annotated snapshots
//! 5. Serves the annotated live view over HTTP

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fruit_inspector::config::{InspectorConfig, ModeKind};
use fruit_inspector::pipeline::DEFAULT_STATS_INTERVAL;
use fruit_inspector::transport::{HttpSink, MqttLink, SnapshotStore};
use fruit_inspector::trigger;
use fruit_inspector::ui::{Ui, UiMode};
use fruit_inspector::{
    source_for, BackendRegistry, ClassRole, ClassRoleMap, Dispatcher, InferenceEngine,
    LiveViewServer, PipelineConfig, PipelineDriver, Reporter, SharedInference, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fruit defect inspection daemon")]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "INSPECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Inference mode: interval or triggered.
    #[arg(long)]
    mode: Option<ModeKind>,

    /// Video source URL (stub://…, http(s)://…).
    #[arg(long)]
    source: Option<String>,

    /// Startup output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: UiMode,

    /// Stop after reading this many frames.
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);

    let cfg = staged(&ui, "Loading configuration", || {
        let mut cfg = InspectorConfig::load_from(args.config.as_deref())?;
        if let Some(mode) = args.mode {
            cfg.mode.kind = mode;
        }
        if let Some(source) = &args.source {
            cfg.source.url = source.clone();
        }
        Ok(cfg)
    })?;
    let thresholds = cfg.severity_thresholds()?;

    let (detector, roles) = staged(&ui, "Loading detector", || {
        let registry = build_registry(&cfg)?;
        let detector = registry.segmenter(&cfg.detector.backend)?;
        let class_names = {
            let mut backend = detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            backend.warm_up().context("detector warm-up")?;
            backend.class_names().clone()
        };
        let roles = ClassRoleMap::build(&class_names, &cfg.roles);
        if !roles.missing().is_empty() {
            log::warn!(
                "{} configured class name(s) unknown to the detector: {}",
                roles.missing().len(),
                roles.missing().join(", ")
            );
        }
        if !roles.has_role(ClassRole::Reference) {
            log::warn!("no reference class resolved; area defects will not be graded");
        }
        Ok((detector, Arc::new(roles)))
    })?;

    let source = staged(&ui, "Resolving video source", || source_for(&cfg.source))?;

    let (trigger_tx, trigger_rx) = match cfg.mode.kind {
        ModeKind::Triggered => {
            let (tx, rx) = trigger::channel();
            (Some(tx), Some(rx))
        }
        ModeKind::Interval => (None, None),
    };

    let mqtt = match &cfg.mqtt {
        Some(mqtt_cfg) => Some(staged(&ui, "Connecting MQTT", || {
            MqttLink::connect(&mqtt_cfg.settings()?, trigger_tx.clone())
        })?),
        None => {
            if trigger_tx.is_some() {
                log::warn!("triggered mode without an MQTT broker: no trigger source is configured");
            }
            None
        }
    };
    drop(trigger_tx);

    let mut dispatcher = Dispatcher::new();
    if let Some(link) = &mqtt {
        for sink in link.sinks() {
            dispatcher.add_sink(sink);
        }
    }
    if let Some(http) = &cfg.http {
        dispatcher.add_sink(Arc::new(HttpSink::new(http.endpoint.clone(), http.timeout)));
    }
    if dispatcher.sink_names().is_empty() {
        log::warn!("no result sinks configured; reports are only logged");
    } else {
        log::info!("result sinks: {}", dispatcher.sink_names().join(", "));
    }

    let state = Arc::new(SharedInference::new());
    let mut reporter = Reporter::new(Arc::clone(&roles), thresholds, dispatcher, Arc::clone(&state));
    if let Some(snapshot_cfg) = &cfg.snapshots {
        let store = staged(&ui, "Preparing snapshot directory", || {
            SnapshotStore::new(snapshot_cfg.clone())
        })?;
        log::info!("snapshots written to {}", store.dir().display());
        reporter = reporter.with_snapshots(store);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let engine = InferenceEngine::new(detector, Arc::clone(&roles), cfg.detector.predict);
    let pipeline_cfg = PipelineConfig {
        mode: cfg.mode.inference_mode(),
        predict: cfg.detector.predict,
        retry_delay: cfg.retry_delay,
        stats_interval: DEFAULT_STATS_INTERVAL,
        frame_limit: args.frames,
    };
    let mut driver = PipelineDriver::new(
        source,
        engine,
        Arc::new(reporter),
        Arc::clone(&state),
        pipeline_cfg,
        Arc::clone(&stop),
    );
    if let Some(rx) = trigger_rx {
        driver = driver.with_trigger(rx);
    }
    staged(&ui, "Opening video source", || driver.open_source())?;

    let live_view = staged(&ui, "Starting live view", || {
        LiveViewServer::new(cfg.stream.clone(), Arc::clone(&state)).spawn()
    })?;

    log::info!(
        "inspectord running: mode={} thresholds={}%/{}% source={}",
        cfg.mode.inference_mode().name(),
        thresholds.minor_percent(),
        thresholds.severe_percent(),
        cfg.source.url
    );
    let result = driver.run();

    if let Some(link) = mqtt {
        link.shutdown();
    }
    if let Err(err) = live_view.stop() {
        log::warn!("live view shutdown: {:#}", err);
    }
    // Give detached sink deliveries a moment to finish.
    std::thread::sleep(Duration::from_millis(200));

    let stats = result?;
    log::info!(
        "inspectord stopped after {} report(s)",
        stats.reports.load(Ordering::Relaxed)
    );
    Ok(())
}

fn build_registry(cfg: &InspectorConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());

    #[cfg(feature = "backend-tract")]
    if let (Some(path), Some(class_names)) =
        (&cfg.detector.model_path, cfg.detector.class_table())
    {
        registry.register(fruit_inspector::detect::OnnxSegBackend::new(
            path,
            class_names,
            cfg.detector.input_width,
            cfg.detector.input_height,
        )?);
    }

    if cfg.detector.backend == "onnx" && registry.get("onnx").is_none() {
        return Err(anyhow!(
            "detector backend 'onnx' needs a build with the backend-tract feature"
        ));
    }
    Ok(registry)
}

fn staged<T>(ui: &Ui, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let stage = ui.stage(name);
    match f() {
        Ok(value) => Ok(value),
        Err(err) => {
            stage.fail(&format!("{:#}", err));
            Err(err)
        }
    }
}
