//! Fire-and-forget fan-out of inspection reports to result sinks.
//!
//! Every delivery runs as its own task; a slow or failing sink never delays the
//! pipeline or another sink. Each sink may have at most `max_in_flight` deliveries
//! outstanding; further reports for that sink are dropped and logged.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::report::InspectionReport;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// A best-effort consumer of inspection reports.
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, report: &InspectionReport) -> Result<()>;
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs delivery tasks.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: String, task: Task) -> Result<()>;
}

/// Detached, named OS thread per task.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, name: String, task: Task) -> Result<()> {
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(task)
            .map(|_| ())
            .with_context(|| format!("spawn thread {}", name))
    }
}

/// Runs tasks on the caller's thread. Used by tests and one-shot tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineSpawner;

impl TaskSpawner for InlineSpawner {
    fn spawn(&self, _name: String, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

/// Releases one in-flight slot when the delivery task ends, even by panic.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SinkSlot {
    sink: Arc<dyn ResultSink>,
    in_flight: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub started: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
}

pub struct Dispatcher {
    sinks: Vec<SinkSlot>,
    spawner: Arc<dyn TaskSpawner>,
    max_in_flight: usize,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            spawner: Arc::new(ThreadSpawner),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn ResultSink>) {
        self.sinks.push(SinkSlot {
            sink,
            in_flight: Arc::new(AtomicUsize::new(0)),
        });
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.sink.name().to_string()).collect()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Hand `report` to every sink. Returns how many deliveries were started.
    pub fn dispatch(&self, report: Arc<InspectionReport>) -> usize {
        let mut started = 0;
        for slot in &self.sinks {
            let name = slot.sink.name().to_string();
            let outstanding = slot.in_flight.fetch_add(1, Ordering::SeqCst);
            if outstanding >= self.max_in_flight {
                slot.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "sink {} has {} deliveries outstanding; dropping report {}",
                    name, outstanding, report.sequence
                );
                continue;
            }

            let sink = Arc::clone(&slot.sink);
            let in_flight = Arc::clone(&slot.in_flight);
            let stats = Arc::clone(&self.stats);
            let report = Arc::clone(&report);
            let task: Task = Box::new(move || {
                let _slot = InFlightGuard(in_flight);
                match sink.deliver(&report) {
                    Ok(()) => debug!("sink {} delivered report {}", sink.name(), report.sequence),
                    Err(err) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("sink {} failed: {:#}", sink.name(), err);
                    }
                }
            });

            match self.spawner.spawn(format!("sink-{}", name), task) {
                Ok(()) => {
                    started += 1;
                    self.stats.started.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    slot.in_flight.fetch_sub(1, Ordering::SeqCst);
                    warn!("could not start delivery to sink {}: {:#}", name, err);
                }
            }
        }
        started
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;
    use chrono::NaiveDateTime;

    use super::*;
    use crate::classify::Classification;

    fn report(sequence: u64) -> Arc<InspectionReport> {
        Arc::new(InspectionReport::from_classification(
            sequence,
            NaiveDateTime::default(),
            &Classification::default(),
        ))
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<u64>>,
    }

    impl ResultSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        fn deliver(&self, report: &InspectionReport) -> Result<()> {
            self.seen.lock().unwrap().push(report.sequence);
            Ok(())
        }
    }

    struct Failing;

    impl ResultSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn deliver(&self, _report: &InspectionReport) -> Result<()> {
            Err(anyhow!("broker unreachable"))
        }
    }

    #[derive(Default)]
    struct Panicking {
        calls: AtomicUsize,
    }

    impl ResultSink for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn deliver(&self, _report: &InspectionReport) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("sink bug");
        }
    }

    fn wait_idle(dispatcher: &Dispatcher) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while dispatcher.sinks[0].in_flight.load(Ordering::SeqCst) > 0 {
            assert!(std::time::Instant::now() < deadline, "delivery never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Blocks until the test releases it.
    struct Gate {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ResultSink for Gate {
        fn name(&self) -> &str {
            "gate"
        }
        fn deliver(&self, _report: &InspectionReport) -> Result<()> {
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    #[test]
    fn failing_sink_does_not_affect_others() {
        let recording = Arc::new(Recording::default());
        let mut dispatcher = Dispatcher::new().with_spawner(Arc::new(InlineSpawner));
        dispatcher.add_sink(Arc::new(Failing));
        dispatcher.add_sink(recording.clone());
        assert_eq!(dispatcher.dispatch(report(1)), 2);
        assert_eq!(dispatcher.dispatch(report(2)), 2);
        assert_eq!(*recording.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(dispatcher.stats().failed.load(Ordering::Relaxed), 2);
        assert_eq!(dispatcher.sink_names(), vec!["failing", "recording"]);
    }

    #[test]
    fn dispatch_returns_before_slow_sink_finishes() {
        let (tx, rx) = mpsc::channel();
        let mut dispatcher = Dispatcher::new().with_max_in_flight(2);
        dispatcher.add_sink(Arc::new(Gate {
            release: Mutex::new(rx),
        }));
        assert_eq!(dispatcher.dispatch(report(1)), 1);
        assert_eq!(dispatcher.dispatch(report(2)), 1);
        // both deliveries are parked on the gate
        assert_eq!(dispatcher.dispatch(report(3)), 0);
        assert_eq!(dispatcher.stats().dropped.load(Ordering::Relaxed), 1);
        tx.send(()).unwrap();
        tx.send(()).unwrap();
    }

    #[test]
    fn panicking_sink_releases_its_slot() {
        let sink = Arc::new(Panicking::default());
        let mut dispatcher = Dispatcher::new()
            .with_spawner(Arc::new(ThreadSpawner))
            .with_max_in_flight(1);
        dispatcher.add_sink(sink.clone());
        for seq in 1..=3 {
            assert_eq!(dispatcher.dispatch(report(seq)), 1);
            wait_idle(&dispatcher);
        }
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.stats().dropped.load(Ordering::Relaxed), 0);
    }
}
