//! Latest frame and inference result, shared across threads.
//!
//! The pipeline driver is the single writer. Readers (live view, trigger worker)
//! clone an `Arc<FrameState>` under a short lock; a published state is never mutated,
//! so every reader sees a consistent frame/instances/annotation triple.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use crate::extract::DetectionInstance;
use crate::frame::Frame;
use crate::report::InspectionReport;

#[derive(Debug)]
pub struct FrameState {
    /// Monotonic publish counter, starting at 1.
    pub sequence: u64,
    pub captured_at: SystemTime,
    pub raw_frame: Frame,
    pub instances: Vec<DetectionInstance>,
    pub annotated_frame: Frame,
}

#[derive(Default)]
struct Slot {
    sequence: u64,
    latest: Option<Arc<FrameState>>,
}

#[derive(Default)]
pub struct SharedInference {
    slot: Mutex<Slot>,
    published: Condvar,
    report: Mutex<Option<Arc<InspectionReport>>>,
}

impl SharedInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current state. Returns the published state.
    pub fn publish(
        &self,
        raw_frame: Frame,
        instances: Vec<DetectionInstance>,
        annotated_frame: Frame,
    ) -> Arc<FrameState> {
        let mut slot = lock(&self.slot);
        slot.sequence += 1;
        let state = Arc::new(FrameState {
            sequence: slot.sequence,
            captured_at: raw_frame.captured_at,
            raw_frame,
            instances,
            annotated_frame,
        });
        slot.latest = Some(Arc::clone(&state));
        drop(slot);
        self.published.notify_all();
        state
    }

    /// Latest state, or `None` before the first publish.
    pub fn snapshot(&self) -> Option<Arc<FrameState>> {
        lock(&self.slot).latest.clone()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.slot).latest.is_some()
    }

    /// Sequence of the latest state; 0 before the first publish.
    pub fn sequence(&self) -> u64 {
        lock(&self.slot).sequence
    }

    /// Block until a state newer than `after_sequence` exists or `timeout` elapses.
    pub fn wait_for_newer(&self, after_sequence: u64, timeout: Duration) -> Option<Arc<FrameState>> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.slot);
        loop {
            if let Some(state) = slot.latest.as_ref().filter(|s| s.sequence > after_sequence) {
                return Some(Arc::clone(state));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            slot = match self.published.wait_timeout(slot, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn set_latest_report(&self, report: Arc<InspectionReport>) {
        *lock(&self.report) = Some(report);
    }

    pub fn latest_report(&self) -> Option<Arc<InspectionReport>> {
        lock(&self.report).clone()
    }
}

/// Critical sections only swap or clone an `Arc`, so a poisoned lock still holds a
/// consistent value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
