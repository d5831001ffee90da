//! Trigger tokens and the triggered-classification worker.
//!
//! Trigger sources (the MQTT subscriber, tests) only post a token; the worker does
//! the settling delay and classification on its own thread. The channel holds at
//! most one pending token, so a burst of triggers during a run collapses into one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::pipeline::{sleep_unless_stopped, DriverStats, Reporter};
use crate::state::SharedInference;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct TriggerSender {
    tx: SyncSender<()>,
}

impl TriggerSender {
    /// Post a token. Returns false when one is already pending (coalesced) or the
    /// worker is gone.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("trigger coalesced with a pending one");
                false
            }
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

pub struct TriggerReceiver {
    rx: Receiver<()>,
}

pub fn channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (TriggerSender { tx }, TriggerReceiver { rx })
}

/// True when `payload` is the trigger token, ignoring surrounding whitespace and case.
pub fn matches_token(payload: &[u8], token: &str) -> bool {
    std::str::from_utf8(payload)
        .map(|text| text.trim().eq_ignore_ascii_case(token.trim()))
        .unwrap_or(false)
}

pub struct TriggerWorker {
    receiver: TriggerReceiver,
    reporter: Arc<Reporter>,
    state: Arc<SharedInference>,
    settling_delay: Duration,
    stop: Arc<AtomicBool>,
    stats: Arc<DriverStats>,
}

impl TriggerWorker {
    pub fn new(
        receiver: TriggerReceiver,
        reporter: Arc<Reporter>,
        state: Arc<SharedInference>,
        settling_delay: Duration,
        stop: Arc<AtomicBool>,
        stats: Arc<DriverStats>,
    ) -> Self {
        Self {
            receiver,
            reporter,
            state,
            settling_delay,
            stop,
            stats,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("trigger-worker".to_string())
            .spawn(move || self.run())
            .context("spawn trigger worker")
    }

    fn run(self) {
        while !self.stop.load(Ordering::SeqCst) {
            match self.receiver.rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) => self.handle_trigger(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("all trigger senders dropped");
                    sleep_unless_stopped(POLL_INTERVAL, &self.stop);
                }
            }
        }
    }

    fn handle_trigger(&self) {
        info!("trigger received; sampling in {:?}", self.settling_delay);
        sleep_unless_stopped(self.settling_delay, &self.stop);
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        let Some(state) = self.state.snapshot() else {
            info!("trigger ignored: no inference result yet");
            return;
        };
        self.reporter.report_state(&state);
        self.stats.reports.fetch_add(1, Ordering::Relaxed);
    }
}
