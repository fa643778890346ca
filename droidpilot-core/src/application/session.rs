//! Per-task ownership of the device handle, the transcript, and the run
//! budgets. One live session per device; contention is rejected at open,
//! never queued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::device::DeviceDriver;
use crate::config::Limits;
use crate::domain::{Transcript, TranscriptEntry, TranscriptEvent};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device is busy with another session")]
    DeviceBusy,
}

/// Exclusive-ownership token for one device handle. Sessions hold the lease
/// for their whole lifetime; a second `open` against the same gate fails
/// immediately with [`SessionError::DeviceBusy`].
#[derive(Clone, Default)]
pub struct DeviceGate {
    inner: Arc<Mutex<()>>,
}

impl DeviceGate {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cooperative cancellation. Observed by the agent loop at state-transition
/// boundaries only; an in-flight tool call is never interrupted.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct SessionContext {
    id: String,
    driver: Arc<dyn DeviceDriver>,
    _lease: OwnedMutexGuard<()>,
    transcript: Transcript,
    iterations: u32,
    started: Instant,
    limits: Limits,
    events: Option<UnboundedSender<TranscriptEntry>>,
    cancel: CancelHandle,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("iterations", &self.iterations)
            .field("started", &self.started)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Acquire the device exclusively. The lease is released when the
    /// session is closed or dropped, on every exit path.
    pub fn open(
        driver: Arc<dyn DeviceDriver>,
        gate: &DeviceGate,
        limits: Limits,
    ) -> Result<Self, SessionError> {
        let lease = gate
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| SessionError::DeviceBusy)?;
        let id = Uuid::new_v4().to_string();
        info!(
            session = id.as_str(),
            serial = driver.serial().unwrap_or("default"),
            "Device session opened"
        );
        Ok(Self {
            id,
            driver,
            _lease: lease,
            transcript: Transcript::new(),
            iterations: 0,
            started: Instant::now(),
            limits,
            events: None,
            cancel: CancelHandle::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn driver(&self) -> Arc<dyn DeviceDriver> {
        self.driver.clone()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Progress events mirror the transcript; the sink receives a clone of
    /// every entry as it is appended.
    pub fn set_event_sink(&mut self, sink: UnboundedSender<TranscriptEntry>) {
        self.events = Some(sink);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn record(&mut self, event: TranscriptEvent) -> TranscriptEntry {
        let entry = self.transcript.push(event);
        if let Some(sink) = &self.events {
            let _ = sink.send(entry.clone());
        }
        entry
    }

    /// Count one Planning -> Executing pass against the budget.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iterations += 1;
        debug!(
            session = self.id.as_str(),
            iteration = self.iterations,
            "Starting iteration"
        );
        self.iterations
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Release the device and hand the transcript back for persistence.
    pub fn close(self) -> Transcript {
        info!(
            session = self.id.as_str(),
            entries = self.transcript.len(),
            iterations = self.iterations,
            "Device session closed"
        );
        self.transcript
    }
}
