// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition dispatcher — runs every configured backend on every line.
//
// Calls fan out over (line x backend) pairs, bounded by a semaphore sized
// from `DispatchConfig::max_workers`. Each call runs on the blocking pool
// because engines are CPU or subprocess bound. A failing, panicking, or
// timed-out call is recorded against its own pair and never affects the
// others. Results always come back in line order, then configured backend
// order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, instrument, warn};
use zeilwerk_core::config::DispatchConfig;
use zeilwerk_core::error::ZeilwerkError;
use zeilwerk_core::types::{LineRecognition, LineStatus, Outcome};
use zeilwerk_segment::LineImage;

use crate::backend::SharedBackend;

/// Reason recorded for lines skipped after cancellation.
pub const CANCELLED: &str = "cancelled";

/// Stops a running dispatch from starting further lines.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fans recognition calls out across backends and lines.
pub struct Dispatcher {
    /// Backends in configured order.
    backends: Vec<SharedBackend>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    cancel: CancelHandle,
}

/// One scheduled call, tagged with the backend it belongs to.
type PendingCall = (String, JoinHandle<Outcome>);

impl Dispatcher {
    pub fn new(backends: Vec<SharedBackend>, config: &DispatchConfig) -> Self {
        let workers = config.max_workers.max(1);
        debug!(workers, timeout_ms = ?config.timeout_ms, "Dispatcher created");
        Self {
            backends,
            permits: Arc::new(Semaphore::new(workers)),
            timeout: config.timeout(),
            cancel: CancelHandle::default(),
        }
    }

    /// Share cancellation with a handle created elsewhere, such as a
    /// Ctrl-C listener started before the dispatcher exists.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ids of the loaded backends, in configured order.
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    /// A handle that can cancel this dispatcher from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stop starting calls for lines that have not started yet.
    ///
    /// In-flight calls finish; skipped lines are recorded as failed with
    /// reason [`CANCELLED`].
    pub fn cancel(&self) {
        info!("Recognition cancelled");
        self.cancel.cancel();
    }

    /// Run the named backends on one line, in the order given.
    ///
    /// An id that matches no loaded backend is recorded as a failure.
    #[instrument(skip(self, line), fields(line = line.index()))]
    pub async fn recognize(
        &self,
        line: Arc<LineImage>,
        backend_ids: &[String],
    ) -> LineRecognition {
        let selected: Vec<Result<SharedBackend, String>> = backend_ids
            .iter()
            .map(|id| {
                self.backends
                    .iter()
                    .find(|b| b.id() == id)
                    .cloned()
                    .ok_or_else(|| id.clone())
            })
            .collect();

        let calls = self.schedule_line(Arc::clone(&line), selected);
        collect_line(&line, calls).await
    }

    /// Run every backend on every line.
    ///
    /// Returns one [`LineRecognition`] per input line, sorted by line index,
    /// each holding one result per backend in configured order.
    #[instrument(skip_all, fields(lines = lines.len(), backends = self.backends.len()))]
    pub async fn recognize_all(&self, lines: Vec<LineImage>) -> Vec<LineRecognition> {
        let mut lines: Vec<Arc<LineImage>> = lines.into_iter().map(Arc::new).collect();
        lines.sort_by_key(|line| line.index());
        info!(
            lines = lines.len(),
            backends = self.backends.len(),
            "Starting recognition"
        );

        // Schedule everything first so lines run concurrently, then collect
        // in order.
        let scheduled: Vec<(Arc<LineImage>, Vec<PendingCall>)> = lines
            .into_iter()
            .map(|line| {
                let selected = self.backends.iter().cloned().map(Ok).collect();
                let calls = self.schedule_line(Arc::clone(&line), selected);
                (line, calls)
            })
            .collect();

        let mut results = Vec::with_capacity(scheduled.len());
        for (line, calls) in scheduled {
            results.push(collect_line(&line, calls).await);
        }

        let failed = results
            .iter()
            .filter(|r| r.status() == LineStatus::Failed)
            .count();
        info!(lines = results.len(), failed, "Recognition finished");
        results
    }

    /// Spawn one task per backend for `line`. `Err(id)` marks an unknown id.
    fn schedule_line(
        &self,
        line: Arc<LineImage>,
        backends: Vec<Result<SharedBackend, String>>,
    ) -> Vec<PendingCall> {
        // Set once the first call for this line acquires a permit; later
        // cancellation no longer skips the line.
        let started = Arc::new(AtomicBool::new(false));

        backends
            .into_iter()
            .map(|backend| match backend {
                Ok(backend) => {
                    let id = backend.id().to_string();
                    let handle = tokio::spawn(run_call(
                        backend,
                        Arc::clone(&line),
                        Arc::clone(&self.permits),
                        self.timeout,
                        self.cancel.clone(),
                        Arc::clone(&started),
                    ));
                    (id, handle)
                }
                Err(id) => {
                    let reason = format!("unknown backend {id}");
                    (id, tokio::spawn(async move { Outcome::Failed(reason) }))
                }
            })
            .collect()
    }
}

/// Await a line's calls in backend order and log partial or failed lines.
async fn collect_line(line: &LineImage, calls: Vec<PendingCall>) -> LineRecognition {
    let mut recognition = LineRecognition::new(line.id.clone());
    for (backend, handle) in calls {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed(join_failure(err)),
        };
        recognition.push(backend, outcome);
    }

    match recognition.status() {
        LineStatus::Complete => debug!(line = %line.label(), "Line recognized"),
        LineStatus::Partial => warn!(
            line = %line.label(),
            errors = ?recognition.errors(),
            "Partial result: some backends failed"
        ),
        LineStatus::Failed => warn!(
            line = %line.label(),
            errors = ?recognition.errors(),
            "No backend produced text"
        ),
    }
    recognition
}

/// One (line, backend) call: wait for a permit, honour cancellation, run the
/// backend on the blocking pool, and classify the result.
async fn run_call(
    backend: SharedBackend,
    line: Arc<LineImage>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    cancel: CancelHandle,
    started: Arc<AtomicBool>,
) -> Outcome {
    let permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return Outcome::Failed("dispatcher closed".into()),
    };
    if cancel.is_cancelled() && !started.load(Ordering::SeqCst) {
        return Outcome::Failed(CANCELLED.into());
    }
    started.store(true, Ordering::SeqCst);

    let id = backend.id().to_string();
    // The permit travels with the blocking call, so a timed-out call still
    // counts against the worker limit until it really returns.
    let call = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        backend.run(&line)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(backend = %id, timeout_ms = limit.as_millis() as u64, "Backend timed out");
                let err = ZeilwerkError::backend_unavailable(
                    &id,
                    format!("timed out after {} ms", limit.as_millis()),
                );
                return Outcome::Failed(err.to_string());
            }
        },
        None => call.await,
    };

    match joined {
        Ok(result) => Outcome::from(result),
        Err(err) => Outcome::Failed(join_failure(err)),
    }
}

/// Describe a task that panicked or was aborted.
fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        format!("backend panicked: {message}")
    } else {
        format!("backend task failed: {err}")
    }
}
