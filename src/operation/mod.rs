// Operation state machine.
//
// One registry owns every in-flight sanitization run, keyed by device path.
// The registry enforces the single-active-operation rule, folds executor
// progress into an atomically readable snapshot, and resolves the
// cancel-versus-completion race under one lock: terminal states are
// absorbing, and the losing transition is a no-op.

pub mod executor;
pub mod throughput;

pub use executor::{
    CancelSignal, FileOverwriteExecutor, MethodExecutor, ProbeReport, ProgressEvent,
    VerificationProbe, ZeroFillProbe,
};
pub use throughput::{ThroughputEma, DEFAULT_SMOOTHING};

use crate::decision::{Decision, Method, Technique};
use crate::{CoreError, CoreResult, DeviceFacts, VerificationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Idle,
    Running,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// Point-in-time view of one operation. `poll` returns a clone taken under
/// the state lock, so callers never observe partially updated progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub state: OperationState,
    pub current_pass: u32,
    pub total_passes: u32,
    pub progress_percent: f64,
    pub throughput_bytes_per_sec: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verification_status: VerificationStatus,
    pub verification_details: Vec<String>,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OperationConfig {
    /// Smoothing factor for the throughput moving average.
    pub throughput_smoothing: f64,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            throughput_smoothing: DEFAULT_SMOOTHING,
        }
    }
}

#[derive(Debug)]
struct OperationCell {
    device_path: String,
    snapshot: RwLock<OperationSnapshot>,
    cancel: CancelSignal,
}

impl OperationCell {
    /// Move to `to` if the current state is one of `allowed_from`. Terminal
    /// states absorb every later attempt, which is what makes the
    /// cancel/completion race deterministic.
    fn transition(&self, allowed_from: &[OperationState], to: OperationState) -> bool {
        let mut snap = self.snapshot.write().expect("operation state lock poisoned");
        if snap.state.is_terminal() || !allowed_from.contains(&snap.state) {
            return false;
        }
        snap.state = to;
        if to.is_terminal() {
            snap.completed_at = Some(Utc::now());
        }
        true
    }
}

/// Handle to one operation. Cloneable; all clones observe the same state.
#[derive(Clone, Debug)]
pub struct OperationHandle {
    cell: Arc<OperationCell>,
}

impl OperationHandle {
    pub fn device_path(&self) -> &str {
        &self.cell.device_path
    }

    /// Non-blocking atomic snapshot. Safe to call concurrently with
    /// `cancel` and executor progress; identical across calls once the
    /// operation is terminal.
    pub fn snapshot(&self) -> OperationSnapshot {
        self.cell
            .snapshot
            .read()
            .expect("operation state lock poisoned")
            .clone()
    }
}

/// Registry of in-flight operations, keyed by device path.
#[derive(Default)]
pub struct OperationRegistry {
    active: Mutex<HashMap<String, Arc<OperationCell>>>,
    config: OperationConfig,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OperationConfig) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Accept a device + decision and begin the run.
    ///
    /// Fails with [`CoreError::Conflict`] while another operation on the
    /// same device path is still Running or Verifying. Destroy decisions
    /// complete immediately: destruction is advisory, so no executor is
    /// dispatched and verification is recorded as guidance-only.
    ///
    /// Must be called from within a tokio runtime; the driver that consumes
    /// executor events runs as a spawned task.
    pub fn start(
        &self,
        facts: &DeviceFacts,
        decision: &Decision,
        executor: Arc<dyn MethodExecutor>,
        probe: Arc<dyn VerificationProbe>,
    ) -> CoreResult<OperationHandle> {
        let mut active = self.active.lock().expect("operation registry lock poisoned");

        if let Some(existing) = active.get(&facts.device_path) {
            let state = existing
                .snapshot
                .read()
                .expect("operation state lock poisoned")
                .state;
            if !state.is_terminal() {
                return Err(CoreError::Conflict(facts.device_path.clone()));
            }
        }

        let cell = Arc::new(OperationCell {
            device_path: facts.device_path.clone(),
            snapshot: RwLock::new(OperationSnapshot {
                state: OperationState::Idle,
                current_pass: 0,
                total_passes: decision.technique.pass_count(),
                progress_percent: 0.0,
                throughput_bytes_per_sec: 0.0,
                started_at: Utc::now(),
                completed_at: None,
                verification_status: VerificationStatus::Pending,
                verification_details: Vec::new(),
                error_detail: None,
            }),
            cancel: CancelSignal::new(),
        });
        active.insert(facts.device_path.clone(), Arc::clone(&cell));
        drop(active);

        if decision.method == Method::Destroy {
            info!(device = %facts.device_path, "destroy decision; recording guidance-only completion");
            let mut snap = cell.snapshot.write().expect("operation state lock poisoned");
            snap.state = OperationState::Completed;
            snap.progress_percent = 100.0;
            snap.completed_at = Some(Utc::now());
            snap.verification_status = VerificationStatus::Passed;
            snap.verification_details =
                vec!["guidance-only, no executable action".to_string()];
            drop(snap);
            return Ok(OperationHandle { cell });
        }

        cell.transition(&[OperationState::Idle], OperationState::Running);
        info!(
            device = %facts.device_path,
            technique = %decision.technique,
            "operation started"
        );

        let events = executor.execute(&facts.device_path, decision.technique, cell.cancel.clone());
        tokio::spawn(drive(
            Arc::clone(&cell),
            decision.technique,
            events,
            probe,
            self.config.throughput_smoothing,
        ));

        Ok(OperationHandle { cell })
    }

    /// Non-blocking snapshot of the operation's current state.
    pub fn poll(&self, handle: &OperationHandle) -> OperationSnapshot {
        handle.snapshot()
    }

    /// Request cooperative cancellation.
    ///
    /// Only Running/Verifying operations can be cancelled; a cancel racing
    /// natural completion loses cleanly and becomes a no-op.
    pub fn cancel(&self, handle: &OperationHandle) {
        let cancelled = handle.cell.transition(
            &[OperationState::Running, OperationState::Verifying],
            OperationState::Cancelled,
        );
        if cancelled {
            handle.cell.cancel.request();
            info!(device = %handle.device_path(), "operation cancelled");
        } else {
            debug!(
                device = %handle.device_path(),
                "cancel ignored; operation already terminal"
            );
        }
    }

    /// Free a finished operation's registry slot.
    ///
    /// The slot is only released once the operation is terminal (its
    /// certificate has been built, or the run was abandoned); releasing an
    /// active operation is an error.
    pub fn release(&self, handle: &OperationHandle) -> CoreResult<()> {
        if !handle.snapshot().state.is_terminal() {
            return Err(CoreError::IncompleteOperation(format!(
                "operation on {} is still active",
                handle.device_path()
            )));
        }
        let mut active = self.active.lock().expect("operation registry lock poisoned");
        if let Some(existing) = active.get(handle.device_path()) {
            if Arc::ptr_eq(existing, &handle.cell) {
                active.remove(handle.device_path());
            }
        }
        Ok(())
    }
}

/// Driver task: folds the executor's event stream into the snapshot, then
/// runs the verification probe. Executor completion is always observed
/// before verification begins.
async fn drive(
    cell: Arc<OperationCell>,
    technique: Technique,
    mut events: tokio::sync::mpsc::Receiver<ProgressEvent>,
    probe: Arc<dyn VerificationProbe>,
    smoothing: f64,
) {
    let mut ema = ThroughputEma::new(smoothing);
    let mut last_instant = Instant::now();
    let mut last_bytes = 0u64;
    let mut executor_done = false;

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Progress {
                pass_index,
                bytes_written,
                total_bytes,
            } => {
                let now = Instant::now();
                let delta_secs = now.duration_since(last_instant).as_secs_f64();
                let delta_bytes = bytes_written.saturating_sub(last_bytes);
                let rate = ema.update(delta_bytes, delta_secs);
                last_instant = now;
                last_bytes = bytes_written;

                let mut snap = cell.snapshot.write().expect("operation state lock poisoned");
                if snap.state.is_terminal() {
                    break;
                }
                snap.current_pass = pass_index + 1;
                let pass_fraction = if total_bytes > 0 {
                    bytes_written as f64 / total_bytes as f64
                } else {
                    0.0
                };
                let total_passes = snap.total_passes.max(1) as f64;
                snap.progress_percent =
                    ((pass_index as f64 + pass_fraction) / total_passes * 100.0).clamp(0.0, 100.0);
                snap.throughput_bytes_per_sec = rate;
            }
            ProgressEvent::Done => {
                executor_done = true;
                break;
            }
            ProgressEvent::Error(detail) => {
                fail(&cell, detail, None);
                return;
            }
        }
    }

    if !executor_done {
        // Stream ended without a terminal event: expected after a cancel
        // (the terminal state is already held), otherwise an executor fault.
        if cell.transition(&[OperationState::Running], OperationState::Failed) {
            let mut snap = cell.snapshot.write().expect("operation state lock poisoned");
            snap.error_detail = Some("executor stream ended without completion".to_string());
            warn!(device = %cell.device_path, "executor stream ended without completion");
        }
        return;
    }

    if !cell.transition(&[OperationState::Running], OperationState::Verifying) {
        // Lost the race to a cancel.
        return;
    }
    debug!(device = %cell.device_path, "executor complete; verifying");

    match probe.check(&cell.device_path, technique).await {
        Ok(report) if report.passed => {
            if cell.transition(&[OperationState::Verifying], OperationState::Completed) {
                let mut snap = cell.snapshot.write().expect("operation state lock poisoned");
                snap.progress_percent = 100.0;
                snap.verification_status = VerificationStatus::Passed;
                snap.verification_details = report.details;
                info!(device = %cell.device_path, "operation completed, verification passed");
            }
        }
        Ok(report) => {
            fail(
                &cell,
                report
                    .details
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "verification failed".to_string()),
                Some(report.details),
            );
        }
        Err(_) => {
            fail(&cell, "verification probe dropped without reporting".to_string(), None);
        }
    }
}

/// Terminal failure transition. Verification failure is never treated as
/// success; the probe's message lands in `error_detail`.
fn fail(cell: &Arc<OperationCell>, detail: String, probe_details: Option<Vec<String>>) {
    let from_verifying = {
        let snap = cell.snapshot.read().expect("operation state lock poisoned");
        snap.state == OperationState::Verifying
    };
    if cell.transition(
        &[OperationState::Running, OperationState::Verifying],
        OperationState::Failed,
    ) {
        let mut snap = cell.snapshot.write().expect("operation state lock poisoned");
        snap.error_detail = Some(detail.clone());
        if from_verifying {
            snap.verification_status = VerificationStatus::Failed;
        }
        if let Some(details) = probe_details {
            snap.verification_details = details;
        }
        warn!(device = %cell.device_path, error = %detail, "operation failed");
    }
}
