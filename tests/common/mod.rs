#![allow(dead_code)]

// Shared test support: canned device facts, scripted executor/probe mocks,
// and polling helpers. The mocks drive the state machine with synthetic
// event sequences so tests control time instead of real I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use veriwipe::decision::Technique;
use veriwipe::operation::{
    CancelSignal, MethodExecutor, OperationHandle, OperationRegistry, OperationSnapshot,
    ProbeReport, ProgressEvent, VerificationProbe,
};
use veriwipe::{
    DeviceFacts, MediaType, OperatorIdentity, PolicyAnswers, Sensitivity, Transport,
};

pub const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/rsa2048_pkcs8.der");
pub const OTHER_SIGNING_KEY: &[u8] = include_bytes!("../fixtures/rsa2048_other_pkcs8.der");

// ==================== CANNED DATA ====================

pub fn flash_facts(path: &str) -> DeviceFacts {
    DeviceFacts {
        device_path: path.to_string(),
        manufacturer: "Samsung".to_string(),
        model: "Samsung SSD 980 PRO".to_string(),
        serial_number: "S4EWNX0N123456".to_string(),
        size_bytes: 1_000_204_886_016,
        transport: Transport::Nvme,
        media_type: MediaType::Flash,
        is_encrypted: false,
        encryption_always_on: false,
    }
}

pub fn magnetic_facts(path: &str) -> DeviceFacts {
    DeviceFacts {
        device_path: path.to_string(),
        manufacturer: "Seagate".to_string(),
        model: "Seagate BarraCuda".to_string(),
        serial_number: "ZN1A2B3C".to_string(),
        size_bytes: 4_000_787_030_016,
        transport: Transport::Ata,
        media_type: MediaType::Magnetic,
        is_encrypted: false,
        encryption_always_on: false,
    }
}

pub fn answers(reused: bool, sensitivity: Sensitivity, leaves: bool) -> PolicyAnswers {
    PolicyAnswers {
        will_be_reused: reused,
        sensitivity,
        leaves_physical_control: leaves,
    }
}

pub fn operator() -> OperatorIdentity {
    OperatorIdentity {
        name: "Jordan Reyes".to_string(),
        title: "IT Security Specialist".to_string(),
    }
}

// ==================== MOCK EXECUTORS ====================

/// Replays a fixed event sequence, optionally pausing between events.
/// Stops early (dropping the stream without a terminal event) once the
/// cancel signal is raised, like a well-behaved executor.
pub struct ScriptedExecutor {
    events: Vec<ProgressEvent>,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new(events: Vec<ProgressEvent>) -> Self {
        Self {
            events,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(events: Vec<ProgressEvent>, delay: Duration) -> Self {
        Self { events, delay }
    }

    /// A clean three-step run over `total` bytes ending in `Done`.
    pub fn quick_success(total: u64) -> Self {
        Self::new(vec![
            ProgressEvent::Progress {
                pass_index: 0,
                bytes_written: total / 4,
                total_bytes: total,
            },
            ProgressEvent::Progress {
                pass_index: 0,
                bytes_written: total / 2,
                total_bytes: total,
            },
            ProgressEvent::Progress {
                pass_index: 0,
                bytes_written: total,
                total_bytes: total,
            },
            ProgressEvent::Done,
        ])
    }
}

impl MethodExecutor for ScriptedExecutor {
    fn execute(
        &self,
        _device_path: &str,
        _technique: Technique,
        cancel: CancelSignal,
    ) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(16);
        let events = self.events.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            for event in events {
                if cancel.is_cancelled() {
                    return;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        rx
    }
}

/// Emits one progress event, then idles until cancelled. Used to hold an
/// operation in `Running` for conflict and cancellation tests.
pub struct HangingExecutor {
    pub saw_cancel: Arc<AtomicBool>,
}

impl HangingExecutor {
    pub fn new() -> Self {
        Self {
            saw_cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MethodExecutor for HangingExecutor {
    fn execute(
        &self,
        _device_path: &str,
        _technique: Technique,
        cancel: CancelSignal,
    ) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(16);
        let saw_cancel = Arc::clone(&self.saw_cancel);
        tokio::spawn(async move {
            let _ = tx
                .send(ProgressEvent::Progress {
                    pass_index: 0,
                    bytes_written: 512,
                    total_bytes: 4096,
                })
                .await;
            loop {
                if cancel.is_cancelled() {
                    saw_cancel.store(true, Ordering::SeqCst);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        rx
    }
}

/// Panics if the state machine ever dispatches it. Proves that guidance-only
/// decisions never reach an executor.
pub struct PanicExecutor;

impl MethodExecutor for PanicExecutor {
    fn execute(
        &self,
        device_path: &str,
        _technique: Technique,
        _cancel: CancelSignal,
    ) -> mpsc::Receiver<ProgressEvent> {
        panic!("executor dispatched for {device_path}; guidance-only decisions must not execute");
    }
}

// ==================== MOCK PROBES ====================

/// Returns a fixed report, optionally after a pause (to hold an operation
/// in `Verifying`).
pub struct StaticProbe {
    report: ProbeReport,
    delay: Duration,
}

impl StaticProbe {
    pub fn passing() -> Self {
        Self {
            report: ProbeReport {
                passed: true,
                details: vec!["completion check passed".to_string()],
            },
            delay: Duration::ZERO,
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            report: ProbeReport {
                passed: false,
                details: vec![detail.to_string()],
            },
            delay: Duration::ZERO,
        }
    }

    pub fn passing_after(delay: Duration) -> Self {
        Self {
            report: ProbeReport {
                passed: true,
                details: vec!["completion check passed".to_string()],
            },
            delay,
        }
    }
}

impl VerificationProbe for StaticProbe {
    fn check(&self, _device_path: &str, _technique: Technique) -> oneshot::Receiver<ProbeReport> {
        let (tx, rx) = oneshot::channel();
        let report = self.report.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(report);
        });
        rx
    }
}

// ==================== POLLING HELPERS ====================

/// Poll until the operation reaches a terminal state, or panic after ~5s.
pub async fn wait_terminal(
    registry: &OperationRegistry,
    handle: &OperationHandle,
) -> OperationSnapshot {
    for _ in 0..500 {
        let snapshot = registry.poll(handle);
        if snapshot.state.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation never reached a terminal state");
}

/// Poll until `predicate` holds, or panic after ~5s.
pub async fn wait_until(
    registry: &OperationRegistry,
    handle: &OperationHandle,
    predicate: impl Fn(&OperationSnapshot) -> bool,
) -> OperationSnapshot {
    for _ in 0..500 {
        let snapshot = registry.poll(handle);
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}
