// Operation state machine lifecycle tests, driven entirely by scripted
// executor/probe mocks.

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use veriwipe::decision::{Decision, Method, Technique};
use veriwipe::operation::{OperationState, ProgressEvent};
use veriwipe::{decide, CoreError, OperationRegistry, Sensitivity, VerificationStatus};

fn purge_decision() -> Decision {
    Decision {
        method: Method::Purge,
        technique: Technique::SinglePassOverwrite,
        warnings: Vec::new(),
    }
}

#[tokio::test]
async fn destroy_completes_immediately_without_dispatching_executor() {
    let facts = magnetic_facts("/dev/mock-destroy");
    let decision = decide(&facts, &answers(false, Sensitivity::High, true)).unwrap();
    assert_eq!(decision.method, Method::Destroy);

    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &decision,
            Arc::new(PanicExecutor),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let snapshot = registry.poll(&handle);
    assert_eq!(snapshot.state, OperationState::Completed);
    assert_eq!(snapshot.verification_status, VerificationStatus::Passed);
    assert_eq!(
        snapshot.verification_details,
        vec!["guidance-only, no executable action".to_string()]
    );
    assert_eq!(snapshot.total_passes, 0);
    assert!(snapshot.completed_at.is_some());
}

#[tokio::test]
async fn successful_run_completes_with_passed_verification() {
    let facts = flash_facts("/dev/mock-ok");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::quick_success(4096)),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let snapshot = wait_terminal(&registry, &handle).await;
    assert_eq!(snapshot.state, OperationState::Completed);
    assert_eq!(snapshot.verification_status, VerificationStatus::Passed);
    assert_eq!(snapshot.progress_percent, 100.0);
    assert_eq!(snapshot.current_pass, 1);
    assert_eq!(snapshot.total_passes, 1);
    assert!(snapshot.error_detail.is_none());
    assert_eq!(
        snapshot.verification_details,
        vec!["completion check passed".to_string()]
    );
}

#[tokio::test]
async fn executor_error_fails_with_detail() {
    let facts = flash_facts("/dev/mock-err");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::new(vec![
                ProgressEvent::Progress {
                    pass_index: 0,
                    bytes_written: 1024,
                    total_bytes: 4096,
                },
                ProgressEvent::Error("write failed: Input/output error".to_string()),
            ])),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let snapshot = wait_terminal(&registry, &handle).await;
    assert_eq!(snapshot.state, OperationState::Failed);
    assert!(snapshot
        .error_detail
        .as_deref()
        .unwrap()
        .contains("write failed"));
    // Verification never ran.
    assert_eq!(snapshot.verification_status, VerificationStatus::Pending);
}

#[tokio::test]
async fn verification_failure_is_never_treated_as_success() {
    let facts = flash_facts("/dev/mock-badverify");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::quick_success(4096)),
            Arc::new(StaticProbe::failing("non-zero byte at offset 2048")),
        )
        .unwrap();

    let snapshot = wait_terminal(&registry, &handle).await;
    assert_eq!(snapshot.state, OperationState::Failed);
    assert_eq!(snapshot.verification_status, VerificationStatus::Failed);
    assert!(snapshot
        .error_detail
        .as_deref()
        .unwrap()
        .contains("non-zero byte"));
}

#[tokio::test]
async fn second_start_on_active_device_conflicts() {
    let facts = flash_facts("/dev/mock-conflict");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(HangingExecutor::new()),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let err = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(HangingExecutor::new()),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert!(err.to_string().contains("/dev/mock-conflict"));

    // A different device path is unaffected.
    registry
        .start(
            &flash_facts("/dev/mock-other"),
            &purge_decision(),
            Arc::new(HangingExecutor::new()),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    // Once terminal, the path can be started again.
    registry.cancel(&handle);
    wait_terminal(&registry, &handle).await;
    registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(HangingExecutor::new()),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_yield_exactly_one_running_operation() {
    let facts = flash_facts("/dev/mock-race");
    let registry = Arc::new(OperationRegistry::new());

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let registry = Arc::clone(&registry);
        let facts = facts.clone();
        tasks.push(tokio::spawn(async move {
            registry.start(
                &facts,
                &purge_decision(),
                Arc::new(HangingExecutor::new()),
                Arc::new(StaticProbe::passing()),
            )
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(CoreError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1, "exactly one start must win");
    assert_eq!(conflicts, 1, "the loser must see a conflict");
}

#[tokio::test]
async fn cancel_stops_a_running_operation_cooperatively() {
    let facts = flash_facts("/dev/mock-cancel");
    let registry = OperationRegistry::new();
    let executor = Arc::new(HangingExecutor::new());
    let saw_cancel = Arc::clone(&executor.saw_cancel);

    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            executor,
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    // Let it report some progress first.
    let running = wait_until(&registry, &handle, |s| s.progress_percent > 0.0).await;
    assert_eq!(running.state, OperationState::Running);
    assert!(running.progress_percent < 100.0);

    registry.cancel(&handle);
    let snapshot = wait_terminal(&registry, &handle).await;
    assert_eq!(snapshot.state, OperationState::Cancelled);
    // Partial progress is retained for audit.
    assert!(snapshot.progress_percent > 0.0);

    // The executor observed the signal and stopped.
    for _ in 0..100 {
        if saw_cancel.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(saw_cancel.load(Ordering::SeqCst), "executor never saw the cancel signal");
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let facts = flash_facts("/dev/mock-cancel-late");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::quick_success(4096)),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let completed = wait_terminal(&registry, &handle).await;
    assert_eq!(completed.state, OperationState::Completed);

    registry.cancel(&handle);
    let after = registry.poll(&handle);
    assert_eq!(after.state, OperationState::Completed, "terminal states are absorbing");
    assert_eq!(after, completed);
}

#[tokio::test]
async fn cancel_during_verification_wins_over_slow_probe() {
    let facts = flash_facts("/dev/mock-cancel-verify");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::quick_success(4096)),
            Arc::new(StaticProbe::passing_after(std::time::Duration::from_secs(2))),
        )
        .unwrap();

    let verifying =
        wait_until(&registry, &handle, |s| s.state == OperationState::Verifying).await;
    assert_eq!(verifying.verification_status, VerificationStatus::Pending);

    registry.cancel(&handle);
    let snapshot = wait_terminal(&registry, &handle).await;
    assert_eq!(snapshot.state, OperationState::Cancelled);

    // The probe's late "passed" report must not flip the terminal state.
    tokio::time::sleep(std::time::Duration::from_millis(2200)).await;
    assert_eq!(registry.poll(&handle).state, OperationState::Cancelled);
}

#[tokio::test]
async fn poll_is_idempotent_once_terminal() {
    let facts = flash_facts("/dev/mock-idempotent");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::quick_success(4096)),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let first = wait_terminal(&registry, &handle).await;
    let second = registry.poll(&handle);
    let third = registry.poll(&handle);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[tokio::test]
async fn release_rejects_active_operations_and_frees_terminal_ones() {
    let facts = flash_facts("/dev/mock-release");
    let registry = OperationRegistry::new();
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(HangingExecutor::new()),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let err = registry.release(&handle).unwrap_err();
    assert!(matches!(err, CoreError::IncompleteOperation(_)));

    registry.cancel(&handle);
    wait_terminal(&registry, &handle).await;
    registry.release(&handle).unwrap();

    // The freed slot accepts a new operation.
    registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(HangingExecutor::new()),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();
}

#[tokio::test]
async fn dropped_executor_stream_fails_the_operation() {
    let facts = flash_facts("/dev/mock-dropped");
    let registry = OperationRegistry::new();
    // Script ends without Done and without a cancel: an executor fault.
    let handle = registry
        .start(
            &facts,
            &purge_decision(),
            Arc::new(ScriptedExecutor::new(vec![ProgressEvent::Progress {
                pass_index: 0,
                bytes_written: 1024,
                total_bytes: 4096,
            }])),
            Arc::new(StaticProbe::passing()),
        )
        .unwrap();

    let snapshot = wait_terminal(&registry, &handle).await;
    assert_eq!(snapshot.state, OperationState::Failed);
    assert!(snapshot
        .error_detail
        .as_deref()
        .unwrap()
        .contains("without completion"));
}
