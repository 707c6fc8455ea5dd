mod common;

use common::{engine_with, Gate, ScriptedMigration};
use migration_engine::{
    EngineError, ExecutionStatus, ExecutionStore, FailureKind, MigrationDirection,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_reverse_round_trip_keeps_forward_record() {
    let migration = Arc::new(ScriptedMigration::new("users", vec![3, 3]));
    let (engine, store) = engine_with(vec![migration.clone()]);

    let forward = engine.run("users").await.expect("Should run");
    let reversal = engine.reverse("users").await.expect("Should reverse");

    assert_ne!(reversal.id, forward.id);
    assert_eq!(reversal.status, ExecutionStatus::Reversed);
    assert_eq!(reversal.direction, MigrationDirection::Reverse);
    assert_eq!(reversal.reverses, Some(forward.id));
    assert_eq!(reversal.items_total, Some(6));
    assert_eq!(reversal.items_processed, 6);
    assert!(reversal.start_date.is_some());
    assert!(reversal.end_date.is_some());

    // The forward record is untouched
    assert_eq!(store.get(forward.id).await.unwrap(), forward);
    assert_eq!(engine.history("users").await.unwrap().len(), 2);
    assert_eq!(migration.reverse_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_nothing_to_reverse_without_completed_run() {
    let migration = Arc::new(ScriptedMigration::new("fresh", vec![1]));
    let (engine, _store) = engine_with(vec![migration.clone()]);

    let result = engine.reverse("fresh").await;
    assert!(matches!(result, Err(EngineError::NothingToReverse(ref id)) if id == "fresh"));
    assert!(engine.history("fresh").await.unwrap().is_empty());
    assert_eq!(migration.reverse_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_nothing_to_reverse_after_failed_run() {
    let migration = Arc::new(ScriptedMigration::new("broken", vec![1, 1]).failing_at(0));
    let (engine, _store) = engine_with(vec![migration]);

    engine.run("broken").await.expect_err("Run should fail");
    let result = engine.reverse("broken").await;
    assert!(matches!(result, Err(EngineError::NothingToReverse(_))));
    assert_eq!(engine.history("broken").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reverse_twice_has_nothing_left() {
    let migration = Arc::new(ScriptedMigration::new("twice", vec![2]));
    let (engine, _store) = engine_with(vec![migration]);

    engine.run("twice").await.unwrap();
    engine.reverse("twice").await.unwrap();

    let result = engine.reverse("twice").await;
    assert!(matches!(result, Err(EngineError::NothingToReverse(_))));
    assert_eq!(engine.history("twice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_forward_only_migration_cannot_be_reversed() {
    let migration = Arc::new(ScriptedMigration::new("one-way", vec![1]).forward_only());
    let (engine, _store) = engine_with(vec![migration.clone()]);

    engine.run("one-way").await.unwrap();
    let result = engine.reverse("one-way").await;

    assert!(matches!(result, Err(EngineError::UnsupportedOperation(ref id)) if id == "one-way"));
    assert_eq!(migration.reverse_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.history("one-way").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_reversal_leaves_forward_completed() {
    let migration = Arc::new(ScriptedMigration::new("orders", vec![2, 2, 2]).reverse_failing_at(1));
    let (engine, store) = engine_with(vec![migration.clone()]);

    let forward = engine.run("orders").await.unwrap();
    let err = engine.reverse("orders").await.expect_err("Reversal should fail");

    let failed = match err {
        EngineError::BatchExecution { record, .. } => *record,
        other => panic!("Expected BatchExecution, got {:?}", other),
    };
    assert_eq!(failed.status, ExecutionStatus::ReversalFailed);
    assert_eq!(failed.items_processed, 2);
    assert_eq!(
        failed.failure.as_ref().map(|f| f.kind),
        Some(FailureKind::BatchError)
    );
    assert!(failed.end_date.is_some());
    assert_eq!(
        store.get(forward.id).await.unwrap().status,
        ExecutionStatus::Completed
    );

    // A later attempt targets the same forward record with a new reverse record
    let retried = engine.reverse("orders").await.expect("Retry should reverse");
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.reverses, Some(forward.id));
    assert_eq!(retried.status, ExecutionStatus::Reversed);
    assert_eq!(engine.history("orders").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_run_after_reversal_creates_new_forward_record() {
    let migration = Arc::new(ScriptedMigration::new("again", vec![1, 2]));
    let (engine, _store) = engine_with(vec![migration.clone()]);

    let first = engine.run("again").await.unwrap();
    engine.reverse("again").await.unwrap();
    let second = engine.run("again").await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(second.items_processed, 3);

    // The newest completion is the next reversal target
    let reversal = engine.reverse("again").await.unwrap();
    assert_eq!(reversal.reverses, Some(second.id));
}

#[tokio::test]
async fn test_reverse_rejected_while_forward_running() {
    let gate = Gate::new();
    let migration = Arc::new(ScriptedMigration::new("busy", vec![1, 1]).gated_at(0, gate.clone()));
    let (engine, _store) = engine_with(vec![migration.clone()]);
    let engine = Arc::new(engine);

    let run = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run("busy").await }
    });
    gate.entered.notified().await;

    let result = engine.reverse("busy").await;
    assert!(matches!(result, Err(EngineError::AlreadyRunning(ref id)) if id == "busy"));

    gate.release.notify_one();
    run.await.unwrap().expect("Forward run should complete");
    assert_eq!(migration.reverse_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_interrupted_forward_blocks_reversal() {
    let gate = Gate::new();
    let migration = Arc::new(ScriptedMigration::new("crashy", vec![1, 1]).gated_at(1, gate.clone()));
    let (engine, _store) = engine_with(vec![migration]);
    let engine = Arc::new(engine);

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run("crashy").await }
    });
    gate.entered.notified().await;
    handle.abort();
    let _ = handle.await;

    let result = engine.reverse("crashy").await;
    assert!(matches!(
        result,
        Err(EngineError::Interrupted { direction: MigrationDirection::Forward, .. })
    ));

    // Resuming the forward run clears the way
    engine.run("crashy").await.expect("Resume should complete");
    engine.reverse("crashy").await.expect("Reverse should now succeed");
}
