mod common;

use common::{engine_over, Gate, ScriptedMigration};
use migration_engine::{
    Cursor, ExecutionPatch, ExecutionStatus, ExecutionStore, JsonFileExecutionStore,
    MigrationDirection, NewExecution, StoreError,
};
use std::sync::Arc;

fn create_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Should create temp dir")
}

#[tokio::test]
async fn test_records_survive_reopening_the_file() {
    let temp_dir = create_test_dir();
    let path = temp_dir.path().join("executions.json");

    let id = {
        let store = JsonFileExecutionStore::new(&path);
        let id = store.create(NewExecution::forward("m1")).await.unwrap();
        store
            .update(
                id,
                ExecutionPatch {
                    status: Some(ExecutionStatus::Running),
                    items_total: Some(10),
                    items_processed: Some(4),
                    cursor: Some(Cursor::from("row:4")),
                    failure: None,
                },
            )
            .await
            .unwrap();
        id
    };

    let reopened = JsonFileExecutionStore::new(&path);
    let record = reopened.get(id).await.unwrap();
    assert_eq!(record.migration_id, "m1");
    assert_eq!(record.direction, MigrationDirection::Forward);
    assert_eq!(record.status, ExecutionStatus::Running);
    assert_eq!(record.items_processed, 4);
    assert_eq!(record.items_total, Some(10));
    assert_eq!(record.cursor, Some(Cursor::from("row:4")));
    assert!(record.start_date.is_some());
}

#[tokio::test]
async fn test_find_latest_and_list_order() {
    let temp_dir = create_test_dir();
    let store = JsonFileExecutionStore::new(temp_dir.path().join("executions.json"));

    let first = store.create(NewExecution::forward("m1")).await.unwrap();
    store.create(NewExecution::forward("m2")).await.unwrap();
    let third = store.create(NewExecution::forward("m1")).await.unwrap();

    let listed: Vec<_> = store.list("m1").await.unwrap().iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![first, third]);

    let latest = store
        .find_latest("m1", ExecutionStatus::Pending)
        .await
        .unwrap()
        .expect("Should find pending record");
    assert_eq!(latest.id, third);
}

#[tokio::test]
async fn test_terminal_record_is_immutable_on_disk() {
    let temp_dir = create_test_dir();
    let store = JsonFileExecutionStore::new(temp_dir.path().join("executions.json"));
    let id = store.create(NewExecution::forward("m1")).await.unwrap();

    store
        .update(id, ExecutionPatch::transition(ExecutionStatus::Running))
        .await
        .unwrap();
    let completed = store
        .update(id, ExecutionPatch::transition(ExecutionStatus::Completed))
        .await
        .unwrap();

    let result = store
        .update(id, ExecutionPatch::transition(ExecutionStatus::Failed))
        .await;
    assert!(matches!(result, Err(StoreError::Transition(_))));
    assert_eq!(store.get(id).await.unwrap(), completed);
}

#[tokio::test]
async fn test_resume_after_process_restart() {
    let temp_dir = create_test_dir();
    let path = temp_dir.path().join("executions.json");

    // First "process": crashes during the second batch
    let gate = Gate::new();
    let crashed = Arc::new(ScriptedMigration::new("backfill", vec![5, 5, 5]).gated_at(1, gate.clone()));
    let engine = Arc::new(engine_over(
        vec![crashed],
        Arc::new(JsonFileExecutionStore::new(&path)),
    ));
    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run("backfill").await }
    });
    gate.entered.notified().await;
    handle.abort();
    let _ = handle.await;
    drop(engine);

    // Second "process": fresh store, guard and migration instance
    let migration = Arc::new(ScriptedMigration::new("backfill", vec![5, 5, 5]));
    let engine = engine_over(
        vec![migration.clone()],
        Arc::new(JsonFileExecutionStore::new(&path)),
    );

    let before = engine.status("backfill").await.unwrap().expect("Record persisted");
    assert_eq!(before.status, ExecutionStatus::Running);
    assert_eq!(before.items_processed, 5);

    let record = engine.run("backfill").await.expect("Should resume");
    assert_eq!(record.id, before.id);
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.items_processed, 15);
    assert_eq!(migration.forward_calls(), vec![1, 2]);
}
