//! Session lifecycle across restarts, and capture durability.

use lumina_db::Database;
use lumina_tracker::{BatchBuffer, LifecycleController, LifecycleState, NoopSensor, RecordOutcome};
use std::path::Path;
use std::sync::Arc;

const OWNER: &str = "a@x.com";

async fn open(path: &Path, batch_size: usize) -> (Database, LifecycleController) {
    let db = Database::new(path).await.unwrap();
    let buffer = Arc::new(BatchBuffer::new(db.clone(), OWNER, batch_size));
    let controller = LifecycleController::restore(db.clone(), buffer, Arc::new(NoopSensor::new()))
        .await
        .unwrap();
    (db, controller)
}

async fn open_sessions(db: &Database) -> usize {
    let sessions = db.list_sessions(OWNER).await.unwrap();
    sessions.iter().filter(|s| s.is_open()).count()
}

#[tokio::test]
async fn test_at_most_one_active_session_across_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lumina.db");

    // Each inner list is one process run that exits without stopping.
    let script: &[&[&str]] = &[
        &["start"],
        &["start", "start", "stop"],
        &["stop", "start"],
        &["start", "stop", "start"],
    ];

    for (run, steps) in script.iter().enumerate() {
        let (db, controller) = open(&path, 10).await;
        for step in *steps {
            match *step {
                "start" => {
                    controller.start(None).await.unwrap();
                }
                "stop" => {
                    controller.stop().await.unwrap();
                }
                _ => unreachable!(),
            }
            assert!(
                open_sessions(&db).await <= 1,
                "run {run}: more than one open session after {step}"
            );
        }
        db.close().await;
    }

    let (db, controller) = open(&path, 10).await;
    let state = controller.state().await;
    assert_eq!(state.session(), db.active_session(OWNER).await.unwrap());
    assert!(matches!(state, LifecycleState::Active(_)));
    assert_eq!(open_sessions(&db).await, 1);
}

#[tokio::test]
async fn test_abrupt_stop_loses_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lumina.db");
    let (db, controller) = open(&path, 10).await;

    let session = controller.start(None).await.unwrap();
    let values: Vec<u32> = (1..=23).collect();
    for v in &values {
        controller.buffer().record(*v).await.unwrap();
    }
    // Two batch flushes happened; three samples are still only in memory.
    assert_eq!(controller.buffer().len(), 3);

    controller.stop().await.unwrap();
    db.close().await;

    let db = Database::new(&path).await.unwrap();
    let stored: Vec<u32> = db
        .samples_for_session(session)
        .await
        .unwrap()
        .iter()
        .map(|s| s.value)
        .collect();
    assert_eq!(stored, values);
}

#[tokio::test]
async fn test_batch_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let (db, controller) = open(&tmp.path().join("lumina.db"), 10).await;
    controller.start(None).await.unwrap();

    let mut outcomes = Vec::new();
    for v in 0..10 {
        outcomes.push(controller.buffer().record(v).await.unwrap());
    }

    assert_eq!(outcomes.last(), Some(&RecordOutcome::Flushed(10)));
    assert!(controller.buffer().is_empty());
    let stored = db.unsynced_samples(OWNER, 50).await.unwrap();
    assert_eq!(stored.len(), 10);
    assert!(stored.iter().all(|s| !s.sync_state.is_synced()));
}

#[tokio::test]
async fn test_samples_rejected_while_idle() {
    let tmp = tempfile::tempdir().unwrap();
    let (db, controller) = open(&tmp.path().join("lumina.db"), 10).await;

    assert_eq!(controller.buffer().record(1).await.unwrap(), RecordOutcome::Rejected);
    controller.start(None).await.unwrap();
    controller.stop().await.unwrap();
    assert_eq!(controller.buffer().record(2).await.unwrap(), RecordOutcome::Rejected);

    assert_eq!(db.pending_counts(OWNER).await.unwrap().samples, 0);
}
