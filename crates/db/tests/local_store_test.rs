//! Integration tests for the local store: resend cursor and durability.

use lumina_core::{NewSample, SampleId, SyncState};
use lumina_db::Database;
use pretty_assertions::assert_eq;

const OWNER: &str = "a@x.com";

fn values(range: std::ops::Range<u32>) -> Vec<NewSample> {
    range.map(NewSample::now).collect()
}

#[tokio::test]
async fn test_resend_cursor_never_goes_backwards() {
    let db = Database::new_in_memory().await.unwrap();
    let session = db.create_session(OWNER, None).await.unwrap();
    db.insert_samples_batch(OWNER, Some(session), &values(0..4))
        .await
        .unwrap();

    let mut highest_synced = SampleId(0);
    for round in 0..5u32 {
        let pending = db.unsynced_samples(OWNER, 3).await.unwrap();
        assert!(
            pending.iter().all(|s| s.local_id > highest_synced),
            "round {round}: returned a sample at or below the synced cursor {highest_synced}"
        );
        assert!(pending.windows(2).all(|w| w[0].local_id < w[1].local_id));

        let ids: Vec<SampleId> = pending.iter().map(|s| s.local_id).collect();
        db.mark_samples_synced(&ids).await.unwrap();
        if let Some(last) = ids.last() {
            highest_synced = *last;
        }

        // Interleave fresh capture between sync rounds.
        db.insert_samples_batch(OWNER, Some(session), &values(round * 10..round * 10 + 2))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_unsynced_rows_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lumina.db");

    let session = {
        let db = Database::new(&path).await.unwrap();
        let session = db.create_session(OWNER, Some("evening")).await.unwrap();
        db.insert_samples_batch(OWNER, Some(session), &values(1..4))
            .await
            .unwrap();
        db.close().await;
        session
    };

    let db = Database::new(&path).await.unwrap();
    assert_eq!(db.active_session(OWNER).await.unwrap(), Some(session));

    let pending = db.unsynced_samples(OWNER, 50).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|s| s.sync_state == SyncState::Unsynced));
    assert_eq!(
        pending.iter().map(|s| s.value).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    db.close().await;
}

#[tokio::test]
async fn test_session_link_is_fixed_at_insert() {
    let db = Database::new_in_memory().await.unwrap();
    let first = db.create_session(OWNER, None).await.unwrap();
    db.insert_samples_batch(OWNER, Some(first), &values(0..2))
        .await
        .unwrap();
    db.end_session(first).await.unwrap();

    let second = db.create_session(OWNER, None).await.unwrap();
    db.insert_samples_batch(OWNER, Some(second), &values(5..6))
        .await
        .unwrap();

    assert_eq!(db.samples_for_session(first).await.unwrap().len(), 2);
    assert_eq!(db.samples_for_session(second).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_writers_are_serialized() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::new(&tmp.path().join("lumina.db")).await.unwrap();
    let session = db.create_session(OWNER, None).await.unwrap();

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..10u32 {
                db.insert_samples_batch(OWNER, Some(session), &[NewSample::now(worker * 100 + i)])
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(db.pending_counts(OWNER).await.unwrap().samples, 40);
    db.close().await;
}
