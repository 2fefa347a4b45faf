use std::collections::BTreeMap;

use room_core::model::{LearnerId, Snapshot, StageKey};
use room_core::time::frozen_instant;
use storage::repository::{
    IdentityRepository, ProgressPatch, ProgressRecord, ProgressRepository, StorageError,
};
use storage::sqlite::SqliteRepository;

fn snapshot(id: &LearnerId) -> Snapshot {
    Snapshot {
        identity: id.clone(),
        current_stage_index: 1,
        background_reference: "/images/dungeon.jpg".into(),
        configured_minutes: 10,
        remaining_seconds: 512,
        source_by_stage: BTreeMap::from([
            (
                StageKey::new("format"),
                "function add(a, b) return a + b end".to_string(),
            ),
            (
                StageKey::new("enumerate"),
                "for i = 0, 1000 do record(i) end".to_string(),
            ),
        ]),
        solved_by_stage: BTreeMap::from([
            (StageKey::new("format"), true),
            (StageKey::new("enumerate"), false),
        ]),
    }
}

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_progress_round_trips_snapshot() {
    let repo = connect("memdb_progress_roundtrip").await;
    let id = LearnerId::parse("learner-roundtrip").unwrap();
    let original = snapshot(&id);

    assert!(repo.get_progress(&id).await.unwrap().is_none());

    let record = ProgressRecord::from_snapshot(&original, frozen_instant()).unwrap();
    let stored = repo.upsert_progress(&record).await.unwrap();
    assert_eq!(stored, record);

    let fetched = repo.get_progress(&id).await.unwrap().expect("record");
    assert_eq!(fetched.updated_at, frozen_instant());
    assert_eq!(fetched.into_snapshot().unwrap(), original);
}

#[tokio::test]
async fn sqlite_upsert_fully_replaces_existing_record() {
    let repo = connect("memdb_progress_replace").await;
    let id = LearnerId::parse("learner-replace").unwrap();
    let first = ProgressRecord::from_snapshot(&snapshot(&id), frozen_instant()).unwrap();
    repo.upsert_progress(&first).await.unwrap();

    let mut second_snapshot = snapshot(&id);
    second_snapshot.current_stage_index = 3;
    second_snapshot.source_by_stage.clear();
    let second = ProgressRecord::from_snapshot(&second_snapshot, frozen_instant()).unwrap();
    repo.upsert_progress(&second).await.unwrap();

    let fetched = repo.get_progress(&id).await.unwrap().expect("record");
    assert_eq!(fetched.stage_index, 3);
    assert_eq!(fetched.codes, "{}");
}

#[tokio::test]
async fn sqlite_patch_requires_existing_record() {
    let repo = connect("memdb_progress_patch").await;
    let id = LearnerId::parse("learner-patch").unwrap();
    let patch = ProgressPatch {
        time_left: Some(7),
        stage_index: Some(2),
        ..ProgressPatch::default()
    };

    assert!(matches!(
        repo.patch_progress(&id, &patch).await,
        Err(StorageError::NotFound)
    ));

    let record = ProgressRecord::from_snapshot(&snapshot(&id), frozen_instant()).unwrap();
    repo.upsert_progress(&record).await.unwrap();
    let patched = repo.patch_progress(&id, &patch).await.unwrap();
    assert_eq!(patched.time_left, 7);
    assert_eq!(patched.stage_index, 2);
    assert_eq!(patched.solved, record.solved);

    let fetched = repo.get_progress(&id).await.unwrap().expect("record");
    assert_eq!(fetched, patched);
}

#[tokio::test]
async fn sqlite_delete_reports_missing_records() {
    let repo = connect("memdb_progress_delete").await;
    let id = LearnerId::parse("learner-delete").unwrap();
    let record = ProgressRecord::from_snapshot(&snapshot(&id), frozen_instant()).unwrap();
    repo.upsert_progress(&record).await.unwrap();

    repo.delete_progress(&id).await.unwrap();
    assert!(repo.get_progress(&id).await.unwrap().is_none());
    assert!(matches!(
        repo.delete_progress(&id).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_corrupt_codes_surface_on_read() {
    let repo = connect("memdb_progress_corrupt").await;
    let id = LearnerId::parse("learner-corrupt").unwrap();
    let mut record = ProgressRecord::from_snapshot(&snapshot(&id), frozen_instant()).unwrap();
    record.codes = "[\"not\", \"a map\"]".into();
    repo.upsert_progress(&record).await.unwrap();

    let fetched = repo.get_progress(&id).await.unwrap().expect("record");
    assert!(matches!(
        fetched.into_snapshot(),
        Err(StorageError::Corrupt(_))
    ));
}

#[tokio::test]
async fn sqlite_identity_persists_single_row() {
    let repo = connect("memdb_identity").await;
    assert!(repo.load_identity().await.unwrap().is_none());

    let first = LearnerId::generate();
    repo.save_identity(&first).await.unwrap();
    assert_eq!(repo.load_identity().await.unwrap(), Some(first));

    let second = LearnerId::generate();
    repo.save_identity(&second).await.unwrap();
    assert_eq!(repo.load_identity().await.unwrap(), Some(second));
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(repo.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1, 2]);
}
