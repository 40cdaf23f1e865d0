use std::path::Path;

use chrono::{DateTime, Utc};
use seishin_core::migrate::{BoxFuture, schema_version};
use seishin_core::model::{PricingType, Step, WorkType};
use seishin_core::store::connect;
use seishin_core::{CURRENT_VERSION, Error, MIGRATIONS, Migration, Result, Store, run_migrations};
use sqlx::SqliteConnection;
use tempfile::TempDir;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// A store as the first release left it.
async fn seed_v1(path: &Path) {
    let pool = connect(path, true).await.unwrap();
    run_migrations(&pool, &MIGRATIONS[..1], Utc::now())
        .await
        .unwrap();

    sqlx::raw_sql(
        r#"
        INSERT INTO studios (id, name, short_name) VALUES (1, 'Studio A', NULL);
        INSERT INTO cuts (id, studio_id, project_name, episode_number, cut_number,
                          current_phase, current_status, difficulty, is_priority,
                          deadline, notes, updated_at)
        VALUES
          (1, 1, 'Project X', 3, 'C010', 'genga', 'completed', 'hard', 1,
           '2025-02-20T00:00:00.000Z', 'final', '2025-02-10T12:30:00.000Z'),
          (2, 1, 'Project X', 3, 'C011', 'genga', 'in_progress', NULL, 0,
           NULL, NULL, '2025-02-11T08:00:00.000Z'),
          (3, NULL, 'Project Y', 'one', 'C001', NULL, NULL, NULL, NULL,
           'soon', NULL, NULL),
          (4, NULL, 'Project Y', 1, 'C002', NULL, 'archived', NULL, NULL,
           NULL, NULL, NULL);
        INSERT INTO cut_phases (cut_id, phase, status) VALUES (1, 'genga', 'done');
        INSERT INTO settings (key, value) VALUES ('onboarding_done', '1');
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;
}

#[tokio::test]
async fn v1_store_upgrades_to_current_shape() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seishin.sqlite");
    seed_v1(&path).await;

    let store = Store::open(&path).await.unwrap();
    let report = store.migration();
    assert_eq!(report.from_version, 1);
    assert_eq!(report.to_version, CURRENT_VERSION);
    assert_eq!(report.applied, vec![2, 3, 4, 5]);

    let done = store.get_cut(1).await.unwrap().unwrap();
    assert_eq!(done.step, Step::Done);
    assert_eq!(done.completed_at, Some(ts("2025-02-10T12:30:00Z")));
    assert_eq!(done.created_at, ts("2025-02-10T12:30:00Z"));
    assert_eq!(done.retake_count, 0);
    assert_eq!(done.price_per_cut, 0);
    assert_eq!(done.pricing_type, PricingType::PerCut);
    assert_eq!(done.sheet_count, 0);
    assert_eq!(done.work_type, WorkType::Genga);
    assert_eq!(done.scene_number, None);
    assert_eq!(done.deadline.map(|d| d.to_string()).as_deref(), Some("2025-02-20"));
    assert_eq!(done.notes, "final");

    let working = store.get_cut(2).await.unwrap().unwrap();
    assert_eq!(working.step, Step::Working);
    assert_eq!(working.completed_at, None);
    assert_eq!(working.notes, "");

    let malformed = store.get_cut(3).await.unwrap().unwrap();
    assert_eq!(malformed.step, Step::Received);
    assert_eq!(malformed.episode_number, 0);
    assert_eq!(malformed.deadline, None);

    let unknown = store.get_cut(4).await.unwrap().unwrap();
    assert_eq!(unknown.step, Step::Received);

    let studio = store.get_studio(1).await.unwrap().unwrap();
    assert_eq!(studio.default_price_per_cut, 0);
    assert_eq!(studio.short_name, "");

    assert_eq!(
        store.get_setting("onboarding_done").await.unwrap().as_deref(),
        Some("1")
    );
    assert!(store.list_quick_links().await.unwrap().is_empty());
    assert!(store.list_retake_history().await.unwrap().is_empty());

    let phases: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'cut_phases'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(phases, 0);
    store.close().await;
}

#[tokio::test]
async fn reopening_a_current_store_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seishin.sqlite");
    seed_v1(&path).await;

    let store = Store::open(&path).await.unwrap();
    let before = store.read_all_tables().await.unwrap();
    store.close().await;

    let store = Store::open(&path).await.unwrap();
    assert!(store.migration().applied.is_empty());
    assert_eq!(store.migration().from_version, CURRENT_VERSION);
    let after = store.read_all_tables().await.unwrap();
    assert_eq!(before, after);

    let report = run_migrations(store.pool(), &MIGRATIONS, Utc::now())
        .await
        .unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.rows_transformed, 0);
    store.close().await;
}

#[tokio::test]
async fn fresh_store_runs_every_version() {
    let temp = TempDir::new().unwrap();
    let store = Store::open(&temp.path().join("new.sqlite")).await.unwrap();
    assert_eq!(store.migration().from_version, 0);
    assert_eq!(store.migration().applied, vec![1, 2, 3, 4, 5]);
    assert_eq!(store.migration().rows_transformed, 0);
    store.close().await;
}

fn failing_transform(
    _conn: &mut SqliteConnection,
    _now: DateTime<Utc>,
) -> BoxFuture<'_, Result<u64>> {
    Box::pin(async {
        Err(Error::Corrupt {
            message: "injected".to_string(),
        })
    })
}

#[tokio::test]
async fn failed_version_rolls_back_completely() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seishin.sqlite");
    seed_v1(&path).await;

    let migrations = [
        MIGRATIONS[0],
        Migration {
            version: 2,
            description: "fails halfway",
            before: "CREATE TABLE doomed (x INTEGER); UPDATE cuts SET notes = 'touched';",
            transform: Some(failing_transform),
            after: "",
        },
    ];

    let pool = connect(&path, false).await.unwrap();
    let err = run_migrations(&pool, &migrations, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Migration { from: 1, to: 2, .. }), "{err}");

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(schema_version(&mut conn).await.unwrap(), 1);
    let doomed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'doomed'",
    )
    .fetch_one(&mut *conn)
    .await
    .unwrap();
    assert_eq!(doomed, 0);
    let touched: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cuts WHERE notes = 'touched'")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(touched, 0);
    drop(conn);
    pool.close().await;

    // The real list still upgrades the untouched store afterwards.
    let store = Store::open(&path).await.unwrap();
    assert_eq!(store.migration().applied, vec![2, 3, 4, 5]);
    store.close().await;
}

#[tokio::test]
async fn newer_store_is_refused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seishin.sqlite");
    let pool = connect(&path, true).await.unwrap();
    sqlx::query("PRAGMA user_version = 42")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let err = Store::open(&path).await.unwrap_err();
    assert!(
        matches!(err, Error::Migration { from: 42, to: CURRENT_VERSION, .. }),
        "{err}"
    );
}
