//! Database initialization tests
//!
//! Covers first-run creation, reopening an existing file, and the schema
//! constraints the services rely on.

use haven_common::db::init::{init_database, init_memory_database};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("haven.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("haven.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let pool = init_memory_database().await.unwrap();

    for table in [
        "schema_version",
        "subscriptions",
        "sessions",
        "session_participants",
        "insights",
        "purchases",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_subscription_status_constraint() {
    let pool = init_memory_database().await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO subscriptions (user_id, plan_id, plan_name, status, current_period_start,
                                   current_period_end, created_at, updated_at)
        VALUES ('u1', 'plan_free', 'Free', 'trialing', '2026-01-01T00:00:00Z',
                '2026-02-01T00:00:00Z', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "unknown status should violate CHECK constraint");
}

#[tokio::test]
async fn test_solo_sessions_cannot_carry_invite_codes() {
    let pool = init_memory_database().await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO sessions (id, kind, creator_id, invite_code, max_duration_minutes, started_at)
        VALUES ('9b2f4c1e-0000-4000-8000-000000000001', 'solo', 'u1', 'ABCDEFGH', 10,
                '2026-01-01T00:00:00Z')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let pool = init_memory_database().await.unwrap();

    haven_common::db::create_schema(&pool).await.unwrap();

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(versions, 1);
}
