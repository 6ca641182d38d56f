use crate::config::Mode;
use crate::db::*;
use crate::types::ImportAttemptResult;
use tempfile::NamedTempFile;

/// Querying after the pool is closed returns an error rather than hanging.
#[tokio::test]
async fn test_query_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let attempt = ImportAttemptResult::succeeded("uuid-1", "baga1", 10);
    db.insert_deal(&attempt, Mode::Default).await.unwrap();

    let pool = db.pool().clone();
    db.close().await;

    let result: Result<i64, sqlx::Error> = sqlx::query_scalar("SELECT COUNT(*) FROM imported_deals")
        .fetch_one(&pool)
        .await;
    assert!(result.is_err(), "closed pool must refuse queries");
}
