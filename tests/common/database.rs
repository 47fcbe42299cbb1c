//! Throw-away SQLite databases for tests

use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

use rust_stocks_metrics::database_sqlx::DatabaseManagerSqlx;

/// A database file that lives as long as this value
pub struct TestDatabase {
    pub db: Arc<DatabaseManagerSqlx>,
    _dir: TempDir,
}

/// Create a completely fresh test database in its own temp directory
pub async fn init_fresh_test_database() -> Result<TestDatabase> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("test.db");
    let db = DatabaseManagerSqlx::new(&path.to_string_lossy()).await?;

    Ok(TestDatabase {
        db: Arc::new(db),
        _dir: dir,
    })
}

/// Insert sample companies, returning their ids in input order
pub async fn insert_sample_companies(db: &DatabaseManagerSqlx) -> Result<Vec<i64>> {
    let sample_companies = [
        ("AAPL", "Apple Inc."),
        ("MSFT", "Microsoft Corporation"),
        ("GOOGL", "Alphabet Inc."),
    ];

    let mut ids = Vec::with_capacity(sample_companies.len());
    for (symbol, name) in sample_companies {
        ids.push(db.upsert_company(symbol, Some(name)).await?);
    }
    Ok(ids)
}
