pub mod models;
pub mod queries;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;

/// All query modules use this alias. The store is a single embedded SQLite
/// file; readers share the pool, mutations go through one transaction at a
/// time (see `queries`).
pub type DbPool = sqlx::SqlitePool;

/// Fixed namespace for all name-based UUIDs minted by this crate (book ids
/// derived from file paths, database file names derived from library roots).
pub const UUID_NAMESPACE: Uuid = uuid::uuid!("f6c0c0de-9a70-5a1d-8a3b-2b8f5e1c7d42");

/// Database file name for a library root: `<uuid-v5(root)>.db`. Repeated
/// runs against the same root always open the same file.
pub fn database_file_name(library_root: &Path) -> String {
    let id = Uuid::new_v5(&UUID_NAMESPACE, library_root.to_string_lossy().as_bytes());
    format!("{id}.db")
}

/// Resolve the connection URL: the configured override wins, otherwise the
/// library-derived file in the current directory.
pub fn database_url(config: &DatabaseConfig, library_root: &Path) -> String {
    if config.url.is_empty() {
        format!("sqlite://{}", database_file_name(library_root))
    } else {
        config.url.clone()
    }
}

/// Open the pool and run migrations. The database file is created on first
/// run; every connection gets WAL journal mode and foreign key enforcement.
pub async fn create_pool(url: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Create an in-memory SQLite pool for testing, with all migrations applied
/// and the embedded genre taxonomy seeded.
pub async fn create_test_pool() -> DbPool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("Valid test options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create test pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    queries::genres::seed_embedded(&pool)
        .await
        .expect("Failed to seed genres");

    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_database_file_name_is_stable() {
        let root = PathBuf::from("/media/books");
        let first = database_file_name(&root);
        let second = database_file_name(&root);
        assert_eq!(first, second);
        assert!(first.ends_with(".db"));
        assert_ne!(first, database_file_name(&PathBuf::from("/other")));
    }

    #[test]
    fn test_database_url_override() {
        let root = PathBuf::from("/books");
        let derived = database_url(
            &DatabaseConfig {
                url: String::new(),
            },
            &root,
        );
        assert!(derived.starts_with("sqlite://"));
        assert!(derived.ends_with(".db"));

        let explicit = database_url(
            &DatabaseConfig {
                url: "sqlite://custom.db".to_string(),
            },
            &root,
        );
        assert_eq!(explicit, "sqlite://custom.db");
    }

    #[tokio::test]
    async fn test_create_test_pool_has_schema() {
        let pool = create_test_pool().await;
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
        let genres: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM genres")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(genres.0 > 50);
    }
}
