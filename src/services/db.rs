//! Database connection and schema bootstrap
//!
//! Domain functions use sqlx's generic Executor trait, so they accept both
//! `&SqlitePool` and `&mut SqliteConnection` (transactions):
//!
//! ```ignore
//! pub async fn my_query<'e, E>(executor: E, id: &str) -> Result<MyType, sqlx::Error>
//! where
//!     E: Executor<'e, Database = Sqlite>,
//! {
//!     sqlx::query_as("SELECT * FROM my_table WHERE id = ?")
//!         .bind(id)
//!         .fetch_one(executor)
//!         .await
//! }
//! ```

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS slots (
        id TEXT PRIMARY KEY,
        content TEXT,
        image_url TEXT,
        message TEXT,
        ab_timing TEXT,
        scheduled_at TEXT,
        published INTEGER NOT NULL DEFAULT 0,
        published_at TEXT,
        fb_result TEXT,
        publish_error TEXT,
        publish_attempts INTEGER NOT NULL DEFAULT 0,
        comments TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fb_page (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        page_id TEXT NOT NULL,
        page_name TEXT NOT NULL,
        access_token TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fb_analysis (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        data TEXT NOT NULL
    )
    "#,
];

/// Open the SQLite pool, creating the database file (and its directory) if missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Single-connection in-memory pool; every connection to `:memory:` is a fresh database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    init_schema(&pool).await.expect("create schema");
    pool
}
