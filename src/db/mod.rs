//! Database module for SQLite persistence.
//!
//! Stores the raw skin source per blog. Rendered output is never persisted.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS custom_skins (
            blog_id TEXT PRIMARY KEY,
            html_head TEXT NOT NULL DEFAULT '',
            html_header TEXT NOT NULL DEFAULT '',
            html_post_list TEXT NOT NULL DEFAULT '',
            html_post_item TEXT NOT NULL DEFAULT '',
            html_post_detail TEXT NOT NULL DEFAULT '',
            html_sidebar TEXT NOT NULL DEFAULT '',
            html_footer TEXT NOT NULL DEFAULT '',
            html_template TEXT,
            custom_css TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_custom_skins_active ON custom_skins(is_active);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
