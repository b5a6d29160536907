use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::store::search_text;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq preserves insertion order within a run; created_at has second precision.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS digest_items (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            date TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            tldr TEXT NOT NULL,
            sentiment TEXT NOT NULL,
            category TEXT NOT NULL,
            source_url TEXT NOT NULL,
            source_name TEXT NOT NULL,
            embedding BLOB,
            search_text TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS digest_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_date TEXT NOT NULL,
            status TEXT NOT NULL,
            items_fetched INTEGER NOT NULL,
            items_stored INTEGER NOT NULL,
            error_message TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            interaction_type TEXT NOT NULL,
            dwell_seconds INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS preference_vectors (
            user_id TEXT PRIMARY KEY,
            vector BLOB NOT NULL,
            dims INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS favorites (
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS read_status (
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            read_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_digest_items_date ON digest_items(date DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_interactions_user ON interactions(user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_digest_runs_created_at ON digest_runs(created_at DESC)",
    )
    .execute(pool)
    .await?;

    backfill_search_text(pool).await?;

    Ok(())
}

/// Adds `digest_items.search_text` to databases created before it existed and
/// fills it for rows that lack it.
async fn backfill_search_text(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('digest_items') WHERE name = 'search_text'",
    )
    .fetch_one(pool)
    .await?;
    if has_column == 0 {
        sqlx::query("ALTER TABLE digest_items ADD COLUMN search_text TEXT NOT NULL DEFAULT ''")
            .execute(pool)
            .await?;
    }

    let rows = sqlx::query("SELECT id, title, summary FROM digest_items WHERE search_text = ''")
        .fetch_all(pool)
        .await?;
    for row in &rows {
        let id: String = row.get("id");
        let title: String = row.get("title");
        let summary: String = row.get("summary");
        sqlx::query("UPDATE digest_items SET search_text = ? WHERE id = ?")
            .bind(search_text(&title, &summary))
            .bind(&id)
            .execute(pool)
            .await?;
    }
    Ok(())
}
