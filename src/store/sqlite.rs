//! SQLite-backed [`DigestStore`].
//!
//! Dates are stored as `YYYY-MM-DD` text, timestamps as unix seconds, and
//! embeddings as little-endian `f32` BLOBs (see [`vec_to_blob`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::{
    Category, CuratedItem, DigestItem, InteractionEvent, InteractionType, NewSource, RunRecord,
    RunStatus, Sentiment, Source, SourceUpdate,
};

use super::{fold_case, search_text, DigestStore, Engagement};

const ITEM_COLUMNS: &str = "d.id, d.date, d.title, d.summary, d.tldr, d.sentiment, d.category, \
     d.source_url, d.source_name, d.embedding, d.created_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects and ensures the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).with_context(|| format!("invalid date: {raw}"))
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_item(row: &SqliteRow) -> Result<DigestItem> {
    let date: String = row.get("date");
    let sentiment: String = row.get("sentiment");
    let category: String = row.get("category");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let created_at: i64 = row.get("created_at");

    Ok(DigestItem {
        id: row.get("id"),
        item: CuratedItem {
            title: row.get("title"),
            summary: row.get("summary"),
            tldr: row.get("tldr"),
            sentiment: Sentiment::parse(&sentiment),
            category: Category::parse(&category),
            source_url: row.get("source_url"),
            source_name: row.get("source_name"),
            date: parse_date(&date)?,
            embedding: embedding.map(|b| blob_to_vec(&b)),
        },
        created_at: from_ts(created_at),
    })
}

fn rows_to_items(rows: &[SqliteRow]) -> Result<Vec<DigestItem>> {
    rows.iter().map(row_to_item).collect()
}

fn row_to_source(row: &SqliteRow) -> Source {
    let is_active: i64 = row.get("is_active");
    let created_at: i64 = row.get("created_at");
    Source {
        id: row.get("id"),
        url: row.get("url"),
        name: row.get("name"),
        category: row.get("category"),
        is_active: is_active != 0,
        created_at: from_ts(created_at),
    }
}

#[async_trait]
impl DigestStore for SqliteStore {
    async fn insert_items(&self, items: &[CuratedItem]) -> Result<Vec<String>> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(items.len());

        for item in items {
            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO digest_items
                    (id, date, title, summary, tldr, sentiment, category,
                     source_url, source_name, embedding, search_text, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(format_date(item.date))
            .bind(&item.title)
            .bind(&item.summary)
            .bind(&item.tldr)
            .bind(item.sentiment.as_str())
            .bind(item.category.as_str())
            .bind(&item.source_url)
            .bind(&item.source_name)
            .bind(item.embedding.as_deref().map(vec_to_blob))
            .bind(search_text(&item.title, &item.summary))
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert digest item")?;
            ids.push(id);
        }

        tx.commit().await.context("commit digest items")?;
        Ok(ids)
    }

    async fn get_item(&self, id: &str) -> Result<Option<DigestItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d WHERE d.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn items_for_date(&self, date: NaiveDate) -> Result<Vec<DigestItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d WHERE d.date = ? ORDER BY d.seq ASC"
        ))
        .bind(format_date(date))
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }

    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>> {
        let raw: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT date FROM digest_items ORDER BY date DESC")
                .fetch_all(&self.pool)
                .await?;
        raw.iter().map(|d| parse_date(d)).collect()
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<DigestItem>> {
        // SQLite's lower() and LIKE fold ASCII only; search_text is folded in Rust.
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d
             WHERE instr(d.search_text, ?) > 0
             ORDER BY d.date DESC, d.seq DESC
             LIMIT ?"
        ))
        .bind(fold_case(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }

    async fn recent_items(&self, limit: usize) -> Result<Vec<DigestItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d ORDER BY d.date DESC, d.seq DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }

    async fn embedded_items(&self) -> Result<Vec<DigestItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d WHERE d.embedding IS NOT NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }

    async fn items_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<DigestItem>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d WHERE d.embedding IS NULL \
             ORDER BY d.seq ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }

    async fn set_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        sqlx::query("UPDATE digest_items SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(embedding))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digest_runs
                (run_date, status, items_fetched, items_stored, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_date(run.run_date))
        .bind(run.status.as_str())
        .bind(run.items_fetched)
        .bind(run.items_stored)
        .bind(&run.error_message)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("insert run record")?;
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT run_date, status, items_fetched, items_stored, error_message \
             FROM digest_runs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let run_date: String = row.get("run_date");
                let status: String = row.get("status");
                Ok(RunRecord {
                    run_date: parse_date(&run_date)?,
                    status: RunStatus::parse(&status),
                    items_fetched: row.get("items_fetched"),
                    items_stored: row.get("items_stored"),
                    error_message: row.get("error_message"),
                })
            })
            .collect()
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, url, name, category, is_active, created_at FROM sources \
             ORDER BY category ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, url, name, category, is_active, created_at FROM sources \
             WHERE is_active = 1 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn create_source(&self, source: &NewSource) -> Result<Source> {
        let created = Source {
            id: uuid::Uuid::new_v4().to_string(),
            url: source.url.clone(),
            name: source.name.clone(),
            category: source.category.clone(),
            is_active: true,
            created_at: from_ts(Utc::now().timestamp()),
        };

        sqlx::query(
            "INSERT INTO sources (id, url, name, category, is_active, created_at) \
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(&created.id)
        .bind(&created.url)
        .bind(&created.name)
        .bind(&created.category)
        .bind(created.created_at.timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert source {}", source.url))?;

        Ok(created)
    }

    async fn update_source(&self, id: &str, update: &SourceUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sources SET
                url = COALESCE(?, url),
                name = COALESCE(?, name),
                category = COALESCE(?, category),
                is_active = COALESCE(?, is_active)
            WHERE id = ?
            "#,
        )
        .bind(&update.url)
        .bind(&update.name)
        .bind(&update.category)
        .bind(update.is_active)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_interaction(&self, event: &InteractionEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO interactions (user_id, item_id, interaction_type, dwell_seconds, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.user_id)
        .bind(&event.item_id)
        .bind(event.kind.as_str())
        .bind(event.dwell_seconds)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn interactions_for_user(&self, user_id: &str) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query(
            "SELECT user_id, item_id, interaction_type, dwell_seconds FROM interactions \
             WHERE user_id = ? ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind: String = row.get("interaction_type");
                Some(InteractionEvent {
                    user_id: row.get("user_id"),
                    item_id: row.get("item_id"),
                    kind: InteractionType::parse(&kind)?,
                    dwell_seconds: row.get("dwell_seconds"),
                })
            })
            .collect())
    }

    async fn preference_vector(&self, user_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT vector FROM preference_vectors WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.map(|b| blob_to_vec(&b)))
    }

    async fn save_preference_vector(&self, user_id: &str, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preference_vectors (user_id, vector, dims, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                vector = excluded.vector,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn toggle_favorite(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND item_id = ?")
            .bind(user_id)
            .bind(item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed == 0 {
            sqlx::query("INSERT INTO favorites (user_id, item_id, created_at) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(item_id)
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(removed == 0)
    }

    async fn favorites(&self, user_id: &str) -> Result<Vec<DigestItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM favorites f \
             JOIN digest_items d ON d.id = f.item_id \
             WHERE f.user_id = ? ORDER BY f.created_at DESC, f.rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }

    async fn mark_read(&self, user_id: &str, item_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO read_status (user_id, item_id, read_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(item_id)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn engaged_items(
        &self,
        engagement: Engagement,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DigestItem>> {
        let table = match engagement {
            Engagement::Favorited => "favorites",
            Engagement::Read => "read_status",
        };
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM digest_items d
             WHERE d.date >= ? AND d.date <= ?
               AND d.id IN (SELECT item_id FROM {table})
             ORDER BY d.date DESC, d.seq DESC
             LIMIT ?"
        ))
        .bind(format_date(from))
        .bind(format_date(to))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(&rows)
    }
}
