//! Outbound "digest ready" notification.
//!
//! Delivery (email or otherwise) lives outside this crate; the pipeline
//! only talks to the [`Notifier`] trait and never fails a run over it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn digest_ready(&self, date: NaiveDate, item_count: usize) -> Result<()>;
}

/// Records the notification in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn digest_ready(&self, date: NaiveDate, item_count: usize) -> Result<()> {
        info!(%date, item_count, "digest ready");
        Ok(())
    }
}
