//! Health and progress overview.
//!
//! Used by `movies-etl status`: checks that both ends are reachable, counts
//! films in Postgres and documents in the index, and shows the stored
//! watermark. Every check is a single attempt; an unreachable backend is
//! reported, not retried. The caller opens the checkpoint with
//! [`RetryPolicy::single_attempt`](crate::retry::RetryPolicy::single_attempt),
//! so a Redis backend that is down fails the command at once.

use std::fmt;

use sqlx::postgres::PgPool;

use movies_etl_core::Watermark;

use crate::db::quote_ident;
use crate::elastic::IndexWriter;

#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    Up,
    Down(String),
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Up => f.write_str("OK"),
            Health::Down(reason) => write!(f, "DOWN ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub postgres: Health,
    pub films: Option<i64>,
    pub elasticsearch: Health,
    pub index: String,
    pub documents: Option<u64>,
    pub checkpoint_backend: String,
    pub checkpoint: Health,
    pub watermark: Option<Watermark>,
}

pub async fn collect(pool: &PgPool, schema: &str, writer: &IndexWriter) -> StatusReport {
    let sql = format!("SELECT COUNT(*) FROM {}.film_work", quote_ident(schema));
    let (postgres, films) = match sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await {
        Ok(count) => (Health::Up, Some(count)),
        Err(e) => (Health::Down(e.to_string()), None),
    };

    let (elasticsearch, documents) = match writer.document_count().await {
        Ok(count) => (Health::Up, Some(count)),
        Err(e) => (Health::Down(e.to_string()), None),
    };

    let (checkpoint, watermark) = match writer.stored_watermark().await {
        Ok(watermark) => (Health::Up, watermark),
        Err(e) => (Health::Down(e.to_string()), None),
    };

    StatusReport {
        postgres,
        films,
        elasticsearch,
        index: writer.index().to_string(),
        documents,
        checkpoint_backend: writer.checkpoint_backend().to_string(),
        checkpoint,
        watermark,
    }
}

fn count_or_dash<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "movies-etl status")?;
        writeln!(f, "=================")?;
        writeln!(f)?;
        writeln!(f, "  Postgres:       {}", self.postgres)?;
        writeln!(f, "  Films:          {}", count_or_dash(self.films))?;
        writeln!(f, "  Elasticsearch:  {}", self.elasticsearch)?;
        writeln!(f, "  Index:          {}", self.index)?;
        writeln!(f, "  Documents:      {}", count_or_dash(self.documents))?;
        writeln!(
            f,
            "  Checkpoint:     {} {}",
            self.checkpoint_backend, self.checkpoint
        )?;
        let watermark = match (&self.checkpoint, self.watermark) {
            (_, Some(w)) => w.to_string(),
            (Health::Down(_), None) => "unknown".to_string(),
            (Health::Up, None) => "never synced".to_string(),
        };
        write!(f, "  Watermark:      {}", watermark)
    }
}
