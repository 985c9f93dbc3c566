//! Postgres-backed [`ChangeSource`].
//!
//! Both queries join the film to its people and genres through the link
//! tables. The row `modified` is `GREATEST` over the film and every joined
//! timestamp, so a change that only touches a person or a link row still
//! moves the watermark past it.
//!
//! The identify queries are bounded above by the latest change timestamp
//! read at the start of the cycle.
//!
//! Every query runs inside the [`RetryPolicy`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use movies_etl_core::models::{FilmworkRow, PersonRef, TrackedTable};
use movies_etl_core::watermark::Watermark;

use super::{ChangeSource, RowCursor};
use crate::db::quote_ident;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

pub struct PgSource {
    pool: PgPool,
    retry: RetryPolicy,
    schema: String,
    latest_sql: String,
    fetch_sql: String,
}

impl PgSource {
    pub fn new(pool: PgPool, schema: &str, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            schema: schema.to_string(),
            latest_sql: latest_change_sql(schema),
            fetch_sql: fetch_rows_sql(schema),
        }
    }
}

fn joins(schema: &str) -> String {
    let s = quote_ident(schema);
    format!(
        "FROM {s}.film_work fw
LEFT JOIN {s}.person_film_work pfw ON pfw.film_work_id = fw.id
LEFT JOIN {s}.person p ON p.id = pfw.person_id
LEFT JOIN {s}.genre_film_work gfw ON gfw.film_work_id = fw.id
LEFT JOIN {s}.genre g ON g.id = gfw.genre_id"
    )
}

/// Latest change timestamp over every tracked table; NULL when all are empty.
pub fn latest_change_sql(schema: &str) -> String {
    let s = quote_ident(schema);
    let maxima: Vec<String> = TrackedTable::ALL
        .iter()
        .map(|table| {
            format!(
                "(SELECT MAX({}) FROM {s}.{})",
                table.timestamp_column(),
                table.table_name()
            )
        })
        .collect();
    format!("SELECT GREATEST(\n    {}\n)", maxima.join(",\n    "))
}

/// Film ids linked to a row of `table` changed in `($1, $2]`.
pub fn changed_ids_sql(schema: &str, table: TrackedTable) -> String {
    let column = format!("{}.{}", table.alias(), table.timestamp_column());
    format!(
        "SELECT fw.id
{}
WHERE {column} > $1 AND {column} <= $2
GROUP BY fw.id",
        joins(schema),
    )
}

/// Denormalized rows for the ids in `$1`, keyset-paged after `($2, $3)`,
/// at most `$4` rows.
pub fn fetch_rows_sql(schema: &str) -> String {
    format!(
        "SELECT doc.* FROM (
    SELECT
        fw.id,
        fw.title,
        fw.description,
        fw.rating AS imdb_rating,
        GREATEST(fw.modified, MAX(p.modified), MAX(g.modified), MAX(pfw.created), MAX(gfw.created)) AS modified,
        string_agg(DISTINCT p.full_name, ', ') FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'director') AS director,
        array_agg(DISTINCT p.full_name) FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'actor') AS actors_names,
        array_agg(DISTINCT p.full_name) FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'writer') AS writers_names,
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name)) FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'actor') AS actors,
        json_agg(DISTINCT jsonb_build_object('id', p.id, 'name', p.full_name)) FILTER (WHERE p.id IS NOT NULL AND pfw.role = 'writer') AS writers,
        array_agg(DISTINCT g.name) FILTER (WHERE g.id IS NOT NULL) AS genres
    {}
    WHERE fw.id = ANY($1)
    GROUP BY fw.id
) AS doc
WHERE $2::timestamptz IS NULL OR (doc.modified, doc.id) > ($2::timestamptz, $3::uuid)
ORDER BY doc.modified, doc.id
LIMIT $4",
        joins(schema).replace('\n', "\n    "),
    )
}

fn names(values: Option<Vec<Option<String>>>) -> Option<Vec<String>> {
    values.map(|v| v.into_iter().flatten().collect())
}

fn people(values: Option<Json<Vec<PersonRef>>>) -> Option<Vec<PersonRef>> {
    values.map(|Json(people)| people)
}

fn row_from_pg(row: &PgRow) -> std::result::Result<FilmworkRow, sqlx::Error> {
    Ok(FilmworkRow {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        imdb_rating: row.try_get("imdb_rating")?,
        modified: row.try_get("modified")?,
        director: row.try_get("director")?,
        actors_names: names(row.try_get("actors_names")?),
        writers_names: names(row.try_get("writers_names")?),
        actors: people(row.try_get("actors")?),
        writers: people(row.try_get("writers")?),
        genres: names(row.try_get("genres")?),
    })
}

#[async_trait]
impl ChangeSource for PgSource {
    async fn latest_change(&self) -> Result<Option<Watermark>> {
        let (sql, pool) = (self.latest_sql.as_str(), &self.pool);

        let latest = self
            .retry
            .run("postgres latest change", SyncError::is_transient, || async move {
                sqlx::query_scalar::<_, Option<DateTime<Utc>>>(sql)
                    .fetch_one(pool)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;
        Ok(latest.map(Watermark::from))
    }

    async fn changed_ids(
        &self,
        table: TrackedTable,
        since: Watermark,
        until: Watermark,
    ) -> Result<Vec<Uuid>> {
        let sql = changed_ids_sql(&self.schema, table);
        let operation = format!("postgres changed ids ({})", table);
        let (sql, pool) = (sql.as_str(), &self.pool);
        let (since, until) = (since.as_datetime(), until.as_datetime());

        let ids = self
            .retry
            .run(&operation, SyncError::is_transient, || async move {
                sqlx::query_scalar::<_, Uuid>(sql)
                    .bind(since)
                    .bind(until)
                    .fetch_all(pool)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;
        Ok(ids)
    }

    async fn fetch_rows(
        &self,
        ids: &[Uuid],
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<FilmworkRow>> {
        let (sql, pool) = (self.fetch_sql.as_str(), &self.pool);

        let rows = self
            .retry
            .run("postgres fetch rows", SyncError::is_transient, || async move {
                sqlx::query(sql)
                    .bind(ids.to_vec())
                    .bind(after.map(|c| c.modified))
                    .bind(after.map(|c| c.id))
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;

        let rows = rows
            .iter()
            .map(row_from_pg)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::debug!(ids = ids.len(), rows = rows.len(), "fetched rows");
        Ok(rows)
    }
}
