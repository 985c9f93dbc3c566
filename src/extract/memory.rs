//! In-memory [`ChangeSource`] for tests and local experiments.
//!
//! Each film keeps the change timestamps of every related row recorded via
//! [`MemorySource::touch`]. A fetched row's `modified` is the latest of
//! them, the same way the Postgres query folds related tables in.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use movies_etl_core::models::{FilmworkRow, TrackedTable};
use movies_etl_core::watermark::Watermark;

use super::{ChangeSource, RowCursor};
use crate::error::{Result, SyncError};

struct StoredFilm {
    row: FilmworkRow,
    changes: Vec<(TrackedTable, DateTime<Utc>)>,
}

impl StoredFilm {
    fn modified(&self) -> DateTime<Utc> {
        self.changes
            .iter()
            .map(|(_, at)| *at)
            .fold(self.row.modified, |latest, at| latest.max(at))
    }

    fn materialize(&self) -> FilmworkRow {
        FilmworkRow {
            modified: self.modified(),
            ..self.row.clone()
        }
    }
}

#[derive(Default)]
pub struct MemorySource {
    films: RwLock<BTreeMap<Uuid, StoredFilm>>,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a film. Recorded related changes are kept.
    pub fn upsert_film(&self, row: FilmworkRow) {
        let mut films = self.films.write().unwrap_or_else(|e| e.into_inner());
        match films.get_mut(&row.id) {
            Some(stored) => stored.row = row,
            None => {
                films.insert(
                    row.id,
                    StoredFilm {
                        row,
                        changes: Vec::new(),
                    },
                );
            }
        }
    }

    /// Record that a row of `table` linked to `film_id` changed at `at`.
    /// Unknown films are ignored.
    pub fn touch(&self, film_id: Uuid, table: TrackedTable, at: DateTime<Utc>) {
        let mut films = self.films.write().unwrap_or_else(|e| e.into_inner());
        if let Some(stored) = films.get_mut(&film_id) {
            stored.changes.push((table, at));
        }
    }

    /// Make every following query fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `fetch_rows` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Postgres(sqlx::Error::Protocol(
                "memory source is failing".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for MemorySource {
    async fn latest_change(&self) -> Result<Option<Watermark>> {
        self.check_available()?;
        let films = self.films.read().unwrap_or_else(|e| e.into_inner());
        Ok(films
            .values()
            .map(StoredFilm::modified)
            .max()
            .map(Watermark::from))
    }

    async fn changed_ids(
        &self,
        table: TrackedTable,
        since: Watermark,
        until: Watermark,
    ) -> Result<Vec<Uuid>> {
        self.check_available()?;
        let (since, until) = (since.as_datetime(), until.as_datetime());
        let in_window = |at: DateTime<Utc>| at > since && at <= until;
        let films = self.films.read().unwrap_or_else(|e| e.into_inner());

        let ids = films
            .values()
            .filter(|film| {
                (table == TrackedTable::FilmWork && in_window(film.row.modified))
                    || film
                        .changes
                        .iter()
                        .any(|(changed, at)| *changed == table && in_window(*at))
            })
            .map(|film| film.row.id)
            .collect();
        Ok(ids)
    }

    async fn fetch_rows(
        &self,
        ids: &[Uuid],
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<FilmworkRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let films = self.films.read().unwrap_or_else(|e| e.into_inner());

        let mut rows: Vec<FilmworkRow> = films
            .values()
            .filter(|film| wanted.contains(&film.row.id))
            .map(StoredFilm::materialize)
            .filter(|row| match after {
                Some(cursor) => (row.modified, row.id) > (cursor.modified, cursor.id),
                None => true,
            })
            .collect();
        rows.sort_by_key(|row| (row.modified, row.id));
        rows.truncate(limit);
        Ok(rows)
    }
}
