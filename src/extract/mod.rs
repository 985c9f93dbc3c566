//! Change extraction.
//!
//! Each cycle runs in two phases:
//!
//! 1. **Identify**: note the latest change timestamp the source holds (the
//!    cutoff), then ask every [`TrackedTable`] for the films touched after
//!    the watermark and up to the cutoff, and union the answers. A renamed
//!    person or genre, or a new cast/genre link, puts every film it is
//!    attached to into the set.
//! 2. **Fetch**: read the denormalized rows for that set in pages of
//!    `batch_size`, ordered by `(modified, id)` ascending.
//!
//! Paging is keyset-based with one row of lookahead, which lets each
//! [`Page`] carry a watermark candidate that is safe to persist once the page
//! is indexed (see [`page_candidate`]). Candidates are capped at the cutoff:
//! a film edited while the cycle runs was not in the set, and its change
//! must stay above the watermark for the next cycle to see it.
//!
//! [`ChangeSource`] is the storage seam: [`postgres::PgSource`] in
//! production, [`memory::MemorySource`] in tests.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use movies_etl_core::models::{FilmworkRow, TrackedTable};
use movies_etl_core::watermark::{page_candidate, Watermark};

use crate::error::Result;

/// Films to re-index this cycle. Ordered so runs are reproducible.
pub type ChangedSet = BTreeSet<Uuid>;

/// The films one cycle works on and the cutoff they were identified under.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub ids: ChangedSet,
    /// Latest change the source held before identifying. `None` when the
    /// source holds nothing.
    pub until: Option<Watermark>,
}

impl Changes {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Keyset position: the last `(modified, id)` already returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCursor {
    pub modified: DateTime<Utc>,
    pub id: Uuid,
}

impl RowCursor {
    pub fn after(row: &FilmworkRow) -> Self {
        Self {
            modified: row.modified,
            id: row.id,
        }
    }
}

/// Read access to the relational source.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Latest change timestamp over every tracked table, `None` when they
    /// are all empty.
    async fn latest_change(&self) -> Result<Option<Watermark>>;

    /// Ids of films linked to a row of `table` changed after `since` and no
    /// later than `until`.
    async fn changed_ids(
        &self,
        table: TrackedTable,
        since: Watermark,
        until: Watermark,
    ) -> Result<Vec<Uuid>>;

    /// Denormalized rows for `ids`, ordered by `(modified, id)`, strictly
    /// after `after` when given, at most `limit` rows.
    async fn fetch_rows(
        &self,
        ids: &[Uuid],
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<FilmworkRow>>;
}

#[async_trait]
impl<T: ChangeSource + ?Sized> ChangeSource for Arc<T> {
    async fn latest_change(&self) -> Result<Option<Watermark>> {
        (**self).latest_change().await
    }

    async fn changed_ids(
        &self,
        table: TrackedTable,
        since: Watermark,
        until: Watermark,
    ) -> Result<Vec<Uuid>> {
        (**self).changed_ids(table, since, until).await
    }

    async fn fetch_rows(
        &self,
        ids: &[Uuid],
        after: Option<RowCursor>,
        limit: usize,
    ) -> Result<Vec<FilmworkRow>> {
        (**self).fetch_rows(ids, after, limit).await
    }
}

/// A page of rows plus the watermark that may be persisted once it is written.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<FilmworkRow>,
    pub candidate: Option<Watermark>,
}

pub struct Extractor {
    source: Box<dyn ChangeSource>,
    batch_size: usize,
}

impl Extractor {
    pub fn new(source: Box<dyn ChangeSource>, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Union of the changed film ids over every tracked table, up to the
    /// source's latest change at the time of the call.
    pub async fn changed_ids(&self, since: Watermark) -> Result<Changes> {
        let until = match self.source.latest_change().await? {
            Some(until) if until > since => until,
            until => {
                tracing::debug!(
                    since = %since,
                    latest = ?until.map(|u| u.to_string()),
                    "nothing newer than the watermark"
                );
                return Ok(Changes {
                    ids: ChangedSet::new(),
                    until,
                });
            }
        };

        let mut ids = ChangedSet::new();
        for table in TrackedTable::ALL {
            let found = self.source.changed_ids(table, since, until).await?;
            tracing::debug!(
                %table,
                since = %since,
                until = %until,
                ids = found.len(),
                "changed ids"
            );
            ids.extend(found);
        }
        Ok(Changes {
            ids,
            until: Some(until),
        })
    }

    /// Page through the denormalized rows for `changes`.
    ///
    /// An empty set yields no pages and issues no query.
    pub fn pages<'a>(&'a self, changes: &Changes) -> PageCursor<'a> {
        PageCursor {
            source: self.source.as_ref(),
            ids: changes.ids.iter().copied().collect(),
            batch_size: self.batch_size,
            until: changes.until,
            after: None,
            done: changes.is_empty(),
        }
    }
}

pub struct PageCursor<'a> {
    source: &'a dyn ChangeSource,
    ids: Vec<Uuid>,
    batch_size: usize,
    until: Option<Watermark>,
    after: Option<RowCursor>,
    done: bool,
}

impl PageCursor<'_> {
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }

        let mut rows = self
            .source
            .fetch_rows(&self.ids, self.after, self.batch_size + 1)
            .await?;

        let lookahead = if rows.len() > self.batch_size {
            let next = rows[self.batch_size].watermark();
            rows.truncate(self.batch_size);
            Some(next)
        } else {
            self.done = true;
            None
        };

        let Some(last) = rows.last() else {
            self.done = true;
            return Ok(None);
        };
        self.after = Some(RowCursor::after(last));

        let candidate = page_candidate(rows.iter().map(FilmworkRow::watermark), lookahead)
            .map(|candidate| match self.until {
                Some(until) => candidate.min(until),
                None => candidate,
            });
        Ok(Some(Page { rows, candidate }))
    }
}
