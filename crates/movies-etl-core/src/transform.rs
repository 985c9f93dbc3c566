//! Document transformer.
//!
//! Turns extracted [`FilmworkRow`]s into [`MovieDocument`]s and serializes
//! them into an Elasticsearch `_bulk` payload:
//!
//! ```text
//! {"index":{"_index":"movies","_id":"<film id>"}}
//! {"id":"<film id>","imdb_rating":8.1,"genre":["Drama"],...}
//! ```
//!
//! Every action is an `index` keyed by the film id, so sending the same
//! batch twice overwrites instead of duplicating.

use serde::Serialize;

use crate::models::{FilmworkRow, MovieDocument};
use crate::watermark::Watermark;

/// A serialized bulk request plus the watermark candidate it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkBatch {
    /// Newline-delimited action/document pairs, newline-terminated.
    pub payload: String,
    /// Film ids in payload order.
    pub ids: Vec<String>,
    /// Greatest `modified` over all rows in the batch.
    pub max_modified: Option<Watermark>,
}

impl BulkBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkTarget<'a>,
}

#[derive(Serialize)]
struct BulkTarget<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

impl From<&FilmworkRow> for MovieDocument {
    fn from(row: &FilmworkRow) -> Self {
        Self {
            id: row.id.to_string(),
            imdb_rating: row.imdb_rating.unwrap_or(0.0),
            genre: row.genres.clone().unwrap_or_default(),
            title: row.title.clone().unwrap_or_default(),
            description: row.description.clone().unwrap_or_default(),
            director: row.director.clone().unwrap_or_default(),
            actors_names: row.actors_names.clone().unwrap_or_default(),
            writers_names: row.writers_names.clone().unwrap_or_default(),
            actors: row.actors.clone().unwrap_or_default(),
            writers: row.writers.clone().unwrap_or_default(),
        }
    }
}

/// Map rows to documents and track the greatest modification time seen.
///
/// The maximum is taken over every row regardless of input order; it becomes
/// the next watermark, so it must be exact.
pub fn prepare(rows: &[FilmworkRow]) -> (Vec<MovieDocument>, Option<Watermark>) {
    let mut max_modified: Option<Watermark> = None;
    let mut documents = Vec::with_capacity(rows.len());

    for row in rows {
        let ts = row.watermark();
        if max_modified.map_or(true, |max| ts > max) {
            max_modified = Some(ts);
        }
        documents.push(MovieDocument::from(row));
    }

    (documents, max_modified)
}

/// Build the `_bulk` payload for `rows` targeting `index`.
pub fn compile(rows: &[FilmworkRow], index: &str) -> serde_json::Result<BulkBatch> {
    let (documents, max_modified) = prepare(rows);

    let mut payload = String::new();
    let mut ids = Vec::with_capacity(documents.len());

    for doc in &documents {
        let action = BulkAction {
            index: BulkTarget { index, id: &doc.id },
        };
        payload.push_str(&serde_json::to_string(&action)?);
        payload.push('\n');
        payload.push_str(&serde_json::to_string(doc)?);
        payload.push('\n');
        ids.push(doc.id.clone());
    }

    Ok(BulkBatch {
        payload,
        ids,
        max_modified,
    })
}
