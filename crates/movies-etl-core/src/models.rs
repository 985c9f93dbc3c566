//! Data types flowing through the extract → transform → load cycle.
//!
//! [`FilmworkRow`] is the read model produced by the extractor: one row per
//! film with its people and genres already flattened. Every column that can
//! be NULL in Postgres is an `Option` here. [`MovieDocument`] is the
//! index-ready shape in which none of them are.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::watermark::Watermark;

/// A source table whose change timestamp can put a film into a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedTable {
    FilmWork,
    Person,
    Genre,
    PersonFilmWork,
    GenreFilmWork,
}

impl TrackedTable {
    /// Every tracked table, root table first.
    pub const ALL: [TrackedTable; 5] = [
        TrackedTable::FilmWork,
        TrackedTable::Person,
        TrackedTable::Genre,
        TrackedTable::PersonFilmWork,
        TrackedTable::GenreFilmWork,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            TrackedTable::FilmWork => "film_work",
            TrackedTable::Person => "person",
            TrackedTable::Genre => "genre",
            TrackedTable::PersonFilmWork => "person_film_work",
            TrackedTable::GenreFilmWork => "genre_film_work",
        }
    }

    /// Alias used for the table in the extraction joins.
    pub fn alias(&self) -> &'static str {
        match self {
            TrackedTable::FilmWork => "fw",
            TrackedTable::Person => "p",
            TrackedTable::Genre => "g",
            TrackedTable::PersonFilmWork => "pfw",
            TrackedTable::GenreFilmWork => "gfw",
        }
    }

    /// Column compared against the watermark. Link tables are append-only
    /// and only carry `created`.
    pub fn timestamp_column(&self) -> &'static str {
        match self {
            TrackedTable::PersonFilmWork | TrackedTable::GenreFilmWork => "created",
            _ => "modified",
        }
    }
}

impl fmt::Display for TrackedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A person reference embedded in a document (`actors`, `writers`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// One film joined with all of its related entities.
#[derive(Debug, Clone, PartialEq)]
pub struct FilmworkRow {
    pub id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub imdb_rating: Option<f64>,
    /// Latest change across the film, its people, genres, and link rows.
    pub modified: DateTime<Utc>,
    pub director: Option<String>,
    pub actors_names: Option<Vec<String>>,
    pub writers_names: Option<Vec<String>>,
    pub actors: Option<Vec<PersonRef>>,
    pub writers: Option<Vec<PersonRef>>,
    pub genres: Option<Vec<String>>,
}

impl FilmworkRow {
    /// The row's modification time as a watermark candidate.
    pub fn watermark(&self) -> Watermark {
        Watermark::from(self.modified)
    }
}

/// The document stored in the search index, keyed by film id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDocument {
    pub id: String,
    pub imdb_rating: f64,
    pub genre: Vec<String>,
    pub title: String,
    pub description: String,
    pub director: String,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
}
