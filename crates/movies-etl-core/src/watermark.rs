//! The persisted "processed up to" timestamp.
//!
//! A [`Watermark`] means "every change with a modification time less than or
//! equal to this value has been written to the index". It is stored as a
//! string under a single key by a [`Checkpoint`](crate::checkpoint::Checkpoint)
//! and compared against the `modified`/`created` columns of the tracked tables.
//!
//! Values are truncated to microseconds, the resolution of Postgres
//! `timestamptz`, so a round-trip through storage never changes ordering.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};

/// `2021-01-01T00:00:00.000001Z`, the value used before anything was indexed.
const SENTINEL_NANOS: i64 = 1_609_459_200_000_001_000;

/// Naive layouts accepted when reading state written by older tooling.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// A monotonically advancing modification-time cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// The far-past default used when no watermark has been stored yet.
    pub fn sentinel() -> Self {
        Self(Utc.timestamp_nanos(SENTINEL_NANOS))
    }

    /// The Unix epoch. Used by full re-extraction runs.
    pub fn epoch() -> Self {
        Self(DateTime::UNIX_EPOCH)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(6))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Micros, false))
    }
}

impl FromStr for Watermark {
    type Err = chrono::ParseError;

    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS.ffffff+03` (Postgres `TZH`
    /// output), and naive timestamps, which are read as UTC.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => return Ok(dt.with_timezone(&Utc).into()),
            Err(e) => e,
        };
        if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
            return Ok(dt.with_timezone(&Utc).into());
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(naive.and_utc().into());
            }
        }
        Err(err)
    }
}

/// Compute the watermark that is safe to persist after writing one page.
///
/// `page` holds the modification times of the rows just written, in
/// ascending order; `lookahead` is the timestamp of the first row of the next
/// page, if any. Rows that share the lookahead's timestamp are excluded: the
/// next page still contains rows with that exact value, and persisting it
/// would make a restarted run skip them (`modified > watermark`).
///
/// Returns `None` when nothing in the page is strictly older than the
/// lookahead, in which case the watermark must not move yet.
pub fn page_candidate<I>(page: I, lookahead: Option<Watermark>) -> Option<Watermark>
where
    I: IntoIterator<Item = Watermark>,
{
    page.into_iter()
        .filter(|ts| lookahead.map_or(true, |next| *ts < next))
        .max()
}
