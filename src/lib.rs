//! # movies-etl
//!
//! Keeps an Elasticsearch index of films in sync with the Postgres catalogue.
//!
//! Each cycle finds the films whose own row, people, genres, or links
//! changed after the stored watermark, rebuilds their documents, writes them
//! with the bulk API, and only then advances the watermark. A crash or failed
//! write means the same films are sent again next cycle (at-least-once);
//! documents are keyed by film id, so resends overwrite.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌─────────────┐   ┌───────────────┐
//! │  Postgres  │──▶│  Extractor  │──▶│  Transform  │──▶│  IndexWriter  │
//! │  content.* │   │ ids + pages │   │ docs + bulk │   │ bulk + persist│
//! └────────────┘   └─────────────┘   └─────────────┘   └───────┬───────┘
//!                         ▲                                    │
//!                         │         ┌──────────────┐           │
//!                         └─────────│  Checkpoint  │◀──────────┘
//!                          watermark│ file / redis │
//!                                   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`retry`] | Exponential backoff wrapper |
//! | [`db`] | Postgres pool |
//! | [`extract`] | Change detection and paged extraction |
//! | [`checkpoint`] | Checkpoint backend selection |
//! | [`state_file`] | JSON file checkpoint backend |
//! | [`state_redis`] | Redis checkpoint backend |
//! | [`elastic`] | Index schema and writer |
//! | [`pipeline`] | Poll loop |
//! | [`status`] | Health report |
//!
//! The I/O-free parts (watermark, models, transformer, checkpoint contract)
//! live in the `movies-etl-core` crate.

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod elastic;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod retry;
pub mod state_file;
pub mod state_redis;
pub mod status;
