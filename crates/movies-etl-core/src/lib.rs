//! # movies-etl core
//!
//! I/O-free logic shared by the `movies-etl` synchronizer: the watermark
//! type, the denormalized film read model, the bulk-payload transformer, and
//! the checkpoint contract.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. Backends
//! live in the `movies-etl` crate.

pub mod checkpoint;
pub mod models;
pub mod transform;
pub mod watermark;

pub use watermark::Watermark;
