//! Token index and prompt grouping for scraped gallery metadata.
//!
//! Scraped records are split into prompt tokens (with per-style boilerplate
//! removed) and counted, either into a JSON report or into SQLite. Images are
//! independently grouped by identical prompt pairs into a ranked index.

pub mod database;
pub mod error;
pub mod grouping;
pub mod ingest;
pub mod text;
pub mod utils;
