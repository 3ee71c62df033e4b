//! Terminal display for the CLI.
//!
//! Progress bars for ingestion and index builds, result tables for
//! queries, and a small color theme that respects `NO_COLOR`.

pub mod progress;
pub mod tables;
pub mod theme;

pub use progress::{create_progress_bar, create_spinner, with_spinner};
pub use tables::{create_index_table, create_ingest_table, create_results_table, snippet};
pub use theme::{THEME, Theme};
