// src/transform/mod.rs
//! Engine-agnostic transformations: content-metrics sanitizing, extraction
//! dating and concatenation onto accumulated state.

pub mod concat;
pub mod sanitize;

pub use concat::{concatenate, fold_new_tables};
pub use sanitize::{sanitize_content_metrics, CONTENT_METRICS_TABLE};

use anyhow::Result;
use chrono::NaiveDate;

use crate::engine::TableEngine;
use crate::schema::EXTRACTION_RANGE;

/// Append the constant "Extraction Range" date to every row.
pub fn add_extraction_date<E: TableEngine>(
    engine: &mut E,
    table: E::Table,
    date: NaiveDate,
) -> Result<E::Table> {
    engine.with_constant_date(table, EXTRACTION_RANGE, date)
}
