// src/engine/mod.rs
//! The capability set every execution engine provides. The pipeline, the
//! content-metrics sanitizer and the concatenator are written once against
//! [`TableEngine`]; each engine implements it in its own execution model.

pub mod columnar;
pub mod csv_io;
pub mod frame;
pub mod rows;
pub mod sql;

use anyhow::Result;
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

use crate::extract::RawTable;
use crate::schema::{ColumnSpec, TableSchema};

pub use columnar::ArrowEngine;
pub use frame::{Frame, Value};
pub use rows::RowEngine;
pub use sql::DuckEngine;

/// Engine selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Embedded analytical SQL (DuckDB).
    Duckdb,
    /// Row-oriented in-memory tables.
    Rows,
    /// Columnar Arrow record batches.
    Arrow,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Duckdb, EngineKind::Rows, EngineKind::Arrow];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Duckdb => "duckdb",
            EngineKind::Rows => "rows",
            EngineKind::Arrow => "arrow",
        }
    }

    /// Field delimiter of the engine's CSV exports and persisted state.
    pub fn delimiter(&self) -> u8 {
        match self {
            EngineKind::Duckdb => b';',
            EngineKind::Rows | EngineKind::Arrow => b',',
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value used by [`TableEngine::conditional_replace`] where the source is
/// negative or missing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fallback<'a> {
    Zero,
    Column(&'a str),
}

/// Table operations shared by all engines.
///
/// Operations consume their input table and return the result, so an engine
/// is free to mutate in place or to materialize a new table. Columns written
/// by an operation replace a same-named column in place, or are appended.
pub trait TableEngine {
    type Table;

    fn kind(&self) -> EngineKind;

    /// Type a translated raw sheet according to its registry schema.
    fn load(&mut self, raw: &RawTable, schema: &TableSchema) -> Result<Self::Table>;

    /// Read a headered file in this engine's delimiter; `columns` lists the
    /// file's columns in header order.
    fn read(&mut self, path: &Path, columns: &[ColumnSpec]) -> Result<Self::Table>;

    /// Write a headered, fully quoted file in this engine's delimiter.
    fn write(&mut self, table: &Self::Table, path: &Path) -> Result<()>;

    fn columns(&self, table: &Self::Table) -> Result<Vec<String>>;

    fn num_rows(&self, table: &Self::Table) -> Result<usize>;

    /// Materialize into an engine-neutral frame.
    fn collect(&self, table: &Self::Table) -> Result<Frame>;

    /// Set `column` to `date` on every row.
    fn with_constant_date(
        &mut self,
        table: Self::Table,
        column: &str,
        date: NaiveDate,
    ) -> Result<Self::Table>;

    /// Stable ascending sort, nulls last.
    fn sort_by(&mut self, table: Self::Table, column: &str) -> Result<Self::Table>;

    /// Keep `(source, alias)` columns in the given order.
    fn project(&mut self, table: Self::Table, columns: &[(&str, &str)]) -> Result<Self::Table>;

    /// Trailing mean of `source` over the current row and up to `window - 1`
    /// preceding rows in table order, summed newest first. Missing values
    /// count as zero.
    fn window_average(
        &mut self,
        table: Self::Table,
        source: &str,
        target: &str,
        window: usize,
    ) -> Result<Self::Table>;

    /// `target = source` where `source >= 0`, otherwise the fallback.
    /// Missing sources take the fallback. The result is always a float column.
    fn conditional_replace(
        &mut self,
        table: Self::Table,
        source: &str,
        fallback: Fallback<'_>,
        target: &str,
    ) -> Result<Self::Table>;

    /// `target = (terms[0] + terms[1] + ...) / denominator`, added left to
    /// right. A zero denominator yields NaN, a missing operand yields null.
    fn ratio_of_sum(
        &mut self,
        table: Self::Table,
        terms: &[&str],
        denominator: &str,
        target: &str,
    ) -> Result<Self::Table>;

    /// Rows of `head` followed by rows of `tail`; the column lists must match.
    fn union(&mut self, head: Self::Table, tail: Self::Table) -> Result<Self::Table>;

    /// End the session and release its resources.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Check that the trailing window is non-empty.
pub(crate) fn check_window(window: usize) -> Result<()> {
    if window == 0 {
        anyhow::bail!("moving-average window must be at least one row");
    }
    Ok(())
}

/// Rolling kernel for the row engine. Each output is the sum of the
/// current value and the `window - 1` values before it (newest first, zero
/// where missing) divided by the number of rows the window covers.
pub(crate) fn trailing_mean(values: &[Option<f64>], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let mut sum = 0.0;
            for lag in 0..window {
                let v = i.checked_sub(lag).and_then(|j| values[j]).unwrap_or(0.0);
                sum += v;
            }
            sum / (i + 1).min(window) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_mean_grows_then_slides() {
        let got = trailing_mean(&[Some(0.0), Some(10.0), Some(0.0), Some(6.0)], 3);
        assert_eq!(got, vec![0.0, 5.0, 10.0 / 3.0, 16.0 / 3.0]);
        // missing values count as zero but still occupy a slot
        let got = trailing_mean(&[Some(3.0), None, Some(3.0)], 3);
        assert_eq!(got, vec![3.0, 1.5, 2.0]);
        assert!(trailing_mean(&[], 3).is_empty());
    }

    #[test]
    fn delimiters_per_engine() {
        assert_eq!(EngineKind::Duckdb.delimiter(), b';');
        assert_eq!(EngineKind::Rows.delimiter(), b',');
        assert_eq!(EngineKind::Arrow.delimiter(), b',');
    }

    #[test]
    fn parses_from_cli_names() {
        assert_eq!(
            EngineKind::from_str("duckdb", true).unwrap(),
            EngineKind::Duckdb
        );
        assert_eq!(EngineKind::from_str("arrow", true).unwrap(), EngineKind::Arrow);
        assert!(EngineKind::from_str("pandas", true).is_err());
    }
}
