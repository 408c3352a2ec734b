// src/engine/rows.rs
//! Row-oriented engine: tables are plain [`Frame`]s and every operation is a
//! loop over `Vec<Vec<Value>>`.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::path::Path;
use tracing::debug;

use super::csv_io::{read_records, write_quoted};
use super::frame::{Frame, Value};
use super::{check_window, trailing_mean, EngineKind, Fallback, TableEngine};
use crate::extract::RawTable;
use crate::schema::{ColumnSpec, ColumnType, TableSchema};

#[derive(Debug, Default)]
pub struct RowEngine;

impl RowEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Ascending order with nulls after every value.
fn cmp_nulls_last(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

impl TableEngine for RowEngine {
    type Table = Frame;

    fn kind(&self) -> EngineKind {
        EngineKind::Rows
    }

    fn load(&mut self, raw: &RawTable, schema: &TableSchema) -> Result<Frame> {
        let columns: Vec<ColumnSpec> = raw
            .headers
            .iter()
            .zip(schema.columns.iter())
            .map(|(name, (_, ty))| ColumnSpec::new(name.clone(), *ty))
            .collect();

        let mut frame = Frame::new(columns);
        frame.rows = raw
            .rows
            .iter()
            .map(|row| {
                frame
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| Value::parse(row.get(i).map_or("", String::as_str), col.ty))
                    .collect()
            })
            .collect();
        debug!(table = raw.name, rows = frame.num_rows(), "loaded rows");
        Ok(frame)
    }

    fn read(&mut self, path: &Path, columns: &[ColumnSpec]) -> Result<Frame> {
        let records = read_records(path, self.kind().delimiter())?;
        let mut frame = Frame::new(columns.to_vec());
        for (idx, record) in records.iter().enumerate() {
            if record.len() != columns.len() {
                bail!(
                    "{:?} record {} has {} fields, expected {}",
                    path,
                    idx,
                    record.len(),
                    columns.len()
                );
            }
            frame.rows.push(
                record
                    .iter()
                    .zip(columns)
                    .map(|(field, col)| Value::parse(field, col.ty))
                    .collect(),
            );
        }
        Ok(frame)
    }

    fn write(&mut self, table: &Frame, path: &Path) -> Result<()> {
        write_quoted(
            path,
            self.kind().delimiter(),
            &table.column_names(),
            table
                .rows
                .iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>()),
        )
        .with_context(|| format!("rows engine writing {:?}", path))
    }

    fn columns(&self, table: &Frame) -> Result<Vec<String>> {
        Ok(table.column_names())
    }

    fn num_rows(&self, table: &Frame) -> Result<usize> {
        Ok(table.num_rows())
    }

    fn collect(&self, table: &Frame) -> Result<Frame> {
        Ok(table.clone())
    }

    fn with_constant_date(&mut self, mut table: Frame, column: &str, date: NaiveDate) -> Result<Frame> {
        let values = vec![Value::Date(date); table.num_rows()];
        table.put_column(ColumnSpec::new(column, ColumnType::Date), values);
        Ok(table)
    }

    fn sort_by(&mut self, mut table: Frame, column: &str) -> Result<Frame> {
        let idx = table.column_index(column)?;
        // Vec::sort_by is stable
        table.rows.sort_by(|a, b| cmp_nulls_last(&a[idx], &b[idx]));
        Ok(table)
    }

    fn project(&mut self, table: Frame, columns: &[(&str, &str)]) -> Result<Frame> {
        let picks = columns
            .iter()
            .map(|(source, _)| table.column_index(source))
            .collect::<Result<Vec<_>, _>>()?;

        let specs = picks
            .iter()
            .zip(columns)
            .map(|(&i, (_, alias))| ColumnSpec::new(*alias, table.columns[i].ty))
            .collect();
        let mut out = Frame::new(specs);
        out.rows = table
            .rows
            .into_iter()
            .map(|row| picks.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(out)
    }

    fn window_average(
        &mut self,
        mut table: Frame,
        source: &str,
        target: &str,
        window: usize,
    ) -> Result<Frame> {
        check_window(window)?;
        let values = table.f64_column(source)?;
        let means = trailing_mean(&values, window)
            .into_iter()
            .map(Value::Float)
            .collect();
        table.put_column(ColumnSpec::new(target, ColumnType::Float), means);
        Ok(table)
    }

    fn conditional_replace(
        &mut self,
        mut table: Frame,
        source: &str,
        fallback: Fallback<'_>,
        target: &str,
    ) -> Result<Frame> {
        let values = table.f64_column(source)?;
        let fallbacks = match fallback {
            Fallback::Zero => vec![Some(0.0); values.len()],
            Fallback::Column(name) => table.f64_column(name)?,
        };
        let out = values
            .into_iter()
            .zip(fallbacks)
            .map(|(v, fb)| match v {
                Some(v) if v >= 0.0 => Value::Float(v),
                _ => Value::from_f64(fb),
            })
            .collect();
        table.put_column(ColumnSpec::new(target, ColumnType::Float), out);
        Ok(table)
    }

    fn ratio_of_sum(
        &mut self,
        mut table: Frame,
        terms: &[&str],
        denominator: &str,
        target: &str,
    ) -> Result<Frame> {
        let term_values = terms
            .iter()
            .map(|t| table.f64_column(t))
            .collect::<Result<Vec<_>, _>>()?;
        let denominators = table.f64_column(denominator)?;

        let out = denominators
            .iter()
            .enumerate()
            .map(|(row, den)| match den {
                None => Value::Null,
                Some(d) if *d == 0.0 => Value::Float(f64::NAN),
                Some(d) => {
                    let mut sum: Option<f64> = None;
                    for column in &term_values {
                        sum = match (sum, column[row]) {
                            (_, None) => return Value::Null,
                            (None, Some(v)) => Some(v),
                            (Some(s), Some(v)) => Some(s + v),
                        };
                    }
                    Value::from_f64(sum.map(|s| s / d))
                }
            })
            .collect();
        table.put_column(ColumnSpec::new(target, ColumnType::Float), out);
        Ok(table)
    }

    fn union(&mut self, mut head: Frame, tail: Frame) -> Result<Frame> {
        if head.column_names() != tail.column_names() {
            bail!(
                "cannot union tables with columns {:?} and {:?}",
                head.column_names(),
                tail.column_names()
            );
        }
        head.rows.extend(tail.rows);
        Ok(head)
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
