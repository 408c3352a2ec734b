// src/engine/columnar.rs
//! Columnar engine over Arrow `RecordBatch`es. Arithmetic and selection go
//! through Arrow compute kernels; the trailing window uses a slice kernel.

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    UInt32Array,
};
use arrow::compute::kernels::cmp::{eq, gt_eq};
use arrow::compute::kernels::numeric::{add, div};
use arrow::compute::kernels::zip::zip;
use arrow::compute::{
    cast, concat, concat_batches, is_null, lexsort_to_indices, prep_null_mask_filter,
    take_record_batch, SortColumn, SortOptions,
};
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{
    DataType, Date32Type, Field, Float64Type, Int64Type, Schema as ArrowSchema, SchemaRef,
};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use std::{fs::File, path::Path, sync::Arc};
use tracing::debug;

use super::csv_io::write_quoted;
use super::frame::{Frame, Value};
use super::{check_window, EngineKind, Fallback, TableEngine};
use crate::error::EtlError;
use crate::extract::RawTable;
use crate::schema::{ColumnSpec, ColumnType, TableSchema};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn date_to_days(d: NaiveDate) -> i32 {
    d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

#[derive(Debug)]
pub struct ArrowEngine {
    batch_size: usize,
}

impl ArrowEngine {
    pub fn new() -> Self {
        Self { batch_size: 8192 }
    }
}

impl Default for ArrowEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn arrow_schema(columns: &[ColumnSpec]) -> SchemaRef {
    Arc::new(ArrowSchema::new(
        columns
            .iter()
            .map(|c| Field::new(&c.name, c.ty.arrow_type(), true))
            .collect::<Vec<_>>(),
    ))
}

/// Build one typed array from parsed cell values.
fn array_from_values(ty: ColumnType, values: &[Value]) -> ArrayRef {
    match ty {
        ColumnType::Integer => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        ColumnType::Float => Arc::new(values.iter().map(Value::as_f64).collect::<Float64Array>()),
        ColumnType::Date => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Date(d) => Some(date_to_days(*d)),
                    _ => None,
                })
                .collect::<Date32Array>(),
        ),
        ColumnType::Text => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Text(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
    }
}

/// Read one array back into cell values.
fn values_from_array(array: &ArrayRef) -> Result<(ColumnType, Vec<Value>)> {
    let n = array.len();
    let out = match array.data_type() {
        DataType::Int64 => {
            let a = array.as_primitive::<Int64Type>();
            let vals = (0..n)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::Int(a.value(i)) })
                .collect();
            (ColumnType::Integer, vals)
        }
        DataType::Float64 => {
            let a = array.as_primitive::<Float64Type>();
            let vals = (0..n)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::Float(a.value(i)) })
                .collect();
            (ColumnType::Float, vals)
        }
        DataType::Date32 => {
            let a = array.as_primitive::<Date32Type>();
            let vals = (0..n)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        days_to_date(a.value(i)).map_or(Value::Null, Value::Date)
                    }
                })
                .collect();
            (ColumnType::Date, vals)
        }
        DataType::Utf8 => {
            let a = array.as_string::<i32>();
            let vals = (0..n)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(a.value(i).to_string())
                    }
                })
                .collect();
            (ColumnType::Text, vals)
        }
        other => {
            // anything else is rendered as text
            debug!(data_type = ?other, "casting column to Utf8 for collection");
            let text = cast(array.as_ref(), &DataType::Utf8)?;
            return values_from_array(&text);
        }
    };
    Ok(out)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| EtlError::MissingColumn(name.to_string()))?;
    Ok(batch.column(idx))
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    Ok(cast(column(batch, name)?.as_ref(), &DataType::Float64)?)
}

/// Null comparison results count as false.
fn nulls_as_false(mask: BooleanArray) -> BooleanArray {
    if mask.null_count() > 0 {
        prep_null_mask_filter(&mask)
    } else {
        mask
    }
}

/// `values` moved down by `lag` rows, zero-filled at the top.
fn shifted(values: &ArrayRef, lag: usize) -> Result<ArrayRef> {
    let n = values.len();
    let lead = lag.min(n);
    let zeros: ArrayRef = Arc::new(Float64Array::from(vec![0.0; lead]));
    let body = values.slice(0, n - lead);
    Ok(concat(&[zeros.as_ref(), body.as_ref()])?)
}

/// Replace `name` in place or append it.
fn put_column(batch: RecordBatch, name: &str, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| (**f).clone()).collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    let field = Field::new(name, array.data_type().clone(), true);

    match schema.index_of(name) {
        Ok(idx) => {
            fields[idx] = field;
            columns[idx] = array;
        }
        Err(_) => {
            fields.push(field);
            columns.push(array);
        }
    }
    Ok(RecordBatch::try_new(Arc::new(ArrowSchema::new(fields)), columns)?)
}

impl TableEngine for ArrowEngine {
    type Table = RecordBatch;

    fn kind(&self) -> EngineKind {
        EngineKind::Arrow
    }

    fn load(&mut self, raw: &RawTable, schema: &TableSchema) -> Result<RecordBatch> {
        let specs: Vec<ColumnSpec> = raw
            .headers
            .iter()
            .zip(schema.columns.iter())
            .map(|(name, (_, ty))| ColumnSpec::new(name.clone(), *ty))
            .collect();

        let columns = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let values: Vec<Value> = raw
                    .rows
                    .iter()
                    .map(|row| Value::parse(row.get(i).map_or("", String::as_str), spec.ty))
                    .collect();
                array_from_values(spec.ty, &values)
            })
            .collect();

        let batch = RecordBatch::try_new(arrow_schema(&specs), columns)
            .with_context(|| format!("building record batch for `{}`", raw.name))?;
        debug!(table = raw.name, rows = batch.num_rows(), "loaded batch");
        Ok(batch)
    }

    fn read(&mut self, path: &Path, columns: &[ColumnSpec]) -> Result<RecordBatch> {
        let schema = arrow_schema(columns);
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_delimiter(self.kind().delimiter())
            .with_batch_size(self.batch_size)
            .build(file)
            .context("creating CSV reader")?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch.with_context(|| format!("CSV parse error in {:?}", path))?);
        }
        Ok(concat_batches(&schema, &batches)?)
    }

    fn write(&mut self, table: &RecordBatch, path: &Path) -> Result<()> {
        let frame = self.collect(table)?;
        write_quoted(
            path,
            self.kind().delimiter(),
            &frame.column_names(),
            frame
                .rows
                .iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>()),
        )
        .with_context(|| format!("arrow engine writing {:?}", path))
    }

    fn columns(&self, table: &RecordBatch) -> Result<Vec<String>> {
        Ok(table
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    fn num_rows(&self, table: &RecordBatch) -> Result<usize> {
        Ok(table.num_rows())
    }

    fn collect(&self, table: &RecordBatch) -> Result<Frame> {
        let schema = table.schema();
        let mut specs = Vec::with_capacity(table.num_columns());
        let mut by_column = Vec::with_capacity(table.num_columns());
        for (field, array) in schema.fields().iter().zip(table.columns()) {
            let (ty, values) = values_from_array(array)?;
            specs.push(ColumnSpec::new(field.name().clone(), ty));
            by_column.push(values);
        }

        let mut frame = Frame::new(specs);
        frame.rows = (0..table.num_rows())
            .map(|r| {
                by_column
                    .iter_mut()
                    .map(|col| std::mem::replace(&mut col[r], Value::Null))
                    .collect()
            })
            .collect();
        Ok(frame)
    }

    fn with_constant_date(
        &mut self,
        table: RecordBatch,
        column: &str,
        date: NaiveDate,
    ) -> Result<RecordBatch> {
        let days = date_to_days(date);
        let array: ArrayRef = Arc::new(Date32Array::from(vec![days; table.num_rows()]));
        put_column(table, column, array)
    }

    fn sort_by(&mut self, table: RecordBatch, column_name: &str) -> Result<RecordBatch> {
        let key = column(&table, column_name)?.clone();
        // row position as a tie breaker keeps equal keys in input order
        let position: ArrayRef = Arc::new(UInt32Array::from_iter_values(
            0..table.num_rows() as u32,
        ));
        let indices = lexsort_to_indices(
            &[
                SortColumn {
                    values: key,
                    options: Some(SortOptions {
                        descending: false,
                        nulls_first: false,
                    }),
                },
                SortColumn {
                    values: position,
                    options: None,
                },
            ],
            None,
        )?;
        Ok(take_record_batch(&table, &indices)?)
    }

    fn project(&mut self, table: RecordBatch, columns: &[(&str, &str)]) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for (source, alias) in columns {
            let array = column(&table, source)?.clone();
            fields.push(Field::new(*alias, array.data_type().clone(), true));
            arrays.push(array);
        }
        Ok(RecordBatch::try_new(
            Arc::new(ArrowSchema::new(fields)),
            arrays,
        )?)
    }

    fn window_average(
        &mut self,
        table: RecordBatch,
        source: &str,
        target: &str,
        window: usize,
    ) -> Result<RecordBatch> {
        check_window(window)?;
        let src = float_column(&table, source)?;
        let n = src.len();
        // missing values count as zero but keep their slot
        let filled = zip(&is_null(src.as_ref())?, &Float64Array::new_scalar(0.0), &src)?;

        let mut sum = filled.clone();
        for lag in 1..window {
            sum = add(&sum, &shifted(&filled, lag)?)?;
        }
        let covered: ArrayRef = Arc::new(Float64Array::from_iter_values(
            (0..n).map(|i| (i + 1).min(window) as f64),
        ));
        let means = div(&sum, &covered)?;
        put_column(table, target, means)
    }

    fn conditional_replace(
        &mut self,
        table: RecordBatch,
        source: &str,
        fallback: Fallback<'_>,
        target: &str,
    ) -> Result<RecordBatch> {
        let src = float_column(&table, source)?;
        // null comparisons count as "not non-negative"
        let keep = nulls_as_false(gt_eq(&src, &Float64Array::new_scalar(0.0))?);
        let out = match fallback {
            Fallback::Zero => zip(&keep, &src, &Float64Array::new_scalar(0.0))?,
            Fallback::Column(name) => {
                let fb = float_column(&table, name)?;
                zip(&keep, &src, &fb)?
            }
        };
        put_column(table, target, out)
    }

    fn ratio_of_sum(
        &mut self,
        table: RecordBatch,
        terms: &[&str],
        denominator: &str,
        target: &str,
    ) -> Result<RecordBatch> {
        let (first, rest) = match terms.split_first() {
            Some(split) => split,
            None => bail!("ratio of an empty sum"),
        };
        let mut sum = float_column(&table, first)?;
        for term in rest {
            sum = add(&sum, &float_column(&table, term)?)?;
        }

        let den = float_column(&table, denominator)?;
        let zero = nulls_as_false(eq(&den, &Float64Array::new_scalar(0.0))?);
        let nan = Float64Array::new_scalar(f64::NAN);
        // divide by NaN instead of zero, then force NaN on every zero row
        let safe_den = zip(&zero, &nan, &den)?;
        let quotient = div(&sum, &safe_den)?;
        let out = zip(&zero, &nan, &quotient)?;
        put_column(table, target, out)
    }

    fn union(&mut self, head: RecordBatch, tail: RecordBatch) -> Result<RecordBatch> {
        let head_cols = self.columns(&head)?;
        let tail_cols = self.columns(&tail)?;
        if head_cols != tail_cols {
            bail!(
                "cannot union tables with columns {:?} and {:?}",
                head_cols,
                tail_cols
            );
        }

        let schema = head.schema();
        let aligned = schema
            .fields()
            .iter()
            .zip(tail.columns())
            .map(|(field, array)| cast(array.as_ref(), field.data_type()))
            .collect::<Result<Vec<_>, _>>()?;
        let tail = RecordBatch::try_new(schema.clone(), aligned)?;
        Ok(concat_batches(&schema, [&head, &tail])?)
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(n, a)| Field::new(*n, a.data_type().clone(), true))
            .collect();
        RecordBatch::try_new(
            Arc::new(ArrowSchema::new(fields)),
            columns.into_iter().map(|(_, a)| a).collect(),
        )
        .unwrap()
    }

    #[test]
    fn epoch_conversion() {
        assert_eq!(date_to_days(ymd(1970, 1, 1)), 0);
        assert_eq!(date_to_days(ymd(2024, 6, 15)), 19_889);
        assert_eq!(days_to_date(19_889), Some(ymd(2024, 6, 15)));
    }

    #[test]
    fn sort_keeps_ties_in_order_and_nulls_last() -> Result<()> {
        let mut engine = ArrowEngine::new();
        let t = batch(vec![
            (
                "Date",
                Arc::new(Date32Array::from(vec![Some(5), None, Some(1), Some(5)])) as ArrayRef,
            ),
            ("n", Arc::new(Int64Array::from(vec![1, 2, 3, 4])) as ArrayRef),
        ]);
        let sorted = engine.sort_by(t, "Date")?;
        let n = sorted.column(1).as_primitive::<Int64Type>();
        assert_eq!(n.values().to_vec(), vec![3, 1, 4, 2]);
        Ok(())
    }

    #[test]
    fn clamp_and_fallback() -> Result<()> {
        let mut engine = ArrowEngine::new();
        let t = batch(vec![
            (
                "x",
                Arc::new(Int64Array::from(vec![Some(-5), Some(7), None])) as ArrayRef,
            ),
            (
                "avg",
                Arc::new(Float64Array::from(vec![1.5, 2.5, 3.5])) as ArrayRef,
            ),
        ]);
        let t = engine.conditional_replace(t, "x", Fallback::Zero, "clamped")?;
        let t = engine.conditional_replace(t, "x", Fallback::Column("avg"), "final")?;
        let frame = engine.collect(&t)?;
        assert_eq!(
            frame.column("clamped")?,
            vec![Value::Float(0.0), Value::Float(7.0), Value::Float(0.0)]
        );
        assert_eq!(
            frame.column("final")?,
            vec![Value::Float(1.5), Value::Float(7.0), Value::Float(3.5)]
        );
        Ok(())
    }

    #[test]
    fn kernels_accept_columns_without_nulls() -> Result<()> {
        let mut engine = ArrowEngine::new();
        let t = batch(vec![
            ("x", Arc::new(Int64Array::from(vec![-2, 4, 6])) as ArrayRef),
            ("den", Arc::new(Int64Array::from(vec![2, 0, 3])) as ArrayRef),
        ]);
        let t = engine.conditional_replace(t, "x", Fallback::Zero, "clamped")?;
        let t = engine.ratio_of_sum(t, &["clamped"], "den", "rate")?;
        let frame = engine.collect(&t)?;
        assert_eq!(
            frame.column("clamped")?,
            vec![Value::Float(0.0), Value::Float(4.0), Value::Float(6.0)]
        );
        let rate = frame.column("rate")?;
        assert_eq!(rate[0], Value::Float(0.0));
        assert!(matches!(rate[1], Value::Float(f) if f.is_nan()));
        assert_eq!(rate[2], Value::Float(2.0));
        Ok(())
    }

    #[test]
    fn window_average_matches_row_kernel() -> Result<()> {
        let mut engine = ArrowEngine::new();
        let values = vec![Some(0.0), Some(10.0), None, Some(6.0), Some(0.1), Some(0.2)];
        let t = batch(vec![(
            "v",
            Arc::new(Float64Array::from(values.clone())) as ArrayRef,
        )]);
        let t = engine.window_average(t, "v", "avg", 3)?;
        let expected: Vec<Value> = crate::engine::trailing_mean(&values, 3)
            .into_iter()
            .map(Value::Float)
            .collect();
        assert_eq!(engine.collect(&t)?.column("avg")?, expected);

        let short = batch(vec![("v", Arc::new(Float64Array::from(vec![4.0])) as ArrayRef)]);
        let short = engine.window_average(short, "v", "avg", 3)?;
        assert_eq!(engine.collect(&short)?.column("avg")?, vec![Value::Float(4.0)]);
        Ok(())
    }

    #[test]
    fn ratio_with_zero_denominator_is_nan() -> Result<()> {
        let mut engine = ArrowEngine::new();
        let t = batch(vec![
            (
                "a",
                Arc::new(Float64Array::from(vec![Some(1.0), Some(1.0), Some(1.0), None])) as ArrayRef,
            ),
            ("b", Arc::new(Float64Array::from(vec![3.0, 3.0, 3.0, 3.0])) as ArrayRef),
            (
                "den",
                Arc::new(Int64Array::from(vec![Some(8), Some(0), None, Some(8)])) as ArrayRef,
            ),
        ]);
        let t = engine.ratio_of_sum(t, &["a", "b"], "den", "rate")?;
        let rate = engine.collect(&t)?.column("rate")?;
        assert_eq!(rate[0], Value::Float(0.5));
        assert!(matches!(rate[1], Value::Float(f) if f.is_nan()));
        assert_eq!(rate[2], Value::Null);
        assert_eq!(rate[3], Value::Null);
        Ok(())
    }

    #[test]
    fn union_casts_tail_to_head_types() -> Result<()> {
        let mut engine = ArrowEngine::new();
        let head = batch(vec![(
            "v",
            Arc::new(Float64Array::from(vec![1.5])) as ArrayRef,
        )]);
        let tail = batch(vec![("v", Arc::new(Int64Array::from(vec![2])) as ArrayRef)]);
        let both = engine.union(head, tail)?;
        assert_eq!(
            engine.collect(&both)?.column("v")?,
            vec![Value::Float(1.5), Value::Float(2.0)]
        );

        let other = batch(vec![("w", Arc::new(Int64Array::from(vec![2])) as ArrayRef)]);
        assert!(engine.union(both, other).is_err());
        Ok(())
    }

    #[test]
    fn write_then_read_keeps_values() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.csv");
        let mut engine = ArrowEngine::new();
        let specs = vec![
            ColumnSpec::new("Location", ColumnType::Text),
            ColumnSpec::new("Total Followers", ColumnType::Integer),
            ColumnSpec::new("Rate", ColumnType::Float),
            ColumnSpec::new("Extraction Range", ColumnType::Date),
        ];
        let t = batch(vec![
            (
                "Location",
                Arc::new(StringArray::from(vec![Some("Recife, PE"), None])) as ArrayRef,
            ),
            ("Total Followers", Arc::new(Int64Array::from(vec![12, 3])) as ArrayRef),
            ("Rate", Arc::new(Float64Array::from(vec![0.25, 1.0 / 3.0])) as ArrayRef),
            (
                "Extraction Range",
                Arc::new(Date32Array::from(vec![19_889, 19_889])) as ArrayRef,
            ),
        ]);
        engine.write(&t, &path)?;
        let back = engine.read(&path, &specs)?;
        assert_eq!(engine.collect(&back)?, engine.collect(&t)?);
        Ok(())
    }
}
