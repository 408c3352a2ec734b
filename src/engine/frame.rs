// src/engine/frame.rs
use chrono::NaiveDate;
use std::fmt;

use crate::error::EtlError;
use crate::schema::{ColumnSpec, ColumnType};

/// Formats accepted for date cells: LinkedIn's US-style text first, then ISO
/// (Excel date cells and persisted state).
pub const DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%Y-%m-%d"];

/// Whole numbers in `[-2^63, 2^63)` fit an `i64`; anything outside is null.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// One cell of a materialized table.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl PartialEq for Value {
    /// Floats compare by bit pattern so that engine outputs can be checked for
    /// exact agreement; every NaN equals every other NaN.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Parse one cell of text into the column's logical type. Empty or
    /// unparseable cells become `Null`.
    pub fn parse(raw: &str, ty: ColumnType) -> Value {
        let cleaned = clean_str(raw);
        if cleaned.is_empty() {
            return Value::Null;
        }
        match ty {
            ColumnType::Text => Value::Text(cleaned),
            ColumnType::Float => cleaned
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or(Value::Null),
            // whole numbers only, read through f64 so "12" and "12.0" agree
            ColumnType::Integer => match cleaned.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && (I64_LOWER..I64_UPPER).contains(&f) => {
                    Value::Int(f as i64)
                }
                _ => Value::Null,
            },
            ColumnType::Date => parse_date(&cleaned).map(Value::Date).unwrap_or(Value::Null),
        }
    }

    /// Numeric view of the cell; `None` for nulls and non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn from_f64(v: Option<f64>) -> Value {
        v.map(Value::Float).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    /// CSV rendering: nulls are empty, dates are ISO.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Trim whitespace + strip one pair of outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// An engine-neutral, fully materialized table. It is the row engine's native
/// representation and the form every engine collects into for comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, EtlError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| EtlError::MissingColumn(name.to_string()))
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Result<Vec<Value>, EtlError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| r[idx].clone()).collect())
    }

    /// Numeric values of one column; non-numeric cells become `None`.
    pub fn f64_column(&self, name: &str) -> Result<Vec<Option<f64>>, EtlError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }

    /// Set a column's values, appending it when the name is new.
    pub fn put_column(&mut self, spec: ColumnSpec, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.columns.iter().position(|c| c.name == spec.name) {
            Some(idx) => {
                self.columns[idx] = spec;
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(spec);
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_by_type() {
        assert_eq!(Value::parse(" 42 ", ColumnType::Integer), Value::Int(42));
        assert_eq!(Value::parse("42.0", ColumnType::Integer), Value::Int(42));
        assert_eq!(Value::parse("-5", ColumnType::Integer), Value::Int(-5));
        assert_eq!(Value::parse("4.5", ColumnType::Integer), Value::Null);
        assert_eq!(Value::parse("0.125", ColumnType::Float), Value::Float(0.125));
        assert_eq!(Value::parse("\"abc\"", ColumnType::Text), Value::Text("abc".into()));
        assert_eq!(Value::parse("", ColumnType::Text), Value::Null);
        assert_eq!(Value::parse("n/a", ColumnType::Float), Value::Null);
    }

    #[test]
    fn out_of_range_integers_are_null() {
        assert_eq!(Value::parse("1e19", ColumnType::Integer), Value::Null);
        assert_eq!(Value::parse("-1e19", ColumnType::Integer), Value::Null);
        assert_eq!(Value::parse("inf", ColumnType::Integer), Value::Null);
        assert_eq!(Value::parse("NaN", ColumnType::Integer), Value::Null);
        assert_eq!(Value::parse("1e18", ColumnType::Integer), Value::Int(1_000_000_000_000_000_000));
    }

    #[test]
    fn parses_both_date_styles() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(Value::parse("06/03/2024", ColumnType::Date), Value::Date(d));
        assert_eq!(Value::parse("6/3/2024", ColumnType::Date), Value::Date(d));
        assert_eq!(Value::parse("2024-06-03", ColumnType::Date), Value::Date(d));
        assert_eq!(Value::parse("03.06.2024", ColumnType::Date), Value::Null);
    }

    #[test]
    fn nan_equals_nan() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(-f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn display_for_csv() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Float(10.0).to_string(), "10");
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()).to_string(),
            "2024-02-29"
        );
    }

    #[test]
    fn put_column_appends_or_replaces() {
        let mut frame = Frame::new(vec![ColumnSpec::new("a", ColumnType::Integer)]);
        frame.rows = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        frame.put_column(
            ColumnSpec::new("b", ColumnType::Float),
            vec![Value::Float(0.5), Value::Null],
        );
        frame.put_column(
            ColumnSpec::new("a", ColumnType::Float),
            vec![Value::Float(1.5), Value::Float(2.5)],
        );
        assert_eq!(frame.column_names(), vec!["a", "b"]);
        assert_eq!(frame.rows[1], vec![Value::Float(2.5), Value::Null]);
        assert!(frame.column_index("c").is_err());
    }
}
