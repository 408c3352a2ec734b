// src/schema/types.rs

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

/// Logical type of a canonical column. Every engine maps these onto its own
/// physical representation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash)]
pub enum ColumnType {
    Date,
    Integer,
    Float,
    Text,
}

impl ColumnType {
    /// Column type as DuckDB DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Date => "DATE",
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE",
            ColumnType::Text => "VARCHAR",
        }
    }

    /// Column type as an Arrow `DataType`.
    ///
    /// - Date    → Date32 (days since epoch)
    /// - Integer → Int64
    /// - Float   → Float64
    /// - Text    → Utf8
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Date => DataType::Date32,
            ColumnType::Integer => DataType::Int64,
            ColumnType::Float => DataType::Float64,
            ColumnType::Text => DataType::Utf8,
        }
    }

    /// Map a DuckDB `data_type` string (as reported by information_schema) back.
    pub fn from_sql(ty: &str) -> Self {
        let upper = ty.to_ascii_uppercase();
        if upper == "DATE" {
            ColumnType::Date
        } else if upper.ends_with("INT") || upper == "INTEGER" || upper.starts_with("HUGEINT") {
            ColumnType::Integer
        } else if upper == "DOUBLE" || upper == "FLOAT" || upper == "REAL" || upper.starts_with("DECIMAL") {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }
}

/// A single canonical column: name plus logical type.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_types_round_trip() {
        for ty in [
            ColumnType::Date,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Text,
        ] {
            assert_eq!(ColumnType::from_sql(ty.sql_type()), ty);
        }
        assert_eq!(ColumnType::from_sql("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql("DECIMAL(18,3)"), ColumnType::Float);
    }
}
