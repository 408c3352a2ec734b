// src/transform/concat.rs
use anyhow::Result;
use tracing::debug;

use crate::engine::TableEngine;
use crate::error::EtlError;

/// Append `incoming` below `accumulated`. The accumulated column order wins;
/// `incoming` is re-projected when only its order differs. A different column
/// set is schema drift. Without prior state `incoming` is returned as is.
pub fn concatenate<E: TableEngine>(
    engine: &mut E,
    name: &str,
    accumulated: Option<E::Table>,
    incoming: E::Table,
) -> Result<E::Table> {
    let accumulated = match accumulated {
        Some(t) => t,
        None => return Ok(incoming),
    };

    let acc_cols = engine.columns(&accumulated)?;
    let inc_cols = engine.columns(&incoming)?;

    let mut acc_sorted = acc_cols.clone();
    let mut inc_sorted = inc_cols.clone();
    acc_sorted.sort();
    inc_sorted.sort();
    if acc_sorted != inc_sorted {
        return Err(EtlError::SchemaDrift {
            table: name.to_string(),
            accumulated: acc_cols,
            incoming: inc_cols,
        }
        .into());
    }

    let incoming = if acc_cols != inc_cols {
        debug!(table = name, "re-projecting incoming columns to accumulated order");
        let pairs: Vec<(&str, &str)> = acc_cols.iter().map(|c| (c.as_str(), c.as_str())).collect();
        engine.project(incoming, &pairs)?
    } else {
        incoming
    };

    engine.union(accumulated, incoming)
}

/// Fold every new table of one logical name onto the accumulated table, in
/// extraction order.
pub fn fold_new_tables<E: TableEngine>(
    engine: &mut E,
    name: &str,
    accumulated: Option<E::Table>,
    new_tables: Vec<E::Table>,
) -> Result<Option<E::Table>> {
    let mut acc = accumulated;
    for table in new_tables {
        acc = Some(concatenate(engine, name, acc, table)?);
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DuckEngine, Frame, RowEngine, Value};
    use crate::extract::RawTable;
    use crate::schema::{table_schema, ColumnSpec, ColumnType};

    fn frame(cols: &[&str], rows: &[&[i64]]) -> Frame {
        let mut f = Frame::new(
            cols.iter()
                .map(|c| ColumnSpec::new(*c, ColumnType::Integer))
                .collect(),
        );
        f.rows = rows
            .iter()
            .map(|r| r.iter().map(|v| Value::Int(*v)).collect())
            .collect();
        f
    }

    #[test]
    fn missing_state_starts_from_incoming() -> Result<()> {
        let mut engine = RowEngine::new();
        let t = concatenate(&mut engine, "x", None, frame(&["a"], &[&[1]]))?;
        assert_eq!(t.num_rows(), 1);
        Ok(())
    }

    #[test]
    fn reorders_incoming_to_accumulated_order() -> Result<()> {
        let mut engine = RowEngine::new();
        let acc = frame(&["a", "b"], &[&[1, 2]]);
        let inc = frame(&["b", "a"], &[&[20, 10]]);
        let t = concatenate(&mut engine, "x", Some(acc), inc)?;
        assert_eq!(t.column_names(), vec!["a", "b"]);
        assert_eq!(t.rows[1], vec![Value::Int(10), Value::Int(20)]);
        Ok(())
    }

    #[test]
    fn differing_column_sets_are_schema_drift() {
        let mut engine = RowEngine::new();
        let acc = frame(&["a", "b"], &[]);
        let inc = frame(&["a", "c"], &[]);
        let err = concatenate(&mut engine, "followers_new", Some(acc), inc).unwrap_err();
        match err.downcast_ref::<EtlError>() {
            Some(EtlError::SchemaDrift { table, incoming, .. }) => {
                assert_eq!(table, "followers_new");
                assert_eq!(incoming, &vec!["a".to_string(), "c".to_string()]);
            }
            other => panic!("expected schema drift, got {:?}", other),
        }
    }

    #[test]
    fn concatenation_is_associative_and_ordered() -> Result<()> {
        let mut engine = RowEngine::new();
        let a = frame(&["v"], &[&[1], &[2]]);
        let b = frame(&["v"], &[&[3]]);
        let c = frame(&["v"], &[&[4], &[5]]);

        let ab = concatenate(&mut engine, "x", Some(a.clone()), b.clone())?;
        let left = concatenate(&mut engine, "x", Some(ab), c.clone())?;
        let bc = concatenate(&mut engine, "x", Some(b), c)?;
        let right = concatenate(&mut engine, "x", Some(a), bc)?;

        assert_eq!(left, right);
        assert_eq!(
            left.column("v")?,
            (1..=5).map(Value::Int).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn folds_several_new_tables_in_order() -> Result<()> {
        let mut engine = DuckEngine::open_in_memory()?;
        let schema = table_schema("followers_location").unwrap();
        let load = |engine: &mut DuckEngine, loc: &str| {
            engine.load(
                &RawTable {
                    name: "followers_location",
                    source_dir: "-".into(),
                    period: "2024_Jun_1".into(),
                    headers: vec!["Location".into(), "Total Followers".into()],
                    rows: vec![vec![loc.to_string(), "1".into()]],
                },
                schema,
            )
        };
        let acc = load(&mut engine, "acc")?;
        let first = load(&mut engine, "first")?;
        let second = load(&mut engine, "second")?;
        let t = fold_new_tables(&mut engine, "followers_location", Some(acc), vec![first, second])?
            .expect("accumulated table");
        assert_eq!(
            engine.collect(&t)?.column("Location")?,
            vec![
                Value::Text("acc".into()),
                Value::Text("first".into()),
                Value::Text("second".into())
            ]
        );
        Ok(())
    }
}
