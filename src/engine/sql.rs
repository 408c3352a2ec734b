// src/engine/sql.rs
//! SQL engine on an embedded DuckDB session.
//!
//! Each engine table is a DuckDB table owned by the session. Every table
//! carries a hidden `__ord` BIGINT column holding the logical row order, so
//! window functions and outputs never depend on scan order. Operations build
//! a new table from the old one and drop the old one.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use duckdb::types::Value as SqlValue;
use duckdb::{Connection, ToSql};
use std::path::Path;
use tracing::debug;

use super::frame::{Frame, Value};
use super::{check_window, EngineKind, Fallback, TableEngine};
use crate::error::EtlError;
use crate::extract::RawTable;
use crate::schema::{ColumnSpec, ColumnType, TableSchema};

/// Hidden row-order column.
const ORD: &str = "__ord";

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// A table living inside a [`DuckEngine`] session.
#[derive(Debug)]
pub struct SqlTable {
    name: String,
}

pub struct DuckEngine {
    conn: Connection,
    next_id: usize,
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn as_double(column: &str) -> String {
    format!("CAST({} AS DOUBLE)", ident(column))
}

/// SQL that turns one raw text cell into the column's logical type: trim,
/// strip one pair of outer quotes, empty ⇒ NULL, unparseable ⇒ NULL.
fn typed_expr(raw: &str, ty: ColumnType) -> String {
    let clean = format!(
        r#"NULLIF(regexp_replace(regexp_replace({}, '^\s+|\s+$', '', 'g'), '^"(.*)"$', '\1', 's'), '')"#,
        raw
    );
    match ty {
        ColumnType::Text => clean,
        ColumnType::Float => format!("TRY_CAST({} AS DOUBLE)", clean),
        ColumnType::Integer => {
            let d = format!("TRY_CAST({} AS DOUBLE)", clean);
            format!(
                "CASE WHEN isfinite({d}) AND {d} = trunc({d}) THEN TRY_CAST({d} AS BIGINT) END",
                d = d
            )
        }
        ColumnType::Date => format!(
            "CAST(COALESCE(TRY_STRPTIME({c}, '%m/%d/%Y'), TRY_STRPTIME({c}, '%Y-%m-%d')) AS DATE)",
            c = clean
        ),
    }
}

impl DuckEngine {
    /// Open an in-memory session with single-threaded, order-preserving execution.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory DuckDB")?;
        conn.execute_batch("SET threads = 1; SET preserve_insertion_order = true;")
            .context("configuring DuckDB session")?;
        Ok(Self { conn, next_id: 0 })
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn exec(&self, sql: &str) -> Result<()> {
        debug!(sql, "duckdb");
        self.conn
            .execute_batch(sql)
            .with_context(|| format!("duckdb statement failed: {}", sql))
    }

    fn drop_table(&self, table: SqlTable) -> Result<()> {
        self.exec(&format!("DROP TABLE IF EXISTS {}", ident(&table.name)))
    }

    /// Visible columns with their logical types, in table order.
    fn typed_columns(&self, table: &SqlTable) -> Result<Vec<ColumnSpec>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map([&table.name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (name, data_type) = row?;
            if name != ORD {
                out.push(ColumnSpec::new(name, ColumnType::from_sql(&data_type)));
            }
        }
        Ok(out)
    }

    /// `CREATE TABLE <new> AS <select>` and drop every consumed table.
    fn derive(&mut self, select: &str, consumed: Vec<SqlTable>) -> Result<SqlTable> {
        let name = self.fresh("t");
        self.exec(&format!("CREATE TABLE {} AS {}", ident(&name), select))?;
        for table in consumed {
            self.drop_table(table)?;
        }
        Ok(SqlTable { name })
    }

    /// Set `target` to `expr`, replacing a same-named column or appending.
    /// DuckDB identifiers are case-insensitive, so a column differing from
    /// `target` only in case is replaced and renamed to `target`.
    fn put_column(
        &mut self,
        table: SqlTable,
        target: &str,
        expr: &str,
        windowed: bool,
    ) -> Result<SqlTable> {
        let columns = self.columns(&table)?;
        let mut select: Vec<String> = columns
            .iter()
            .map(|c| {
                if c.eq_ignore_ascii_case(target) {
                    format!("{} AS {}", expr, ident(target))
                } else {
                    ident(c)
                }
            })
            .collect();
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(target)) {
            select.push(format!("{} AS {}", expr, ident(target)));
        }
        select.push(ORD.to_string());

        let window = if windowed {
            format!(" WINDOW w AS (ORDER BY {})", ORD)
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            select.join(", "),
            ident(&table.name),
            window,
            ORD
        );
        self.derive(&sql, vec![table])
    }

    fn to_value(v: SqlValue) -> Value {
        match v {
            SqlValue::Null => Value::Null,
            SqlValue::TinyInt(i) => Value::Int(i.into()),
            SqlValue::SmallInt(i) => Value::Int(i.into()),
            SqlValue::Int(i) => Value::Int(i.into()),
            SqlValue::BigInt(i) => Value::Int(i),
            SqlValue::UTinyInt(i) => Value::Int(i.into()),
            SqlValue::USmallInt(i) => Value::Int(i.into()),
            SqlValue::UInt(i) => Value::Int(i.into()),
            SqlValue::Float(f) => Value::Float(f.into()),
            SqlValue::Double(f) => Value::Float(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Date32(days) => {
                NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                    .map_or(Value::Null, Value::Date)
            }
            other => Value::Text(format!("{:?}", other)),
        }
    }
}

impl TableEngine for DuckEngine {
    type Table = SqlTable;

    fn kind(&self) -> EngineKind {
        EngineKind::Duckdb
    }

    fn load(&mut self, raw: &RawTable, schema: &TableSchema) -> Result<SqlTable> {
        // ─── 1) stage the sheet as text ───
        let stage = self.fresh("stage");
        let width = raw.headers.len();
        let mut ddl: Vec<String> = (0..width).map(|i| format!("c{} VARCHAR", i)).collect();
        ddl.push(format!("{} BIGINT", ORD));
        self.exec(&format!("CREATE TABLE {} ({})", ident(&stage), ddl.join(", ")))?;

        {
            let mut appender = self
                .conn
                .appender(&stage)
                .with_context(|| format!("opening appender for `{}`", raw.name))?;
            for (ord, row) in raw.rows.iter().enumerate() {
                let mut params: Vec<SqlValue> = (0..width)
                    .map(|i| SqlValue::Text(row.get(i).cloned().unwrap_or_default()))
                    .collect();
                params.push(SqlValue::BigInt(ord as i64));
                let cells: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
                appender
                    .append_row(cells.as_slice())
                    .with_context(|| format!("staging row {} of `{}`", ord, raw.name))?;
            }
            appender.flush()?;
        }

        // ─── 2) type every column ───
        let mut select: Vec<String> = raw
            .headers
            .iter()
            .zip(schema.columns.iter())
            .enumerate()
            .map(|(i, (name, (_, ty)))| {
                format!("{} AS {}", typed_expr(&format!("c{}", i), *ty), ident(name))
            })
            .collect();
        select.push(ORD.to_string());
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(", "),
            ident(&stage),
            ORD
        );
        let table = self.derive(&sql, vec![SqlTable { name: stage }])?;
        debug!(table = raw.name, rows = raw.rows.len(), sql_table = %table.name, "loaded into duckdb");
        Ok(table)
    }

    fn read(&mut self, path: &Path, columns: &[ColumnSpec]) -> Result<SqlTable> {
        let struct_cols: Vec<String> = columns
            .iter()
            .map(|c| format!("{}: 'VARCHAR'", literal(&c.name)))
            .collect();
        let mut select: Vec<String> = columns
            .iter()
            .map(|c| format!("{} AS {}", typed_expr(&ident(&c.name), c.ty), ident(&c.name)))
            .collect();
        select.push(format!("row_number() OVER () - 1 AS {}", ORD));

        let sql = format!(
            "SELECT * FROM (SELECT {} FROM read_csv({}, header = true, delim = {}, quote = '\"', columns = {{{}}})) ORDER BY {}",
            select.join(", "),
            literal(&path.to_string_lossy()),
            literal(&(self.kind().delimiter() as char).to_string()),
            struct_cols.join(", "),
            ORD
        );
        self.derive(&sql, Vec::new())
            .with_context(|| format!("duckdb reading {:?}", path))
    }

    fn write(&mut self, table: &SqlTable, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating export directory {:?}", parent))?;
        }
        self.exec(&format!(
            "COPY (SELECT * EXCLUDE ({ord}) FROM {t} ORDER BY {ord}) TO {p} (HEADER, DELIMITER {d}, QUOTE '\"', FORCE_QUOTE *)",
            ord = ORD,
            t = ident(&table.name),
            p = literal(&path.to_string_lossy()),
            d = literal(&(self.kind().delimiter() as char).to_string()),
        ))
        .with_context(|| format!("duckdb writing {:?}", path))
    }

    fn columns(&self, table: &SqlTable) -> Result<Vec<String>> {
        Ok(self
            .typed_columns(table)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    fn num_rows(&self, table: &SqlTable) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", ident(&table.name)),
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    fn collect(&self, table: &SqlTable) -> Result<Frame> {
        let specs = self.typed_columns(table)?;
        let width = specs.len();
        let mut frame = Frame::new(specs);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT * EXCLUDE ({ord}) FROM {t} ORDER BY {ord}",
            ord = ORD,
            t = ident(&table.name)
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(Self::to_value(row.get::<_, SqlValue>(i)?));
            }
            frame.rows.push(values);
        }
        Ok(frame)
    }

    fn with_constant_date(
        &mut self,
        table: SqlTable,
        column: &str,
        date: NaiveDate,
    ) -> Result<SqlTable> {
        let expr = format!("DATE {}", literal(&date.format("%Y-%m-%d").to_string()));
        self.put_column(table, column, &expr, false)
    }

    fn sort_by(&mut self, table: SqlTable, column: &str) -> Result<SqlTable> {
        self.typed_columns(&table)?
            .iter()
            .find(|c| c.name == column)
            .ok_or_else(|| EtlError::MissingColumn(column.to_string()))?;
        let sql = format!(
            "SELECT * FROM (SELECT * EXCLUDE ({ord}), row_number() OVER (ORDER BY {key} ASC NULLS LAST, {ord}) - 1 AS {ord} FROM {t}) ORDER BY {ord}",
            ord = ORD,
            key = ident(column),
            t = ident(&table.name)
        );
        self.derive(&sql, vec![table])
    }

    fn project(&mut self, table: SqlTable, columns: &[(&str, &str)]) -> Result<SqlTable> {
        let existing = self.columns(&table)?;
        let mut select = Vec::with_capacity(columns.len() + 1);
        for (source, alias) in columns {
            if !existing.iter().any(|c| c == source) {
                return Err(EtlError::MissingColumn(source.to_string()).into());
            }
            select.push(format!("{} AS {}", ident(source), ident(alias)));
        }
        select.push(ORD.to_string());
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(", "),
            ident(&table.name),
            ORD
        );
        self.derive(&sql, vec![table])
    }

    fn window_average(
        &mut self,
        table: SqlTable,
        source: &str,
        target: &str,
        window: usize,
    ) -> Result<SqlTable> {
        check_window(window)?;
        let terms: Vec<String> = (0..window)
            .map(|lag| {
                if lag == 0 {
                    format!("COALESCE({}, 0)", as_double(source))
                } else {
                    format!(
                        "COALESCE(CAST(LAG({}, {}) OVER w AS DOUBLE), 0)",
                        ident(source),
                        lag
                    )
                }
            })
            .collect();
        let expr = format!(
            "({}) / LEAST(row_number() OVER w, {})",
            terms.join(" + "),
            window
        );
        self.put_column(table, target, &expr, true)
    }

    fn conditional_replace(
        &mut self,
        table: SqlTable,
        source: &str,
        fallback: Fallback<'_>,
        target: &str,
    ) -> Result<SqlTable> {
        let otherwise = match fallback {
            Fallback::Zero => "CAST(0 AS DOUBLE)".to_string(),
            Fallback::Column(name) => as_double(name),
        };
        let expr = format!(
            "CASE WHEN {src} >= 0 THEN {src_d} ELSE {otherwise} END",
            src = ident(source),
            src_d = as_double(source),
            otherwise = otherwise
        );
        self.put_column(table, target, &expr, false)
    }

    fn ratio_of_sum(
        &mut self,
        table: SqlTable,
        terms: &[&str],
        denominator: &str,
        target: &str,
    ) -> Result<SqlTable> {
        if terms.is_empty() {
            bail!("ratio of an empty sum");
        }
        let sum: Vec<String> = terms.iter().map(|t| as_double(t)).collect();
        let den = as_double(denominator);
        let expr = format!(
            "CASE WHEN {den} = 0 THEN CAST('NaN' AS DOUBLE) ELSE ({sum}) / {den} END",
            den = den,
            sum = sum.join(" + ")
        );
        self.put_column(table, target, &expr, false)
    }

    fn union(&mut self, head: SqlTable, tail: SqlTable) -> Result<SqlTable> {
        let head_cols = self.typed_columns(&head)?;
        let tail_cols = self.columns(&tail)?;
        let head_names: Vec<&str> = head_cols.iter().map(|c| c.name.as_str()).collect();
        if head_names != tail_cols {
            bail!(
                "cannot union tables with columns {:?} and {:?}",
                head_names,
                tail_cols
            );
        }

        let offset = self.num_rows(&head)?;
        let head_select: Vec<String> = head_cols.iter().map(|c| ident(&c.name)).collect();
        let tail_select: Vec<String> = head_cols
            .iter()
            .map(|c| format!("CAST({} AS {})", ident(&c.name), c.ty.sql_type()))
            .collect();
        let sql = format!(
            "SELECT {h}, {ord} FROM {head} UNION ALL SELECT {t}, {ord} + {off} FROM {tail} ORDER BY {ord}",
            h = head_select.join(", "),
            t = tail_select.join(", "),
            ord = ORD,
            head = ident(&head.name),
            tail = ident(&tail.name),
            off = offset
        );
        self.derive(&sql, vec![head, tail])
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow::Error::new(e).context("closing DuckDB session"))
    }
}
