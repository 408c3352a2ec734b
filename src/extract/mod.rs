// src/extract/mod.rs
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use glob::glob;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EtlError;
use crate::schema::{sheets_for, table_schema, Category, SheetSpec, TableSchema};

#[derive(Debug, Clone)]
pub struct RawTable {
    /// Logical table name from the registry, e.g. `content_metrics`.
    pub name: &'static str,
    /// Name of the directory the workbook was found in.
    pub source_dir: String,
    /// Extraction-period token the workbook belongs to.
    pub period: String,
    /// Header cells as they appear in the sheet (Portuguese or English).
    pub headers: Vec<String>,
    /// Data rows as cell text; empty string means an empty cell.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Replace the sheet's headers with the registry's canonical names.
    /// Translation is positional, so the widths must agree.
    pub fn translate(mut self, schema: &TableSchema) -> Result<Self, EtlError> {
        if self.headers.is_empty() && self.rows.is_empty() {
            // blank sheet: adopt the canonical header so it still loads as a typed empty table
            self.headers = schema.columns.iter().map(|(n, _)| n.to_string()).collect();
            return Ok(self);
        }
        if self.headers.len() != schema.raw_width() {
            return Err(EtlError::ColumnCount {
                table: self.name.to_string(),
                expected: schema.raw_width(),
                found: self.headers.len(),
            });
        }
        self.headers = schema.columns.iter().map(|(n, _)| n.to_string()).collect();
        Ok(self)
    }
}

/// List `.xlsx`/`.xls` workbooks in `dir`, sorted by path.
pub fn discover_workbooks(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", dir.display());
    let mut out = Vec::new();
    for entry in glob(&pattern).context("invalid glob pattern for workbook discovery")? {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!("cannot read glob entry: {:?}", e);
                continue;
            }
        };
        let is_workbook = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| {
                e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xls")
            });
        if path.is_file() && is_workbook {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Read every registered sheet of a workbook into raw tables.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.display()))]
pub fn extract_workbook(path: &Path, category: Category, period: &str) -> Result<Vec<RawTable>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {:?}", path))?;
    let source_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut tables = Vec::new();
    for sheet in sheets_for(category) {
        let range = workbook
            .worksheet_range_at(sheet.position)
            .ok_or_else(|| EtlError::MissingSheet {
                path: path.to_path_buf(),
                table: sheet.table.to_string(),
                position: sheet.position,
            })?
            .with_context(|| format!("reading sheet #{} of {:?}", sheet.position, path))?;

        let mut raw = sheet_to_raw(&range, sheet);
        raw.source_dir = source_dir.clone();
        raw.period = period.to_string();
        debug!(
            table = sheet.table,
            rows = raw.rows.len(),
            cols = raw.headers.len(),
            "extracted sheet"
        );
        tables.push(raw);
    }
    Ok(tables)
}

/// Turn a sheet range into a raw table: skip the preamble, take one header
/// row, keep every non-blank row after it.
pub fn sheet_to_raw(range: &Range<Data>, sheet: &SheetSpec) -> RawTable {
    // calamine ranges start at the first used cell, not at A1
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
    let skip = sheet.skip_rows.saturating_sub(first_row);

    let mut rows = range.rows().skip(skip);
    let headers: Vec<String> = match rows.next() {
        Some(header) => {
            let mut cells: Vec<String> = header.iter().map(cell_text).collect();
            while cells.last().map_or(false, |c| c.is_empty()) {
                cells.pop();
            }
            cells
        }
        None => Vec::new(),
    };

    let width = headers.len();
    let body: Vec<Vec<String>> = rows
        .map(|row| {
            let mut cells: Vec<String> = row.iter().take(width).map(cell_text).collect();
            cells.resize(width, String::new());
            cells
        })
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .collect();

    RawTable {
        name: table_schema(sheet.table).map_or(sheet.table, |s| s.name),
        source_dir: String::new(),
        period: String::new(),
        headers,
        rows: body,
    }
}

/// Render one cell as text. Excel date cells become ISO dates.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

/// Workbooks written on the fly for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use anyhow::Result;
    use rust_xlsxwriter::Workbook;
    use std::path::Path;

    /// A 20-column content export with `sheets` sheets. With `title_row` the
    /// header sits below a title line, otherwise below a blank row.
    pub fn write_content_workbook(path: &Path, sheets: usize, title_row: bool) -> Result<()> {
        let mut workbook = Workbook::new();
        for _ in 0..sheets {
            let sheet = workbook.add_worksheet();
            if title_row {
                sheet.write_string(0, 0, "Métricas agregadas")?;
            }
            for c in 0..20u16 {
                sheet.write_string(1, c, format!("Coluna {}", c))?;
            }
            sheet.write_string(2, 0, "06/01/2024")?;
            sheet.write_number(2, 3, 120)?;
            sheet.write_number(2, 10, -4)?;
            sheet.write_string(3, 0, "06/02/2024")?;
            sheet.write_number(3, 3, 80)?;
            sheet.write_number(3, 10, 6)?;
        }
        workbook.save(path)?;
        Ok(())
    }
}
