// src/engine/csv_io.rs
use anyhow::{Context, Result};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use std::{fs::File, io::BufWriter, path::Path};

/// Column names from the first line of a delimited file.
pub fn read_header(path: &Path, delimiter: u8) -> Result<Vec<String>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {:?}", path))?;
    let headers = rdr
        .headers()
        .with_context(|| format!("failed to read header of {:?}", path))?;
    Ok(headers.iter().map(|h| h.trim().to_string()).collect())
}

/// Every data record of a delimited file (header skipped), in file order.
pub fn read_records(path: &Path, delimiter: u8) -> Result<Vec<StringRecord>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {:?}", path))?;
    let mut out = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record =
            result.with_context(|| format!("CSV parse error in {:?} at record {}", path, idx))?;
        out.push(record);
    }
    Ok(out)
}

/// Write a header plus rows with every field quoted. The parent directory is
/// created when missing.
pub fn write_quoted<I, R>(path: &Path, delimiter: u8, header: &[String], rows: I) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating export directory {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("could not create {:?}", path))?;
    let mut wtr = WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .from_writer(BufWriter::new(file));

    wtr.write_record(header)
        .with_context(|| format!("writing header to {:?}", path))?;
    for row in rows {
        let row: Vec<String> = row.into_iter().collect();
        wtr.write_record(&row)
            .with_context(|| format!("writing row to {:?}", path))?;
    }
    wtr.flush()
        .with_context(|| format!("flushing {:?}", path))?;
    Ok(())
}
