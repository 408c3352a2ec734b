// src/pipeline.rs
//! One ETL run: load accumulated state, extract the period's workbooks, date
//! and sanitize the new tables, append them to the state and export it.
//! Written once over [`TableEngine`]; [`run`] picks the engine.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::engine::csv_io::read_header;
use crate::engine::{ArrowEngine, DuckEngine, EngineKind, RowEngine, TableEngine};
use crate::error::EtlError;
use crate::extract::{discover_workbooks, extract_workbook, RawTable};
use crate::schema::{
    detect_category, table_from_file_name, table_schema, ColumnSpec, ColumnType,
    ACCUMULATED_PREFIX,
};
use crate::transform::{
    add_extraction_date, fold_new_tables, sanitize_content_metrics, CONTENT_METRICS_TABLE,
};

/// Accumulated tables by logical name.
pub type TableSet<T> = BTreeMap<String, T>;

/// Wall-clock time of one pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub seconds: f64,
}

/// One exported file.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedTable {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// What a run did and how long each stage took.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub engine: EngineKind,
    pub period: String,
    pub extraction_date: NaiveDate,
    pub workbooks: Vec<PathBuf>,
    /// Workbooks whose category could not be detected.
    pub skipped_files: Vec<PathBuf>,
    pub state_tables: usize,
    pub extracted_tables: usize,
    pub exported: Vec<ExportedTable>,
    pub stages: Vec<StageTiming>,
    pub total_seconds: f64,
}

/// Times named stages, each inside its own `tracing` span.
#[derive(Debug, Default)]
pub struct StageClock {
    stages: Vec<StageTiming>,
}

impl StageClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage<T>(&mut self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let span = info_span!("stage", stage = name);
        let _guard = span.enter();
        let start = Instant::now();
        let out = f();
        let seconds = start.elapsed().as_secs_f64();
        info!(stage = name, seconds, ok = out.is_ok(), "stage done");
        self.stages.push(StageTiming {
            stage: name.to_string(),
            seconds,
        });
        out
    }

    pub fn into_stages(self) -> Vec<StageTiming> {
        self.stages
    }
}

/// Open the configured engine and run the pipeline with it.
pub fn run(cfg: &Config) -> Result<RunReport> {
    match cfg.engine {
        EngineKind::Duckdb => run_pipeline(DuckEngine::open_in_memory()?, cfg),
        EngineKind::Rows => run_pipeline(RowEngine::new(), cfg),
        EngineKind::Arrow => run_pipeline(ArrowEngine::new(), cfg),
    }
}

#[tracing::instrument(level = "info", skip(engine, cfg), fields(engine = %engine.kind(), period = %cfg.period))]
pub fn run_pipeline<E: TableEngine>(mut engine: E, cfg: &Config) -> Result<RunReport> {
    let started = Instant::now();
    let mut clock = StageClock::new();

    // ─── 1) period → extraction date ───
    let period = cfg.extraction_period()?;
    let extraction_date = period.extraction_date()?;
    info!(%extraction_date, "extraction date");

    // ─── 2) accumulated state ───
    let mut state = clock.stage("read_state", || load_accumulated(&mut engine, &cfg.clean_dir))?;
    let state_tables = state.len();

    // ─── 3) workbooks → raw tables ───
    let (workbooks, skipped_files, raws) = clock.stage("extract", || {
        extract_all(&cfg.extraction_dir, &period.token, cfg.strict_categories)
    })?;
    let extracted_tables = raws.len();

    // ─── 4) raw tables → engine tables ───
    let loaded = clock.stage("load", || load_raw_tables(&mut engine, raws))?;

    // ─── 5) date + sanitize ───
    let transformed = clock.stage("transform", || {
        transform_tables(&mut engine, loaded, extraction_date)
    })?;

    // ─── 6) append onto state ───
    clock.stage("concatenate", || {
        accumulate(&mut engine, &mut state, transformed)
    })?;

    // ─── 7) export ───
    let exported = clock.stage("export", || export_tables(&mut engine, &state, &cfg.export_dir))?;

    engine.close()?;
    let report = RunReport {
        engine: cfg.engine,
        period: period.token.clone(),
        extraction_date,
        workbooks,
        skipped_files,
        state_tables,
        extracted_tables,
        exported,
        stages: clock.into_stages(),
        total_seconds: started.elapsed().as_secs_f64(),
    };
    info!(
        exported = report.exported.len(),
        skipped = report.skipped_files.len(),
        seconds = report.total_seconds,
        "pipeline finished"
    );
    Ok(report)
}

/// Column types for a persisted file, by header name. Unknown columns are text.
fn state_columns(table: &str, header: &[String]) -> Vec<ColumnSpec> {
    let known = table_schema(table)
        .map(|s| s.accumulated_columns())
        .unwrap_or_default();
    header
        .iter()
        .map(|name| {
            let ty = known
                .iter()
                .find(|c| &c.name == name)
                .map(|c| c.ty)
                .unwrap_or_else(|| {
                    warn!(table, column = %name, "column not in registry, reading as text");
                    ColumnType::Text
                });
            ColumnSpec::new(name.clone(), ty)
        })
        .collect()
}

/// Read every `all_extractions_<name>.csv` in `dir`. A missing directory means
/// there is no prior state.
pub fn load_accumulated<E: TableEngine>(engine: &mut E, dir: &Path) -> Result<TableSet<E::Table>> {
    let mut out = TableSet::new();
    if !dir.is_dir() {
        info!(dir = %dir.display(), "no accumulated state");
        return Ok(out);
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {:?}", dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for path in files {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) if n.starts_with(ACCUMULATED_PREFIX) => n.to_string(),
            _ => continue,
        };
        let schema = match table_from_file_name(&file_name) {
            Some(s) => s,
            None => {
                warn!(file = %file_name, "accumulated file for unknown table, skipping");
                continue;
            }
        };

        let header = read_header(&path, engine.kind().delimiter())?;
        let columns = state_columns(schema.name, &header);
        let table = engine
            .read(&path, &columns)
            .with_context(|| format!("loading accumulated {:?}", path))?;
        info!(table = schema.name, rows = engine.num_rows(&table)?, "accumulated state loaded");
        out.insert(schema.name.to_string(), table);
    }
    Ok(out)
}

/// Discover, classify and extract the workbooks of one period.
pub fn extract_all(
    dir: &Path,
    period: &str,
    strict_categories: bool,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>, Vec<RawTable>)> {
    let workbooks = discover_workbooks(dir)?;
    let mut used = Vec::new();
    let mut skipped = Vec::new();
    let mut raws = Vec::new();

    for path in workbooks {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let category = match detect_category(&file_name) {
            Some(c) => c,
            None if strict_categories => {
                return Err(EtlError::UnrecognizedCategory(path).into());
            }
            None => {
                warn!(file = %file_name, "unrecognized workbook category, skipping");
                skipped.push(path);
                continue;
            }
        };

        for raw in extract_workbook(&path, category, period)? {
            let schema = table_schema(raw.name)
                .ok_or_else(|| anyhow!("no schema registered for `{}`", raw.name))?;
            raws.push(raw.translate(schema)?);
        }
        used.push(path);
    }
    info!(workbooks = used.len(), tables = raws.len(), "extraction done");
    Ok((used, skipped, raws))
}

/// Type raw tables with the engine, keeping extraction order.
pub fn load_raw_tables<E: TableEngine>(
    engine: &mut E,
    raws: Vec<RawTable>,
) -> Result<Vec<(String, E::Table)>> {
    let mut out = Vec::with_capacity(raws.len());
    for raw in raws {
        let schema = table_schema(raw.name)
            .ok_or_else(|| anyhow!("no schema registered for `{}`", raw.name))?;
        let table = engine.load(&raw, schema)?;
        out.push((raw.name.to_string(), table));
    }
    Ok(out)
}

/// Add the extraction date to every table and clean `content_metrics`.
pub fn transform_tables<E: TableEngine>(
    engine: &mut E,
    tables: Vec<(String, E::Table)>,
    date: NaiveDate,
) -> Result<Vec<(String, E::Table)>> {
    let mut out = Vec::with_capacity(tables.len());
    for (name, table) in tables {
        let table = add_extraction_date(engine, table, date)?;
        let table = if name == CONTENT_METRICS_TABLE {
            sanitize_content_metrics(engine, table)?
        } else {
            table
        };
        out.push((name, table));
    }
    Ok(out)
}

/// Append new tables onto the state, grouping by logical name in first-seen
/// order.
pub fn accumulate<E: TableEngine>(
    engine: &mut E,
    state: &mut TableSet<E::Table>,
    new_tables: Vec<(String, E::Table)>,
) -> Result<()> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, Vec<E::Table>> = BTreeMap::new();
    for (name, table) in new_tables {
        if !grouped.contains_key(&name) {
            order.push(name.clone());
        }
        grouped.entry(name).or_default().push(table);
    }

    for name in order {
        let tables = grouped.remove(&name).unwrap_or_default();
        let previous = state.remove(&name);
        if let Some(table) = fold_new_tables(engine, &name, previous, tables)? {
            state.insert(name, table);
        }
    }
    Ok(())
}

/// Write every accumulated table to `<dir>/all_extractions_<name>.csv`.
pub fn export_tables<E: TableEngine>(
    engine: &mut E,
    state: &TableSet<E::Table>,
    dir: &Path,
) -> Result<Vec<ExportedTable>> {
    fs::create_dir_all(dir).with_context(|| format!("creating export directory {:?}", dir))?;
    let mut exported = Vec::with_capacity(state.len());
    for (name, table) in state {
        let schema =
            table_schema(name).ok_or_else(|| anyhow!("no schema registered for `{}`", name))?;
        let path = dir.join(schema.accumulated_file_name());
        engine.write(table, &path)?;
        let rows = engine.num_rows(table)?;
        info!(table = %name, rows, path = %path.display(), "exported");
        exported.push(ExportedTable {
            name: name.clone(),
            path,
            rows,
        });
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Frame;
    use crate::schema::registry::CONTENT_METRICS;
    use tempfile::tempdir;
    use tracing_subscriber::FmtSubscriber;

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn content_raw(rows: &[(&str, &str, &str)]) -> RawTable {
        RawTable {
            name: "content_metrics",
            source_dir: "-".into(),
            period: "2024_Jun_1".into(),
            headers: CONTENT_METRICS
                .columns
                .iter()
                .map(|(n, _)| n.to_string())
                .collect(),
            rows: rows
                .iter()
                .map(|(date, imp, reactions)| {
                    let mut cells = vec!["1".to_string(); 20];
                    cells[0] = date.to_string();
                    cells[3] = imp.to_string();
                    cells[10] = reactions.to_string();
                    cells
                })
                .collect(),
        }
    }

    fn location_raw(rows: &[(&str, &str)]) -> RawTable {
        RawTable {
            name: "followers_location",
            source_dir: "-".into(),
            period: "2024_Jun_1".into(),
            headers: vec!["Location".into(), "Total Followers".into()],
            rows: rows
                .iter()
                .map(|(l, n)| vec![l.to_string(), n.to_string()])
                .collect(),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Run the in-memory stages on synthetic raw tables and export them.
    fn export_run<E: TableEngine>(
        engine: &mut E,
        clean_dir: &Path,
        export_dir: &Path,
        raws: Vec<RawTable>,
        date: NaiveDate,
    ) -> Result<Vec<ExportedTable>> {
        let mut state = load_accumulated(engine, clean_dir)?;
        let loaded = load_raw_tables(engine, raws)?;
        let transformed = transform_tables(engine, loaded, date)?;
        accumulate(engine, &mut state, transformed)?;
        export_tables(engine, &state, export_dir)
    }

    fn collected<E: TableEngine>(engine: &mut E, dir: &Path) -> Result<BTreeMap<String, Frame>> {
        let state = load_accumulated(engine, dir)?;
        state
            .iter()
            .map(|(name, t)| Ok((name.clone(), engine.collect(t)?)))
            .collect()
    }

    fn two_periods<E: TableEngine>(mut engine: E) -> Result<()> {
        let root = tempdir()?;
        let first = root.path().join("first");
        let second = root.path().join("second");

        // no state yet: everything comes from the new tables
        let exported = export_run(
            &mut engine,
            &root.path().join("missing"),
            &first,
            vec![
                content_raw(&[("06/02/2024", "100", "10"), ("06/01/2024", "100", "-5")]),
                location_raw(&[("Recife", "3")]),
            ],
            ymd(2024, 6, 15),
        )?;
        assert_eq!(exported.len(), 2);
        assert!(first.join("all_extractions_content_metrics.csv").is_file());

        // second period appends below the first
        export_run(
            &mut engine,
            &first,
            &second,
            vec![location_raw(&[("Natal", "4")]), location_raw(&[("Olinda", "5")])],
            ymd(2024, 6, 30),
        )?;

        let before = collected(&mut engine, &first)?;
        let after = collected(&mut engine, &second)?;
        // content metrics had no new rows and is carried over unchanged
        assert_eq!(before["content_metrics"], after["content_metrics"]);
        assert_eq!(before["content_metrics"].columns.len(), 8);

        let loc = &after["followers_location"];
        assert_eq!(
            loc.column("Location")?
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>(),
            vec!["Recife", "Natal", "Olinda"]
        );
        assert_eq!(
            loc.column("Extraction Range")?
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>(),
            vec!["2024-06-15", "2024-06-30", "2024-06-30"]
        );
        engine.close()
    }

    #[test]
    fn state_round_trips_through_duckdb() -> Result<()> {
        init_test_logging();
        two_periods(DuckEngine::open_in_memory()?)
    }

    #[test]
    fn state_round_trips_through_rows() -> Result<()> {
        init_test_logging();
        two_periods(RowEngine::new())
    }

    #[test]
    fn state_round_trips_through_arrow() -> Result<()> {
        init_test_logging();
        two_periods(ArrowEngine::new())
    }

    #[test]
    fn unknown_workbooks_are_skipped_or_fatal() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("export_2024.xlsx"), b"")?;

        let (used, skipped, raws) = extract_all(dir.path(), "2024_Jun_1", false)?;
        assert!(used.is_empty());
        assert!(raws.is_empty());
        assert_eq!(skipped, vec![dir.path().join("export_2024.xlsx")]);

        let err = extract_all(dir.path(), "2024_Jun_1", true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::UnrecognizedCategory(_))
        ));
        Ok(())
    }

    #[test]
    fn full_run_with_only_state() -> Result<()> {
        init_test_logging();
        let root = tempdir()?;
        let clean = root.path().join("clean");
        let mut engine = RowEngine::new();
        export_run(
            &mut engine,
            &root.path().join("none"),
            &clean,
            vec![location_raw(&[("Recife", "3")])],
            ymd(2024, 6, 15),
        )?;

        let extraction = root.path().join("raw");
        fs::create_dir_all(&extraction)?;
        let cfg = Config {
            clean_dir: clean,
            extraction_dir: extraction,
            export_dir: root.path().join("export"),
            engine: EngineKind::Rows,
            period: "2024_Jun_2".into(),
            strict_categories: false,
        };
        let report = run(&cfg)?;
        assert_eq!(report.extraction_date, ymd(2024, 6, 30));
        assert_eq!(report.state_tables, 1);
        assert_eq!(report.extracted_tables, 0);
        assert_eq!(report.exported.len(), 1);
        assert_eq!(report.exported[0].rows, 1);
        let stages: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec!["read_state", "extract", "load", "transform", "concatenate", "export"]
        );
        let json = serde_json::to_string(&report)?;
        assert!(json.contains("\"engine\":\"rows\""));
        Ok(())
    }

    fn blocked_export<E: TableEngine>(mut engine: E) -> Result<()> {
        let root = tempdir()?;
        // a regular file where the export directory should go
        let blocked = root.path().join("export");
        fs::write(&blocked, b"")?;
        let result = export_run(
            &mut engine,
            &root.path().join("none"),
            &blocked.join("nested"),
            vec![location_raw(&[("Recife", "3")])],
            ymd(2024, 6, 15),
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn unwritable_export_destination_is_fatal() -> Result<()> {
        blocked_export(DuckEngine::open_in_memory()?)?;
        blocked_export(RowEngine::new())?;
        blocked_export(ArrowEngine::new())
    }

    #[test]
    fn workbook_runs_agree_across_engines() -> Result<()> {
        init_test_logging();
        let root = tempdir()?;
        let extraction = root.path().join("raw");
        fs::create_dir_all(&extraction)?;
        crate::extract::fixtures::write_content_workbook(
            &extraction.join("company_content_2024.xlsx"),
            2,
            true,
        )?;

        let mut frames = Vec::new();
        for engine in EngineKind::ALL {
            let export = root.path().join("export").join(engine.as_str());
            let cfg = Config {
                clean_dir: root.path().join("clean").join(engine.as_str()),
                extraction_dir: extraction.clone(),
                export_dir: export.clone(),
                engine,
                period: "2024_Jun_1".into(),
                strict_categories: true,
            };
            let report = run(&cfg)?;
            assert_eq!(report.workbooks.len(), 1);
            assert_eq!(report.extracted_tables, 2);
            let metrics = report
                .exported
                .iter()
                .find(|t| t.name == "content_metrics")
                .expect("content metrics exported");
            assert_eq!(metrics.rows, 2);

            let state = match engine {
                EngineKind::Duckdb => collected(&mut DuckEngine::open_in_memory()?, &export)?,
                EngineKind::Rows => collected(&mut RowEngine::new(), &export)?,
                EngineKind::Arrow => collected(&mut ArrowEngine::new(), &export)?,
            };
            frames.push(state);
        }

        let reactions = frames[0]["content_metrics"].f64_column("Reactions (total)")?;
        // -4 on the first row is repaired from the floored average (0) / 1
        assert_eq!(reactions, vec![Some(0.0), Some(6.0)]);
        assert_eq!(frames[0], frames[1], "duckdb vs rows");
        assert_eq!(frames[1], frames[2], "rows vs arrow");
        Ok(())
    }

    #[test]
    fn bad_period_fails_before_any_work() {
        let cfg = Config {
            period: "2024_Foo_1".into(),
            engine: EngineKind::Rows,
            ..Config::default()
        };
        let err = run(&cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::UnknownMonth { .. })
        ));
    }
}
