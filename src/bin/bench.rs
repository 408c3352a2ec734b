use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use linkedin_etl_bench::{extract::discover_workbooks, run, ConfigArgs, EngineKind, RunReport};
use serde::Serialize;
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};
use sysinfo::System;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Benchmark the ETL engines over one data-volume scenario"
)]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Scenario label, e.g. 1y, 2y or 6y
    #[arg(long, default_value = "1y")]
    scenario: String,

    /// Engines to run, in order
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = EngineKind::ALL.to_vec())]
    engines: Vec<EngineKind>,

    /// How many times each engine runs
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Directory for engine_metrics.csv and scenarios.csv
    #[arg(long, default_value = "metrics")]
    metrics_dir: PathBuf,
}

/// One row of `engine_metrics.csv`.
#[derive(Debug, Serialize)]
struct StageMetric<'a> {
    timestamp: String,
    scenario: &'a str,
    engine: &'a str,
    run: usize,
    stage: &'a str,
    seconds: f64,
}

/// One row of `scenarios.csv`.
#[derive(Debug, Serialize)]
struct ScenarioRow {
    timestamp: String,
    scenario: String,
    workbooks: usize,
    input_bytes: u64,
    host: String,
    os: String,
    os_version: String,
    cpu: String,
    cpus: usize,
    total_memory_bytes: u64,
}

/// Append serializable rows to a CSV file, writing the header only when the
/// file is new.
fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let exists = path.is_file() && fs::metadata(path)?.len() > 0;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {:?}", path))?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!exists)
        .from_writer(file);
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("appending to {:?}", path))?;
    }
    wtr.flush()?;
    Ok(())
}

fn stage_rows<'a>(scenario: &'a str, run: usize, report: &'a RunReport) -> Vec<StageMetric<'a>> {
    let timestamp = Utc::now().to_rfc3339();
    let mut rows: Vec<StageMetric> = report
        .stages
        .iter()
        .map(|s| StageMetric {
            timestamp: timestamp.clone(),
            scenario,
            engine: report.engine.as_str(),
            run,
            stage: &s.stage,
            seconds: s.seconds,
        })
        .collect();
    rows.push(StageMetric {
        timestamp,
        scenario,
        engine: report.engine.as_str(),
        run,
        stage: "total",
        seconds: report.total_seconds,
    });
    rows
}

fn scenario_row(scenario: &str, extraction_dir: &Path) -> Result<ScenarioRow> {
    let workbooks = discover_workbooks(extraction_dir)?;
    let input_bytes = workbooks
        .iter()
        .map(|p| fs::metadata(p).map(|m| m.len()).unwrap_or(0))
        .sum();

    let sys = System::new_all();
    Ok(ScenarioRow {
        timestamp: Utc::now().to_rfc3339(),
        scenario: scenario.to_string(),
        workbooks: workbooks.len(),
        input_bytes,
        host: System::host_name().unwrap_or_default(),
        os: System::name().unwrap_or_default(),
        os_version: System::os_version().unwrap_or_default(),
        cpu: sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_default(),
        cpus: sys.cpus().len(),
        total_memory_bytes: sys.total_memory(),
    })
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let args = Args::parse();
    let base = args.config.resolve()?;
    let metrics_path = args.metrics_dir.join("engine_metrics.csv");
    let scenarios_path = args.metrics_dir.join("scenarios.csv");

    // ─── 2) scenario metadata ────────────────────────────────────────
    let scenario = scenario_row(&args.scenario, &base.extraction_dir)?;
    info!(
        scenario = %scenario.scenario,
        workbooks = scenario.workbooks,
        input_bytes = scenario.input_bytes,
        cpus = scenario.cpus,
        "benchmark start"
    );
    append_rows(&scenarios_path, &[scenario])?;

    // ─── 3) engines, one after another ──────────────────────────────
    for engine in &args.engines {
        for run_idx in 0..args.repeat.max(1) {
            // each engine keeps state in its own delimiter, so it gets its own directories
            let mut cfg = base.clone();
            cfg.engine = *engine;
            cfg.clean_dir = base.clean_dir.join(engine.as_str());
            cfg.export_dir = base
                .export_dir
                .join(&args.scenario)
                .join(engine.as_str())
                .join(format!("run_{}", run_idx));

            match run(&cfg) {
                Ok(report) => {
                    info!(
                        engine = %engine,
                        run = run_idx,
                        seconds = report.total_seconds,
                        "engine finished"
                    );
                    append_rows(&metrics_path, &stage_rows(&args.scenario, run_idx, &report))?;
                }
                Err(e) => {
                    error!(engine = %engine, run = run_idx, "engine failed: {:#}", e);
                    return Err(e);
                }
            }
        }
    }

    info!(metrics = %metrics_path.display(), "benchmark done");
    Ok(())
}
