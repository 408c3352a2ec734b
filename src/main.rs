use anyhow::{Context, Result};
use clap::Parser;
use linkedin_etl_bench::{run, ConfigArgs};
use std::{fs::File, io::BufWriter, path::PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run the LinkedIn analytics ETL once with one engine"
)]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) resolve configuration ────────────────────────────────────
    let args = Args::parse();
    let cfg = args.config.resolve()?;
    info!(
        engine = %cfg.engine,
        period = %cfg.period,
        clean = %cfg.clean_dir.display(),
        extraction = %cfg.extraction_dir.display(),
        export = %cfg.export_dir.display(),
        "startup"
    );

    // ─── 3) run ──────────────────────────────────────────────────────
    let report = run(&cfg)?;
    for stage in &report.stages {
        info!(stage = %stage.stage, seconds = stage.seconds, "timing");
    }

    // ─── 4) report ───────────────────────────────────────────────────
    match &args.report {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating report {:?}", path))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &report)
                .with_context(|| format!("writing report {:?}", path))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
