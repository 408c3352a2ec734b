pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod period;
pub mod pipeline;
pub mod schema;
pub mod transform;

pub use config::{Config, ConfigArgs, EngineKind};
pub use engine::TableEngine;
pub use error::EtlError;
pub use pipeline::{run, run_pipeline, RunReport, StageClock};
