use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a pipeline run. Everything else is plumbing and is
/// reported through `anyhow` with context.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("unknown month token `{month}` in extraction period `{token}`")]
    UnknownMonth { token: String, month: String },

    #[error("malformed extraction period `{0}` (expected <year>_<month>_<1|2>)")]
    MalformedPeriod(String),

    #[error("cannot classify workbook {0:?} into competitor/content/followers/visitors")]
    UnrecognizedCategory(PathBuf),

    #[error("workbook {path:?} has no sheet at position {position} (needed for `{table}`)")]
    MissingSheet {
        path: PathBuf,
        table: String,
        position: usize,
    },

    #[error("`{table}` sheet has {found} columns, registry expects {expected}")]
    ColumnCount {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("schema drift in `{table}`: accumulated columns {accumulated:?}, new columns {incoming:?}")]
    SchemaDrift {
        table: String,
        accumulated: Vec<String>,
        incoming: Vec<String>,
    },

    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("{engine} engine: {message}")]
    Engine {
        engine: &'static str,
        message: String,
    },
}
