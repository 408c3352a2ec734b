pub mod category;
pub mod registry;
pub mod types;

pub use category::{detect_category, Category};
pub use registry::{
    sheets_for, table_from_file_name, table_schema, SheetSpec, TableSchema, ACCUMULATED_PREFIX, EXTRACTION_RANGE,
};
pub use types::{ColumnSpec, ColumnType};
