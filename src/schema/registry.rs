// src/schema/registry.rs
//! Immutable sheet/schema registry shared by every engine.
//!
//! For each workbook category: which sheet positions to read, how many
//! preamble rows precede the header, and the canonical English column list
//! (with logical types) of the resulting logical table.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::category::Category;
use super::types::{ColumnSpec, ColumnType};
use super::types::ColumnType::{Date, Float, Integer, Text};

/// Constant date column appended to every canonical table.
pub const EXTRACTION_RANGE: &str = "Extraction Range";

/// File-name prefix of persisted accumulated tables: `all_extractions_<name>.csv`.
pub const ACCUMULATED_PREFIX: &str = "all_extractions_";

/// One sheet to pull out of a workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetSpec {
    pub table: &'static str,
    pub position: usize,
    /// Rows above the header row.
    pub skip_rows: usize,
}

/// Canonical schema of one logical table.
#[derive(Debug, PartialEq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
    /// Columns after cleaning, when a cleaning step reshapes the table.
    pub clean_columns: Option<&'static [(&'static str, ColumnType)]>,
}

impl TableSchema {
    pub fn raw_width(&self) -> usize {
        self.columns.len()
    }

    /// Translated columns plus the extraction date, as produced by load + dating.
    pub fn canonical_columns(&self) -> Vec<ColumnSpec> {
        let mut cols: Vec<ColumnSpec> = self
            .columns
            .iter()
            .map(|(name, ty)| ColumnSpec::new(*name, *ty))
            .collect();
        cols.push(ColumnSpec::new(EXTRACTION_RANGE, Date));
        cols
    }

    /// Columns of the persisted accumulated table.
    pub fn accumulated_columns(&self) -> Vec<ColumnSpec> {
        match self.clean_columns {
            Some(clean) => clean
                .iter()
                .map(|(name, ty)| ColumnSpec::new(*name, *ty))
                .collect(),
            None => self.canonical_columns(),
        }
    }

    pub fn accumulated_file_name(&self) -> String {
        format!("{}{}.csv", ACCUMULATED_PREFIX, self.name)
    }
}

// ─── sheets per category ─────────────────────────────────────────────

const COMPETITOR_SHEETS: &[SheetSpec] = &[SheetSpec {
    table: "competitor",
    position: 0,
    skip_rows: 1,
}];

const CONTENT_SHEETS: &[SheetSpec] = &[
    SheetSpec {
        table: "content_metrics",
        position: 0,
        skip_rows: 1,
    },
    SheetSpec {
        table: "content_posts",
        position: 1,
        skip_rows: 1,
    },
];

const FOLLOWERS_SHEETS: &[SheetSpec] = &[
    SheetSpec {
        table: "followers_new",
        position: 0,
        skip_rows: 0,
    },
    SheetSpec {
        table: "followers_location",
        position: 1,
        skip_rows: 0,
    },
    SheetSpec {
        table: "followers_function",
        position: 2,
        skip_rows: 0,
    },
    SheetSpec {
        table: "followers_experience",
        position: 3,
        skip_rows: 0,
    },
    SheetSpec {
        table: "followers_industry",
        position: 4,
        skip_rows: 0,
    },
    SheetSpec {
        table: "followers_company_size",
        position: 5,
        skip_rows: 0,
    },
];

const VISITORS_SHEETS: &[SheetSpec] = &[
    SheetSpec {
        table: "visitors_metrics",
        position: 0,
        skip_rows: 0,
    },
    SheetSpec {
        table: "visitors_location",
        position: 1,
        skip_rows: 0,
    },
    SheetSpec {
        table: "visitors_function",
        position: 2,
        skip_rows: 0,
    },
    SheetSpec {
        table: "visitors_experience",
        position: 3,
        skip_rows: 0,
    },
    SheetSpec {
        table: "visitors_industry",
        position: 4,
        skip_rows: 0,
    },
    SheetSpec {
        table: "visitors_company_size",
        position: 5,
        skip_rows: 0,
    },
];

/// Sheets to read for a workbook of `category`, in sheet order.
pub fn sheets_for(category: Category) -> &'static [SheetSpec] {
    match category {
        Category::Competitor => COMPETITOR_SHEETS,
        Category::Content => CONTENT_SHEETS,
        Category::Followers => FOLLOWERS_SHEETS,
        Category::Visitors => VISITORS_SHEETS,
    }
}

// ─── canonical columns ───────────────────────────────────────────────

pub const CONTENT_METRICS: TableSchema = TableSchema {
    name: "content_metrics",
    columns: &[
        ("Date", Date),
        ("Impressions (organic)", Integer),
        ("Impressions (sponsored)", Integer),
        ("Impressions (total)", Integer),
        ("Unique impressions (organic)", Integer),
        ("Clicks (organic)", Integer),
        ("Clicks (sponsored)", Integer),
        ("Clicks (total)", Integer),
        ("Reactions (organic)", Integer),
        ("Reactions (sponsored)", Integer),
        ("Reactions (total)", Integer),
        ("Comments (organic)", Integer),
        ("Comments (sponsored)", Integer),
        ("Comments (total)", Integer),
        ("Shares (organic)", Integer),
        ("Shares (sponsored)", Integer),
        ("Shares (total)", Integer),
        ("Engagement rate (organic)", Float),
        ("Engagement rate (sponsored)", Float),
        ("Engagement rate (total)", Float),
    ],
    clean_columns: Some(&[
        ("Date", Date),
        ("Impressions (total)", Integer),
        ("Clicks (total)", Float),
        ("Reactions (total)", Float),
        ("Comments (total)", Float),
        ("Shares (total)", Float),
        ("Engagement Rate (total)", Float),
        (EXTRACTION_RANGE, Date),
    ]),
};

const CONTENT_POSTS: TableSchema = TableSchema {
    name: "content_posts",
    columns: &[
        ("Post Title", Text),
        ("Post Link", Text),
        ("Post Type", Text),
        ("Campaign Name", Text),
        ("Published by", Text),
        ("Date", Date),
        ("Campaign Start Date", Date),
        ("Campaign End Date", Date),
        ("Audience", Text),
        ("Impressions", Integer),
        ("Views (excluding off-site video views)", Integer),
        ("Off-site Views", Integer),
        ("Clicks", Integer),
        ("Click-Through Rate (CTR)", Float),
        ("Likes", Integer),
        ("Comments", Integer),
        ("Shares", Integer),
        ("Followers", Integer),
        ("Engagement Rate", Float),
        ("Content Type", Text),
    ],
    clean_columns: None,
};

const FOLLOWERS_NEW: TableSchema = TableSchema {
    name: "followers_new",
    columns: &[
        ("Date", Date),
        ("Followers Sponsored", Integer),
        ("Followers Organic", Integer),
        ("Total Followers", Integer),
    ],
    clean_columns: None,
};

const FOLLOWERS_LOCATION: TableSchema = TableSchema {
    name: "followers_location",
    columns: &[("Location", Text), ("Total Followers", Integer)],
    clean_columns: None,
};

const FOLLOWERS_FUNCTION: TableSchema = TableSchema {
    name: "followers_function",
    columns: &[("Function", Text), ("Total Followers", Integer)],
    clean_columns: None,
};

const FOLLOWERS_EXPERIENCE: TableSchema = TableSchema {
    name: "followers_experience",
    columns: &[("Experience Level", Text), ("Total Followers", Integer)],
    clean_columns: None,
};

const FOLLOWERS_INDUSTRY: TableSchema = TableSchema {
    name: "followers_industry",
    columns: &[("Industry", Text), ("Total Followers", Integer)],
    clean_columns: None,
};

const FOLLOWERS_COMPANY_SIZE: TableSchema = TableSchema {
    name: "followers_company_size",
    columns: &[("Company Size", Text), ("Total Followers", Integer)],
    clean_columns: None,
};

const VISITORS_METRICS: TableSchema = TableSchema {
    name: "visitors_metrics",
    columns: &[
        ("Date", Date),
        ("Page Views Overview (Desktop)", Integer),
        ("Page Views Overview (Mobile Devices)", Integer),
        ("Page Views Overview (Total)", Integer),
        ("Unique Visitors Overview (Desktop)", Integer),
        ("Unique Visitors Overview (Mobile Devices)", Integer),
        ("Unique Visitors Overview (Total)", Integer),
        ("Page Views Day by Day (Desktop)", Integer),
        ("Page Views Day by Day (Mobile Devices)", Integer),
        ("Page Views Day by Day (Total)", Integer),
        ("Unique Visitors Day by Day (Desktop)", Integer),
        ("Unique Visitors Day by Day (Mobile Devices)", Integer),
        ("Unique Visitors Day by Day (Total)", Integer),
        ("Page Views Jobs (Desktop)", Integer),
        ("Page Views Jobs (Mobile Devices)", Integer),
        ("Page Views Jobs (Total)", Integer),
        ("Unique Visitors Jobs (Desktop)", Integer),
        ("Unique Visitors Jobs (Mobile Devices)", Integer),
        ("Unique Visitors Jobs (Total)", Integer),
        ("Total Page Views (Desktop)", Integer),
        ("Total Page Views (Mobile Devices)", Integer),
        ("Total Page Views (Total)", Integer),
        ("Total Unique Visitors (Desktop)", Integer),
        ("Total Unique Visitors (Mobile Devices)", Integer),
        ("Total Unique Visitors (Total)", Integer),
    ],
    clean_columns: None,
};

const VISITORS_LOCATION: TableSchema = TableSchema {
    name: "visitors_location",
    columns: &[("Location", Text), ("Total Views", Integer)],
    clean_columns: None,
};

const VISITORS_FUNCTION: TableSchema = TableSchema {
    name: "visitors_function",
    columns: &[("Function", Text), ("Total Views", Integer)],
    clean_columns: None,
};

const VISITORS_EXPERIENCE: TableSchema = TableSchema {
    name: "visitors_experience",
    columns: &[("Experience Level", Text), ("Total Views", Integer)],
    clean_columns: None,
};

const VISITORS_INDUSTRY: TableSchema = TableSchema {
    name: "visitors_industry",
    columns: &[("Industry", Text), ("Total Views", Integer)],
    clean_columns: None,
};

const VISITORS_COMPANY_SIZE: TableSchema = TableSchema {
    name: "visitors_company_size",
    columns: &[("Company Size", Text), ("Total Views", Integer)],
    clean_columns: None,
};

const COMPETITOR: TableSchema = TableSchema {
    name: "competitor",
    columns: &[
        ("Page", Text),
        ("Total Followers", Integer),
        ("New Followers", Integer),
        ("Total Post Engagements", Float),
        ("Total Posts", Integer),
    ],
    clean_columns: None,
};

static ALL_TABLES: &[&TableSchema] = &[
    &CONTENT_METRICS,
    &CONTENT_POSTS,
    &FOLLOWERS_NEW,
    &FOLLOWERS_LOCATION,
    &FOLLOWERS_FUNCTION,
    &FOLLOWERS_EXPERIENCE,
    &FOLLOWERS_INDUSTRY,
    &FOLLOWERS_COMPANY_SIZE,
    &VISITORS_METRICS,
    &VISITORS_LOCATION,
    &VISITORS_FUNCTION,
    &VISITORS_EXPERIENCE,
    &VISITORS_INDUSTRY,
    &VISITORS_COMPANY_SIZE,
    &COMPETITOR,
];

static BY_NAME: Lazy<HashMap<&'static str, &'static TableSchema>> =
    Lazy::new(|| ALL_TABLES.iter().map(|t| (t.name, *t)).collect());

/// Look up the schema of a logical table.
pub fn table_schema(name: &str) -> Option<&'static TableSchema> {
    BY_NAME.get(name).copied()
}

/// Logical name encoded in an accumulated-state file name, if it is one.
pub fn table_from_file_name(file_name: &str) -> Option<&'static TableSchema> {
    file_name
        .strip_prefix(ACCUMULATED_PREFIX)
        .and_then(|s| s.strip_suffix(".csv"))
        .and_then(table_schema)
}
