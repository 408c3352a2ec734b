use serde::{Deserialize, Serialize};
use std::fmt;

/// Workbook category, decided from the export's file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Competitor,
    Content,
    Followers,
    Visitors,
}

impl Category {
    /// Match order matters: the first category whose token appears wins.
    pub const ALL: [Category; 4] = [
        Category::Competitor,
        Category::Content,
        Category::Followers,
        Category::Visitors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Competitor => "competitor",
            Category::Content => "content",
            Category::Followers => "followers",
            Category::Visitors => "visitors",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a workbook by substring of its file name. `None` means the file
/// belongs to no known category.
pub fn detect_category(file_name: &str) -> Option<Category> {
    Category::ALL
        .into_iter()
        .find(|c| file_name.contains(c.as_str()))
}
