// Subdirectories
pub mod missing;

pub use missing::{MissingDataDetector, MissingDataSummary, MissingEntry, MissingFilters};
