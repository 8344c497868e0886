// Subdirectories
pub mod gapfill;
pub mod orchestrator;
pub mod schema;
pub mod target;

pub use gapfill::{GapDownloader, GapFillReport};
pub use orchestrator::{DownloadOrchestrator, DownloadReport, TargetStatus};
pub use target::{DownloadTarget, shard_of, targets_from_definitions};
