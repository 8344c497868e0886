// === Public Modules (The Canonical Paths) ===
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod validator;
pub mod vendor;

// === Private Implementation Details ===
mod storage;

// === Facades (Re-exporting internals) ===
// Expose the storage handle without making the whole module public.
pub use crate::storage::{TickStore, paths};

// === Convenience ===
pub use crate::catalog::{InstrumentDefinition, InstrumentKey};
pub use crate::config::Config;
pub use crate::error::{TickforgeError, TickforgeResult};
pub use crate::pipeline::Pipeline;
