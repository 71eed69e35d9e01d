//! Import pipeline.
//!
//! 1. **Coordination** (`coordinator`) - Loads correlations, bootstraps
//!    categories and dispatches each batch of the export stream
//! 2. **Categories** (`categories`) - The three fixed top-level categories
//! 3. **Users** (`users`) - Accounts, merged by email when one already exists
//! 4. **Groups** (`groups`) - One group per project with its contributors
//! 5. **Threads** (`threads`) - Topics and reply chains
//! 6. **Statistics** (`stats`) - Per-batch and per-run counts
//!
//! Batches are processed strictly in stream order. Users must be imported
//! before the projects and posts that reference them.

pub mod categories;
pub mod coordinator;
pub mod groups;
pub mod stats;
pub mod threads;
pub mod users;

pub use coordinator::Importer;
pub use stats::{ImportStats, RunStats};

use crate::correlation::CorrelationStore;
use crate::emitter::CorrelationEmitter;
use std::io::Write;

/// State shared by the per-kind importers while a batch is processed.
pub struct ImportContext<'a, D, W: Write> {
    pub destination: &'a D,
    pub store: &'a mut CorrelationStore,
    pub emitter: &'a mut CorrelationEmitter<W>,
}
