//! Run coordination.
//!
//! The Importer drives a whole run:
//! 1. Load every correlation persisted by earlier runs
//! 2. Clear single-sign-on records
//! 3. Bootstrap the fixed categories
//! 4. Dispatch each batch of the export stream to its importer
//!
//! A run is restartable from the beginning: anything already correlated is
//! skipped, and its correlation record is emitted again.

use super::categories::bootstrap_categories;
use super::stats::{ImportStats, RunStats};
use super::threads::ThreadImporter;
use super::{ImportContext, groups, users};
use crate::config::ImportConfig;
use crate::correlation::CorrelationStore;
use crate::destination::Destination;
use crate::emitter::CorrelationEmitter;
use crate::error::ImportResult;
use crate::stream::{Batch, BatchRecords, BatchStream};
use std::io::{BufRead, Write};

pub struct Importer<'a, D> {
    destination: &'a D,
    config: ImportConfig,
}

impl<'a, D: Destination> Importer<'a, D> {
    pub fn new(destination: &'a D, config: ImportConfig) -> Self {
        Self {
            destination,
            config,
        }
    }

    /// Import the export stream `input`, writing correlation records to
    /// `output` as each entity completes.
    pub async fn run<R: BufRead, W: Write>(&self, input: R, output: W) -> ImportResult<RunStats> {
        let mut run = RunStats::default();

        let mut store = CorrelationStore::from_entries(self.destination.load_correlations().await?);
        log::info!("loaded {} existing correlations", store.len());

        run.sso_records_cleared = self.destination.clear_sso_records().await?;
        if run.sso_records_cleared > 0 {
            log::info!("cleared {} single sign-on records", run.sso_records_cleared);
        }

        let (categories, category_stats) = bootstrap_categories(self.destination, &mut store).await?;
        run.categories = category_stats;

        let mut emitter = CorrelationEmitter::new(output);
        let mut threads = ThreadImporter::new(categories, self.config.system_user_id);

        for batch in BatchStream::new(input, self.config.batch_size) {
            let Batch {
                records,
                total,
                offset,
            } = batch?;
            let kind = records.kind();
            let len = records.len();

            let mut ctx = ImportContext {
                destination: self.destination,
                store: &mut store,
                emitter: &mut emitter,
            };
            let (stats, totals): (ImportStats, &mut ImportStats) = match records {
                BatchRecords::Users(records) => (
                    users::import_users(&mut ctx, &records).await?,
                    &mut run.users,
                ),
                BatchRecords::Projects(records) => (
                    groups::import_projects(&mut ctx, &records).await?,
                    &mut run.projects,
                ),
                BatchRecords::Posts(records) => (
                    threads.import_batch(&mut ctx, records).await?,
                    &mut run.posts,
                ),
            };
            totals.merge(stats);

            log::info!(
                "{} {}..{} of {}: {}",
                kind,
                offset,
                offset + len,
                total,
                stats
            );
        }

        run.correlations_written = emitter.written();
        log::info!(
            "import finished: categories ({}), users ({}), projects ({}), posts ({}); {} correlation records written",
            run.categories,
            run.users,
            run.projects,
            run.posts,
            run.correlations_written
        );
        log::debug!("{} post records held for chain resolution", threads.known_posts());

        Ok(run)
    }
}
