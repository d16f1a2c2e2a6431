//! Migration driver: runs every selected kind in dependency order.

use std::sync::Arc;

use futures::{future, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{MigrationError, Result};
use crate::mapper::IdentityMapper;
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::reader::EntityReader;
use crate::report::{AbortInfo, MigrationReport};
use crate::sequencer::{DependencySequencer, KindPlan};
use crate::source::SourceApi;
use crate::target::TargetApi;
use crate::types::{
    EntityKind, MigrationConfig, MigrationOptions, MigrationRecord, Outcome, SourceEntity,
};
use crate::upsert::{UpsertOptions, Upserter};

/// How processing of one kind ended.
enum KindFlow {
    /// All entities were read (`complete`) or the listing broke off.
    Done { complete: bool },
    Cancelled,
    Aborted(AbortInfo),
}

/// Result of processing one streamed item.
enum Step {
    Processed(String, Result<MigrationRecord>),
    ReaderFailed(MigrationError),
}

/// Per-run collaborators, created fresh for every run.
struct RunContext<'a> {
    reader: EntityReader,
    mapper: Arc<IdentityMapper>,
    upserter: Upserter,
    sequencer: DependencySequencer,
    cancel: &'a CancellationToken,
}

/// Drives a migration from GitLab to Forgejo.
pub struct MigrationDriver {
    source: Arc<dyn SourceApi>,
    target: Arc<dyn TargetApi>,
    config: MigrationConfig,
    options: MigrationOptions,
    progress: Arc<MigrationProgress>,
}

impl MigrationDriver {
    /// Create a new driver.
    pub fn new(
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        config: MigrationConfig,
        options: MigrationOptions,
    ) -> Self {
        Self {
            source,
            target,
            config,
            options,
            progress: Arc::new(MigrationProgress::new()),
        }
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Run options of this driver.
    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Check that both platforms answer, returning their versions.
    pub async fn check_connectivity(&self) -> Result<(String, String)> {
        let retry = &self.options.retry;
        let source_version = retry
            .execute("gitlab version", || self.source.version())
            .await?;
        let target_version = retry
            .execute("forgejo version", || self.target.version())
            .await?;

        info!(
            gitlab = %source_version,
            forgejo = %target_version,
            "Connected to both platforms"
        );
        Ok((source_version, target_version))
    }

    /// Run the migration.
    ///
    /// Returns `Err` only when a platform cannot be reached at all; every
    /// other problem is reported in the [`MigrationReport`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let mut report = MigrationReport::new(self.options.dry_run);
        let sequencer = DependencySequencer::new(self.options.kinds.iter().copied());
        let plan = sequencer.plan();

        info!(
            run_id = %report.run_id,
            dry_run = self.options.dry_run,
            kinds = ?self.options.kinds,
            "Starting migration run"
        );

        if plan.is_empty() {
            warn!("No entity kind selected, nothing to do");
            report.add_warning("nothing to do: no entity kind selected");
            report.complete();
            return Ok(report);
        }

        self.progress.set_phase(MigrationPhase::Initializing, 2);
        self.check_connectivity().await?;

        let mapper = Arc::new(IdentityMapper::new());
        let ctx = RunContext {
            reader: EntityReader::new(
                self.source.clone(),
                self.options.page_size,
                self.options.retry.clone(),
            ),
            upserter: Upserter::new(
                self.target.clone(),
                mapper.clone(),
                UpsertOptions::from_run(&self.config, &self.options),
            ),
            mapper,
            sequencer,
            cancel: &cancel,
        };

        for (kind, mode) in plan {
            if cancel.is_cancelled() {
                report.cancelled_during = Some(kind);
                break;
            }

            self.progress.set_phase(MigrationPhase::for_kind(kind), 0);
            if mode == KindPlan::Hydrate {
                self.progress.message("not selected, resolving existing entities");
            }
            info!(kind = %kind, mode = ?mode, "Processing kind");

            let flow = match kind {
                EntityKind::Group => self.run_groups(&ctx, mode, &mut report).await,
                _ => self.run_stream(&ctx, kind, mode, &mut report).await,
            };

            match flow {
                KindFlow::Done { complete } => ctx.mapper.complete_kind(kind, complete),
                KindFlow::Cancelled => {
                    warn!(kind = %kind, "Run cancelled");
                    ctx.mapper.complete_kind(kind, false);
                    report.cancelled_during = Some(kind);
                    break;
                }
                KindFlow::Aborted(abort) => {
                    error!(
                        kind = %abort.kind,
                        key = %abort.key,
                        detail = %abort.detail,
                        "Run aborted"
                    );
                    report.aborted = Some(abort);
                    break;
                }
            }
        }

        report.mappings = ctx.mapper.snapshot();
        report.complete();
        self.progress.set_phase(MigrationPhase::Complete, 0);

        info!(
            run_id = %report.run_id,
            records = report.records.len(),
            exit_code = report.exit_code(),
            "Migration run finished"
        );
        Ok(report)
    }

    /// Users, projects, wikis and keys: processed in reader order.
    async fn run_stream(
        &self,
        ctx: &RunContext<'_>,
        kind: EntityKind,
        mode: KindPlan,
        report: &mut MigrationReport,
    ) -> KindFlow {
        // Users are independent of each other and may be upserted in parallel.
        let workers = if kind == EntityKind::User && mode == KindPlan::Migrate {
            self.options.workers.max(1)
        } else {
            1
        };

        let upserter = &ctx.upserter;
        let cancel = ctx.cancel;
        let mut steps = ctx
            .reader
            .stream(kind)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|item| async move {
                match item {
                    Ok(entity) => {
                        let key = entity.natural_key();
                        let result = match mode {
                            KindPlan::Migrate => upserter.upsert(&entity).await,
                            KindPlan::Hydrate => upserter.hydrate(&entity).await,
                        };
                        Step::Processed(key, result)
                    }
                    Err(e) => Step::ReaderFailed(e),
                }
            })
            .buffered(workers);

        while let Some(step) = steps.next().await {
            match step {
                Step::Processed(_, Ok(record)) => {
                    self.progress.increment(Some(&record.key));
                    report.push(record);
                }
                Step::Processed(key, Err(e)) => {
                    return KindFlow::Aborted(AbortInfo::from_error(kind, &key, &e));
                }
                Step::ReaderFailed(e) => {
                    record_reader_failure(report, kind, e);
                    return KindFlow::Done { complete: false };
                }
            }
        }

        if cancel.is_cancelled() {
            KindFlow::Cancelled
        } else {
            KindFlow::Done { complete: true }
        }
    }

    /// Groups: collected in full, then processed parent before child.
    async fn run_groups(
        &self,
        ctx: &RunContext<'_>,
        mode: KindPlan,
        report: &mut MigrationReport,
    ) -> KindFlow {
        let mut groups = Vec::new();
        let mut complete = true;
        let mut stream = ctx.reader.groups();

        while let Some(item) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return KindFlow::Cancelled;
            }
            match item {
                Ok(SourceEntity::Group(group)) => groups.push(group),
                Ok(other) => warn!(entity = %other.describe(), "Unexpected entity in group listing"),
                Err(e) => {
                    record_reader_failure(report, EntityKind::Group, e);
                    complete = false;
                    break;
                }
            }
        }

        for planned in ctx.sequencer.order_groups(groups, complete) {
            if ctx.cancel.is_cancelled() {
                return KindFlow::Cancelled;
            }

            let key = planned.group.full_path.clone();
            if let Some(reason) = planned.skip {
                ctx.mapper
                    .mark_unavailable(EntityKind::Group, &key, reason.clone());
                let record = MigrationRecord::new(
                    EntityKind::Group,
                    key,
                    Outcome::Skipped { reason },
                    None,
                )
                .with_warnings(planned.warning);
                self.progress.increment(Some(&record.key));
                report.push(record);
                continue;
            }

            let entity = SourceEntity::Group(planned.group);
            let result = match mode {
                KindPlan::Migrate => {
                    ctx.upserter
                        .upsert_with(&entity, planned.warning.into_iter().collect())
                        .await
                }
                KindPlan::Hydrate => ctx.upserter.hydrate(&entity).await,
            };

            match result {
                Ok(record) => {
                    self.progress.increment(Some(&record.key));
                    report.push(record);
                }
                Err(e) => {
                    return KindFlow::Aborted(AbortInfo::from_error(EntityKind::Group, &key, &e))
                }
            }
        }

        KindFlow::Done { complete }
    }
}

fn record_reader_failure(report: &mut MigrationReport, kind: EntityKind, error: MigrationError) {
    warn!(kind = %kind, error = %error, "Listing incomplete");
    match error {
        MigrationError::ReaderFailure { page, reason, .. } => {
            report.add_reader_failure(kind, page, reason)
        }
        other => report.add_reader_failure(kind, 0, other.to_string()),
    }
}
