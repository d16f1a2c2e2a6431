//! Run report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MigrationError;
use crate::mapper::MappingEntry;
use crate::types::{EntityKind, MigrationRecord, Outcome};

/// Exit code of a clean run.
pub const EXIT_OK: i32 = 0;
/// Exit code when entities failed or a listing broke off.
pub const EXIT_FAILURES: i32 = 1;
/// Exit code when the run was aborted or cancelled.
pub const EXIT_ABORTED: i32 = 2;

/// Outcome counts for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub already_exists: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::AlreadyExists => self.already_exists += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Total number of records.
    pub fn total(&self) -> usize {
        self.created + self.already_exists + self.skipped + self.failed
    }
}

/// A listing that broke off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderFailureInfo {
    pub kind: EntityKind,
    pub page: u32,
    pub reason: String,
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    /// Kind being processed.
    pub kind: EntityKind,
    /// Natural key of the entity being processed.
    pub key: String,
    /// The invariant that was violated.
    pub detail: String,
    /// Entity, then the dependency it could not resolve.
    pub chain: Vec<String>,
}

impl AbortInfo {
    /// Describe a fatal error raised while processing `kind`/`key`.
    pub fn from_error(kind: EntityKind, key: &str, error: &MigrationError) -> Self {
        let mut chain = vec![format!("{kind} '{key}'")];
        match error {
            MigrationError::UnresolvedDependency { kind, key, .. }
            | MigrationError::DuplicateMapping { kind, key, .. } => {
                chain.push(format!("{kind} '{key}'"));
            }
            _ => {}
        }
        Self {
            kind,
            key: key.to_string(),
            detail: error.to_string(),
            chain,
        }
    }
}

/// Report of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique id of this run.
    pub run_id: Uuid,

    /// No create calls were issued.
    pub dry_run: bool,

    /// One record per processed entity, in processing order.
    pub records: Vec<MigrationRecord>,

    /// Run-level warnings.
    pub warnings: Vec<String>,

    /// Listings that broke off.
    pub reader_failures: Vec<ReaderFailureInfo>,

    /// Set when an invariant violation stopped the run.
    pub aborted: Option<AbortInfo>,

    /// Kind in progress when the run was cancelled.
    pub cancelled_during: Option<EntityKind>,

    /// Final mapping table.
    pub mappings: Vec<MappingEntry>,

    /// Start time of migration.
    pub started_at: DateTime<Utc>,

    /// End time of migration.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MigrationReport {
    /// Create a new report.
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            records: Vec::new(),
            warnings: Vec::new(),
            reader_failures: Vec::new(),
            aborted: None,
            cancelled_during: None,
            mappings: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Append a record.
    pub fn push(&mut self, record: MigrationRecord) {
        self.records.push(record);
    }

    /// Add a run-level warning.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Record a broken listing.
    pub fn add_reader_failure(&mut self, kind: EntityKind, page: u32, reason: impl Into<String>) {
        self.reader_failures.push(ReaderFailureInfo {
            kind,
            page,
            reason: reason.into(),
        });
    }

    /// Mark the run as complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Get the duration of the run.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }

    /// Records of one kind.
    pub fn records_of(&self, kind: EntityKind) -> impl Iterator<Item = &MigrationRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// Record for a natural key.
    pub fn record(&self, kind: EntityKind, key: &str) -> Option<&MigrationRecord> {
        self.records_of(kind).find(|r| r.key == key)
    }

    /// Outcome counts per kind.
    pub fn counts(&self) -> BTreeMap<EntityKind, OutcomeCounts> {
        let mut counts: BTreeMap<EntityKind, OutcomeCounts> = BTreeMap::new();
        for record in &self.records {
            counts.entry(record.kind).or_default().add(&record.outcome);
        }
        counts
    }

    /// Any record failed or a listing broke off.
    pub fn has_failures(&self) -> bool {
        !self.reader_failures.is_empty() || self.records.iter().any(MigrationRecord::is_failed)
    }

    /// The run finished without failures, abort or cancellation.
    pub fn is_successful(&self) -> bool {
        self.exit_code() == EXIT_OK
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.aborted.is_some() || self.cancelled_during.is_some() {
            EXIT_ABORTED
        } else if self.has_failures() {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }

    /// Print a summary of the migration.
    pub fn print_summary(&self) {
        let title = if self.dry_run {
            "Migration Summary (dry run)"
        } else {
            "Migration Summary"
        };
        println!("\n=== {title} ===\n");

        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>8}",
            "kind", "created", "exists", "skipped", "failed"
        );
        for (kind, c) in self.counts() {
            println!(
                "{:<10} {:>8} {:>8} {:>8} {:>8}",
                kind.as_str(),
                c.created,
                c.already_exists,
                c.skipped,
                c.failed
            );
        }

        let failures: Vec<_> = self
            .records
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Failed { reason } => Some((r, reason)),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            println!("\nFailures ({}):", failures.len());
            for (record, reason) in failures {
                println!("  ✗ {} '{}': {reason}", record.kind, record.key);
            }
        }

        if !self.reader_failures.is_empty() {
            println!("\nIncomplete listings ({}):", self.reader_failures.len());
            for failure in &self.reader_failures {
                println!(
                    "  ✗ {} (page {}): {}",
                    failure.kind, failure.page, failure.reason
                );
            }
        }

        let record_warnings: Vec<_> = self
            .records
            .iter()
            .flat_map(|r| r.warnings.iter().map(move |w| (r, w)))
            .collect();
        if !self.warnings.is_empty() || !record_warnings.is_empty() {
            println!(
                "\nWarnings ({}):",
                self.warnings.len() + record_warnings.len()
            );
            for warning in &self.warnings {
                println!("  - {warning}");
            }
            for (record, warning) in record_warnings {
                println!("  - {} '{}': {warning}", record.kind, record.key);
            }
        }

        if let Some(abort) = &self.aborted {
            println!("\nAborted while processing {} '{}':", abort.kind, abort.key);
            println!("  {}", abort.detail);
            println!("  chain: {}", abort.chain.join(" -> "));
        }

        if let Some(kind) = self.cancelled_during {
            println!("\nCancelled during {kind} phase; re-run to continue.");
        }

        if let Some(duration) = self.duration() {
            println!("\nCompleted in {} seconds", duration.num_seconds());
        }

        let status = match self.exit_code() {
            EXIT_OK => "SUCCESS",
            EXIT_FAILURES => "COMPLETED WITH FAILURES",
            _ => "INCOMPLETE",
        };
        println!("\nStatus: {status}");
    }
}
