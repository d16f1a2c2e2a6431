//! Post-migration verification.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::report::MigrationReport;
use crate::retry::RetryPolicy;
use crate::target::TargetApi;
use crate::types::{EntityKind, MigrationRecord, Outcome, TargetId};

/// Verification results for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationResult {
    /// Number of entities looked up on the target.
    pub checked: usize,

    /// Entities with a planned ref (dry run), not looked up.
    pub skipped: usize,

    /// `kind 'key'` of entities the target does not have.
    pub missing: Vec<String>,

    /// Lookups that failed.
    pub errors: Vec<String>,
}

impl VerificationResult {
    /// Check if verification passed.
    pub fn is_success(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    /// Print verification summary.
    pub fn print_summary(&self) {
        println!("\n=== Verification Summary ===\n");
        println!("Checked:  {}", self.checked);
        if self.skipped > 0 {
            println!("Planned:  {} (dry run, not checked)", self.skipped);
        }

        if !self.missing.is_empty() {
            println!("\nMissing on target ({}):", self.missing.len());
            for entity in &self.missing {
                println!("  ✗ {entity}");
            }
        }

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  - {error}");
            }
        }

        println!(
            "\nVerification: {}",
            if self.is_success() {
                "PASSED"
            } else {
                "FAILED"
            }
        );
    }
}

/// Re-checks a finished run against the target.
pub struct MigrationVerifier {
    target: Arc<dyn TargetApi>,
    retry: RetryPolicy,
}

impl MigrationVerifier {
    /// Create a new verifier.
    pub fn new(target: Arc<dyn TargetApi>, retry: RetryPolicy) -> Self {
        Self { target, retry }
    }

    /// Check that every created or matched entity exists on the target.
    pub async fn verify(
        &self,
        report: &MigrationReport,
        progress: Option<&MigrationProgress>,
    ) -> VerificationResult {
        let mut result = VerificationResult::default();
        info!(run_id = %report.run_id, "Starting verification");

        let records: Vec<&MigrationRecord> = report
            .records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Created | Outcome::AlreadyExists))
            .collect();
        if let Some(progress) = progress {
            progress.set_phase(MigrationPhase::Verifying, records.len() as u64);
        }

        for record in records {
            let Some(target) = &record.target else {
                continue;
            };
            if target.id == TargetId::Planned {
                result.skipped += 1;
                continue;
            }

            result.checked += 1;
            match self.exists(record.kind, &target.name).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(kind = %record.kind, key = %record.key, "Missing on target");
                    result.missing.push(format!("{} '{}'", record.kind, record.key));
                }
                Err(e) => result
                    .errors
                    .push(format!("{} '{}': {e}", record.kind, record.key)),
            }
            if let Some(progress) = progress {
                progress.increment(Some(&record.key));
            }
        }

        info!(
            checked = result.checked,
            missing = result.missing.len(),
            "Verification finished"
        );
        result
    }

    async fn exists(&self, kind: EntityKind, name: &str) -> Result<bool> {
        match kind {
            EntityKind::User => Ok(self
                .retry
                .execute("get_user", || self.target.get_user(name))
                .await?
                .is_some()),
            EntityKind::Group => Ok(self
                .retry
                .execute("get_org", || self.target.get_org(name))
                .await?
                .is_some()),
            EntityKind::Project | EntityKind::Wiki => {
                let Some((owner, repo)) = name.split_once('/') else {
                    return Ok(false);
                };
                Ok(self
                    .retry
                    .execute("get_repo", || self.target.get_repo(owner, repo))
                    .await?
                    .is_some())
            }
            EntityKind::SshKey => {
                let Some((username, title)) = name.split_once('/') else {
                    return Ok(false);
                };
                let keys = self
                    .retry
                    .execute("list_user_keys", || self.target.list_user_keys(username))
                    .await?;
                Ok(keys.iter().any(|k| k.title == title))
            }
        }
    }
}
