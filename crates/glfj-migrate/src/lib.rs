//! # GitLab to Forgejo migration core
//!
//! This crate moves users, groups, projects, project wikis and SSH keys from
//! a GitLab instance to a Forgejo instance.
//!
//! ## Features
//!
//! - **Idempotent**: re-running a migration matches existing entities by
//!   name instead of creating duplicates
//! - **Dependency ordering**: users before groups, parent groups before
//!   sub-groups, namespaces before projects, projects before wikis
//! - **Failure isolation**: a rejected entity is reported and only its
//!   dependents are skipped
//! - **Rate limit aware**: HTTP 429 responses are waited out using
//!   `Retry-After`
//! - **Dry run**: every existence check runs, no create call is issued
//! - **Verification**: post-run lookup of every migrated entity
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use glfj_migrate::{ForgejoClient, GitLabClient, MigrationConfig, MigrationDriver, MigrationOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::new(
//!         "https://gitlab.example.com",
//!         "glpat-xxx",
//!         "https://forgejo.example.com",
//!         "forgejo_token",
//!     );
//!
//!     let source = Arc::new(GitLabClient::new(&config.source_url, config.source_token.clone())?);
//!     let target = Arc::new(ForgejoClient::new(&config.target_url, config.target_token.clone())?);
//!
//!     let driver = MigrationDriver::new(source, target, config, MigrationOptions::default());
//!     let report = driver.run(CancellationToken::new()).await?;
//!
//!     report.print_summary();
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod driver;
pub mod error;
pub mod forgejo;
pub mod gitlab;
pub mod mapper;
pub mod naming;
pub mod progress;
pub mod reader;
pub mod report;
pub mod retry;
pub mod sequencer;
pub mod source;
pub mod target;
pub mod types;
pub mod upsert;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use driver::MigrationDriver;
pub use error::{MigrationError, Result};
pub use forgejo::ForgejoClient;
pub use gitlab::GitLabClient;
pub use mapper::{IdentityMapper, MappingEntry};
pub use progress::{ConsoleProgressReporter, MigrationPhase, MigrationProgress, ProgressCallback};
pub use reader::EntityReader;
pub use report::{AbortInfo, MigrationReport, OutcomeCounts, ReaderFailureInfo};
pub use retry::RetryPolicy;
pub use sequencer::{DependencySequencer, KindPlan};
pub use source::{Page, SourceApi};
pub use target::TargetApi;
pub use types::*;
pub use upsert::{UpsertOptions, UpsertState, Upserter};
pub use verify::{MigrationVerifier, VerificationResult};

/// Version of the migration tools.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
