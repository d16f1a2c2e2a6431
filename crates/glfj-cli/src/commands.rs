//! CLI command implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use glfj_migrate::report::EXIT_OK;
use glfj_migrate::{
    ConsoleProgressReporter, EntityKind, ForgejoClient, GitLabClient, MigrationConfig,
    MigrationDriver, MigrationOptions, MigrationProgress, MigrationVerifier,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config;

/// Arguments of `glfj run`.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub users: bool,
    pub groups: bool,
    pub projects: bool,
    pub wikis: bool,
    pub keys: bool,
    pub all: bool,
    pub dry_run: bool,
    pub notify: bool,
    pub workers: usize,
    pub page_size: u32,
    pub verify: bool,
    pub json: bool,
}

impl RunArgs {
    /// Entity kinds selected on the command line.
    pub fn kinds(&self) -> Vec<EntityKind> {
        if self.all {
            return EntityKind::ALL.to_vec();
        }
        [
            (self.users, EntityKind::User),
            (self.groups, EntityKind::Group),
            (self.projects, EntityKind::Project),
            (self.wikis, EntityKind::Wiki),
            (self.keys, EntityKind::SshKey),
        ]
        .into_iter()
        .filter_map(|(selected, kind)| selected.then_some(kind))
        .collect()
    }

    /// Build run options from the arguments.
    pub fn options(&self) -> MigrationOptions {
        MigrationOptions::none()
            .with_kinds(self.kinds())
            .with_dry_run(self.dry_run)
            .with_notify(self.notify)
            .with_workers(self.workers.max(1))
            .with_page_size(self.page_size.max(1))
    }
}

fn build_driver(config: MigrationConfig, options: MigrationOptions) -> Result<MigrationDriver> {
    let source = GitLabClient::new(&config.source_url, config.source_token.clone())
        .context("failed to create GitLab client")?;
    let target = ForgejoClient::new(&config.target_url, config.target_token.clone())
        .context("failed to create Forgejo client")?;

    Ok(MigrationDriver::new(
        Arc::new(source),
        Arc::new(target),
        config,
        options,
    ))
}

/// Run a migration, returning the process exit code.
pub async fn run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let options = args.options();
    if options.kinds.is_empty() {
        warn!("No entity kind selected");
        println!("Nothing to do: select at least one of --users, --groups, --projects, --wikis, --keys or --all");
        return Ok(EXIT_OK);
    }

    let config = config::load(config_path)?;
    info!(
        gitlab = %config.source_url,
        forgejo = %config.target_url,
        dry_run = options.dry_run,
        "Loaded configuration"
    );

    let target = Arc::new(
        ForgejoClient::new(&config.target_url, config.target_token.clone())
            .context("failed to create Forgejo client")?,
    );
    let retry = options.retry.clone();

    let reporter = (!args.json).then(ConsoleProgressReporter::new);
    let mut driver = build_driver(config, options)?;
    if let Some(reporter) = &reporter {
        driver = driver.with_progress(MigrationProgress::with_callback(reporter.callback()));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current entity");
            on_signal.cancel();
        }
    });

    let report = driver.run(cancel).await?;
    if let Some(reporter) = &reporter {
        reporter.finish("done");
    }

    let verification = if args.verify {
        let verifier = MigrationVerifier::new(target, retry);
        Some(verifier.verify(&report, None).await)
    } else {
        None
    };

    if args.json {
        let output = serde_json::json!({
            "report": report,
            "verification": verification,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        report.print_summary();
        if let Some(verification) = &verification {
            verification.print_summary();
        }
    }

    let mut code = report.exit_code();
    if code == EXIT_OK && verification.is_some_and(|v| !v.is_success()) {
        code = glfj_migrate::report::EXIT_FAILURES;
    }
    Ok(code)
}

/// Check connectivity to both platforms.
pub async fn check(config_path: &Path) -> Result<()> {
    let config = config::load(config_path)?;
    println!("GitLab:  {}", config.source_url);
    println!("Forgejo: {}", config.target_url);

    let driver = build_driver(config, MigrationOptions::none())?;
    let (gitlab, forgejo) = driver
        .check_connectivity()
        .await
        .context("connectivity check failed")?;

    println!("\nGitLab version:  {gitlab}");
    println!("Forgejo version: {forgejo}");
    println!("\nBoth platforms are reachable.");
    Ok(())
}
