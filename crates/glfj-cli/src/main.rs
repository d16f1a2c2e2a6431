//! glfj - migrate a GitLab instance to Forgejo.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;
mod config;
mod logging;

/// GitLab to Forgejo migration
#[derive(Parser, Debug)]
#[command(name = "glfj")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the INI configuration file
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (pretty or json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate the selected entity kinds
    Run(RunCommand),

    /// Check connectivity to GitLab and Forgejo
    Check,

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
struct RunCommand {
    /// Migrate users
    #[arg(long)]
    users: bool,

    /// Migrate groups
    #[arg(long)]
    groups: bool,

    /// Migrate projects
    #[arg(long)]
    projects: bool,

    /// Migrate project wikis
    #[arg(long)]
    wikis: bool,

    /// Migrate SSH keys
    #[arg(long)]
    keys: bool,

    /// Migrate everything
    #[arg(long)]
    all: bool,

    /// Check everything but create nothing
    #[arg(long)]
    dry_run: bool,

    /// Send a notification e-mail to created users
    #[arg(long)]
    notify: bool,

    /// Concurrent user upserts
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Items per GitLab page
    #[arg(long, default_value_t = glfj_migrate::DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// Look every migrated entity up again after the run
    #[arg(long)]
    verify: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl From<RunCommand> for commands::RunArgs {
    fn from(cmd: RunCommand) -> Self {
        Self {
            users: cmd.users,
            groups: cmd.groups,
            projects: cmd.projects,
            wikis: cmd.wikis,
            keys: cmd.keys,
            all: cmd.all,
            dry_run: cmd.dry_run,
            notify: cmd.notify,
            workers: cmd.workers,
            page_size: cmd.page_size,
            verify: cmd.verify,
            json: cmd.json,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_logging(
        logging::level_for_verbosity(cli.verbose),
        logging::LogFormat::parse(&cli.log_format),
    );

    let result = match cli.command {
        Commands::Run(cmd) => commands::run(&cli.config, cmd.into()).await,
        Commands::Check => commands::check(&cli.config).await.map(|()| 0),
        Commands::Version => {
            println!("glfj {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
