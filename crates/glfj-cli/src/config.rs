//! Configuration loading.
//!
//! The INI file has a single `[migrate]` section:
//!
//! ```ini
//! [migrate]
//! gitlab_url = https://gitlab.example.com
//! gitlab_token = glpat-xxx
//! gitlab_admin_user = root
//! gitlab_admin_pass = secret
//! forgejo_url = https://forgejo.example.com
//! forgejo_token = xxx
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `GLFJ_MIGRATE__FORGEJO_TOKEN`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use glfj_migrate::MigrationConfig;
use serde::Deserialize;
use validator::Validate;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".migrate.ini";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "GLFJ";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config file '{0}' not found, create it from the template in the README")]
    NotFound(PathBuf),

    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// The `[migrate]` section.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MigrateSection {
    #[validate(url)]
    pub gitlab_url: String,

    #[validate(length(min = 1))]
    pub gitlab_token: String,

    #[serde(default)]
    pub gitlab_admin_user: String,

    #[serde(default)]
    pub gitlab_admin_pass: String,

    #[validate(url)]
    pub forgejo_url: String,

    #[validate(length(min = 1))]
    pub forgejo_token: String,

    #[serde(default)]
    pub forgejo_admin_user: String,

    #[serde(default)]
    pub forgejo_admin_pass: String,
}

impl From<MigrateSection> for MigrationConfig {
    fn from(section: MigrateSection) -> Self {
        MigrationConfig::new(
            section.gitlab_url.trim_end_matches('/'),
            section.gitlab_token,
            section.forgejo_url.trim_end_matches('/'),
            section.forgejo_token,
        )
        .with_source_admin(section.gitlab_admin_user, section.gitlab_admin_pass)
        .with_target_admin(section.forgejo_admin_user, section.forgejo_admin_pass)
    }
}

/// Environment overrides: `GLFJ_<SECTION>__<KEY>`.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

/// Load and validate the configuration file.
pub fn load(path: &Path) -> Result<MigrationConfig, CliError> {
    load_with(path, environment())
}

fn load_with(path: &Path, env: Environment) -> Result<MigrationConfig, CliError> {
    if !path.exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }

    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Ini))
        .add_source(env)
        .build()?;

    let section: MigrateSection = settings.get("migrate")?;
    section.validate()?;

    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(section.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".ini")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            "[migrate]\n\
             gitlab_url = https://gitlab.example.com/\n\
             gitlab_token = glpat-abc\n\
             gitlab_admin_user = root\n\
             gitlab_admin_pass = hunter2\n\
             forgejo_url = https://forgejo.example.com\n\
             forgejo_token = fj-token\n\
             forgejo_admin_user = admin\n",
        );

        let config = load(file.path()).unwrap();
        assert_eq!(config.source_url, "https://gitlab.example.com");
        assert_eq!(config.source_token, "glpat-abc");
        assert_eq!(config.target_url, "https://forgejo.example.com");
        assert_eq!(config.clone_credentials(), Some(("root", "hunter2")));
        assert_eq!(config.orphan_owner(), Some("admin"));
    }

    #[test]
    fn test_admin_accounts_are_optional() {
        let file = write_config(
            "[migrate]\n\
             gitlab_url = https://gitlab.example.com\n\
             gitlab_token = glpat-abc\n\
             forgejo_url = https://forgejo.example.com\n\
             forgejo_token = fj-token\n",
        );

        let config = load(file.path()).unwrap();
        assert_eq!(config.clone_credentials(), None);
        assert_eq!(config.orphan_owner(), None);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(
            "[migrate]\n\
             gitlab_url = https://gitlab.example.com\n\
             gitlab_token = glpat-abc\n\
             forgejo_url = https://forgejo.example.com\n\
             forgejo_token = from-file\n",
        );
        let vars = config::Map::from([
            ("GLFJ_MIGRATE__FORGEJO_TOKEN".to_string(), "from-env".to_string()),
            ("OTHER_MIGRATE__GITLAB_TOKEN".to_string(), "ignored".to_string()),
        ]);

        let config = load_with(file.path(), environment().source(Some(vars))).unwrap();
        assert_eq!(config.target_token, "from-env");
        assert_eq!(config.source_token, "glpat-abc");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let file = write_config(
            "[migrate]\n\
             gitlab_url = not a url\n\
             gitlab_token = glpat-abc\n\
             forgejo_url = https://forgejo.example.com\n\
             forgejo_token = fj-token\n",
        );

        assert!(matches!(load(file.path()), Err(CliError::Invalid(_))));
    }

    #[test]
    fn test_missing_key_rejected() {
        let file = write_config(
            "[migrate]\n\
             gitlab_url = https://gitlab.example.com\n\
             forgejo_url = https://forgejo.example.com\n\
             forgejo_token = fj-token\n",
        );

        assert!(matches!(load(file.path()), Err(CliError::Load(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        assert!(matches!(load(&path), Err(CliError::NotFound(_))));
    }
}
