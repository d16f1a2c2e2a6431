//! Name translation between GitLab and Forgejo.
//!
//! Forgejo user, organization and repository names accept a narrower
//! alphabet than GitLab display names and have no nesting, so every name is
//! passed through [`clean_name`] before it reaches the target.

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;

/// Characters Forgejo does not accept in names.
static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("Invalid regex"));

/// Names Forgejo reserves for its own routes.
const RESERVED_NAMES: &[&str] = &["plugins"];

/// Domain used for users that have no e-mail address in GitLab.
pub const PLACEHOLDER_EMAIL_DOMAIN: &str = "noemail-git.local";

/// Turn an arbitrary GitLab name into a valid Forgejo name.
///
/// Spaces become underscores, any other unsupported character becomes a
/// dash, and reserved names are suffixed.
pub fn clean_name(name: &str) -> String {
    let name = name.trim().replace(' ', "_");
    let name = INVALID_NAME_CHARS.replace_all(&name, "-").into_owned();

    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(&name))
    {
        format!("{name}-user")
    } else {
        name
    }
}

/// Forgejo organization name for a (possibly nested) GitLab group path.
///
/// Organizations are flat, so `eng/backend` becomes `eng-backend`.
pub fn org_name(full_path: &str) -> String {
    clean_name(&full_path.replace('/', "-"))
}

/// Forgejo repository name for a GitLab project path.
pub fn repo_name(path: &str) -> String {
    clean_name(path)
}

/// Password for a freshly created user; they are forced to change it.
pub fn temporary_password() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("Tmp1!{suffix}")
}

/// E-mail address for users without one.
pub fn placeholder_email(username: &str) -> String {
    format!("{username}@{PLACEHOLDER_EMAIL_DOMAIN}")
}
