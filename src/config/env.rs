//! Environment variable substitution for configuration files
//!
//! Replaces `${VAR}` placeholders with the value of `VAR` before the YAML is
//! parsed. Placeholders naming an unset variable are left verbatim.

use eyre::{Context, Result};
use regex::{Captures, Regex};
use std::path::Path;

/// Substitute `${VAR}` placeholders using the process environment
pub fn substitute_env(content: &str) -> Result<String> {
    substitute_with(content, |name| std::env::var(name).ok())
}

/// Substitute `${VAR}` placeholders using `lookup`
pub fn substitute_with<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let placeholder = Regex::new(r"\$\{([^}]+)\}").context("Invalid placeholder pattern")?;
    let replaced = placeholder.replace_all(content, |caps: &Captures| {
        let name = caps[1].trim();
        match lookup(name) {
            Some(value) => value,
            None => {
                log::debug!("Environment variable {} not set, leaving placeholder", name);
                caps[0].to_string()
            }
        }
    });
    Ok(replaced.into_owned())
}

/// Load a dotenv file if it exists
///
/// Variables already present in the environment are not overridden.
pub fn load_dotenv(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if !path.exists() {
        log::debug!("No dotenv file at {}", path.display());
        return Ok(false);
    }

    dotenvy::from_path(path)
        .with_context(|| format!("Failed to load dotenv file: {}", path.display()))?;
    log::debug!("Loaded environment from {}", path.display());
    Ok(true)
}
