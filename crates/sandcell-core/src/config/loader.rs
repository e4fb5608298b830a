//! Environment variable loading helpers.
//!
//! Keeps the fallback chain (primary key, then aliases, then default) in one
//! place so callers never touch `std::env::var` directly.

use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use std::str::FromStr;

static DOTENV_ONCE: std::sync::Once = std::sync::Once::new();

/// Export `./.env` into the process environment without overriding anything
/// already set. Only the first call does work.
pub fn load_dotenv() {
    DOTENV_ONCE.call_once(|| {
        let Ok(cwd) = env::current_dir() else {
            return;
        };
        let path = cwd.join(".env");
        if !path.is_file() {
            return;
        }
        match load_dotenv_from(&path) {
            Ok(n) => tracing::debug!(path = %path.display(), exported = n, "loaded dotenv"),
            Err(e) => tracing::warn!("Ignoring unreadable .env file: {:#}", e),
        }
    });
}

/// Export every key in `path` that is not already set. Returns how many were exported.
pub fn load_dotenv_from(path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read env file {}", path.display()))?;
    let fresh: Vec<(&str, &str)> = content
        .lines()
        .filter_map(dotenv_pair)
        .filter(|(key, _)| env::var_os(key).is_none())
        .collect();
    for (key, value) in &fresh {
        set_env_var(key, value);
    }
    Ok(fresh.len())
}

/// One `KEY=value` line. Blank lines, `#` comments and lines without `=` yield `None`.
/// A trailing `# note` is dropped from unquoted values; one pair of matching quotes is stripped.
fn dotenv_pair(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) if raw.len() >= 2 && raw.ends_with(q) => &raw[1..raw.len() - 1],
        Some('"' | '\'') => raw,
        _ => raw.split(" #").next().unwrap_or(raw).trim_end(),
    };
    Some((key, value))
}

/// Read the primary key or the first set alias; fall back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env_optional(primary, aliases).unwrap_or_else(default)
}

/// Read the primary key or the first set alias. Empty values count as unset.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Boolean variable: 0/false/no/off are false, anything else set is true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    match env_optional(primary, aliases) {
        Some(s) => !["0", "false", "no", "off"]
            .iter()
            .any(|off| s.eq_ignore_ascii_case(off)),
        None => default,
    }
}

/// Parse a typed variable; unparsable values are logged and treated as unset.
pub fn env_parse<T: FromStr>(primary: &str, aliases: &[&str]) -> Option<T> {
    let raw = env_optional(primary, aliases)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = primary, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

/// Set a single environment variable (the only place `set_var` is called).
#[allow(unsafe_code)]
pub fn set_env_var(key: &str, value: &str) {
    unsafe { env::set_var(key, value) };
}

/// Remove a single environment variable.
#[allow(unsafe_code)]
pub fn remove_env_var(key: &str) {
    unsafe { env::remove_var(key) };
}

/// RAII guard: removes the named variable on drop.
pub struct ScopedEnvGuard(pub &'static str);

impl Drop for ScopedEnvGuard {
    fn drop(&mut self) {
        remove_env_var(self.0);
    }
}
