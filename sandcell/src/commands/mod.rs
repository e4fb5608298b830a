//! Subcommand implementations. Each returns the process exit status.

pub mod engine;
pub mod exec;
pub mod scan;
pub mod tool;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sandcell_sandbox::Language;

/// Read a source file, or stdin when `source` is "-".
pub fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read source from stdin")?;
        return Ok(s);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))
}

/// Explicit language name, else inferred from the file extension.
pub fn resolve_language(explicit: Option<&str>, source: &str) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    Path::new(source)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Language::from_extension)
        .map(|l| l.as_str().to_string())
        .with_context(|| format!("Cannot infer language for '{}'; pass --language", source))
}

pub fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}
