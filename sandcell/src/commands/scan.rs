//! Screen a script without running it.

use anyhow::{Context, Result};
use sandcell_sandbox::security::{format_report, format_report_json, RulesConfig, Screener};
use sandcell_sandbox::{Language, SandboxSettings};

use super::{read_source, resolve_language};

pub fn security_scan(script_path: &str, language: Option<&str>, json_output: bool) -> Result<i32> {
    let language: Language = resolve_language(language, script_path)?
        .parse()
        .context("Unsupported language")?;
    let source = read_source(script_path)?;

    let settings = SandboxSettings::from_env();
    let rules = RulesConfig::load_or_default(settings.rules_file.as_deref())?;
    let report = Screener::with_config(&rules).screen(&source, language);

    if json_output {
        println!("{}", format_report_json(&report));
    } else {
        println!("Screening results for: {}\n", script_path);
        println!("{}", format_report(&report));
    }
    Ok(if report.safe { 0 } else { 1 })
}
