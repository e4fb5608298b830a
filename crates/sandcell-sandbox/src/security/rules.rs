//! Screener rules and their optional YAML overlay.
//!
//! A rule is one regex applied line by line. `RulesConfig` lets an operator
//! add rules, switch off built-in ones by id, or drop the built-ins entirely.

use super::types::{SecurityIssueType, SecuritySeverity};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRule {
    /// Reported as `pattern_id` on a match
    pub id: String,
    pub pattern: String,
    pub issue_type: SecurityIssueType,
    /// Informational only: any match rejects the submission
    pub severity: SecuritySeverity,
    pub description: String,
    /// Language tags (`python`, `node`/`javascript`, `bash`); empty applies everywhere
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "yes")]
    pub enabled: bool,
}

fn yes() -> bool {
    true
}

impl SecurityRule {
    pub fn new(
        id: &str,
        pattern: &str,
        issue_type: SecurityIssueType,
        severity: SecuritySeverity,
        description: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            issue_type,
            severity,
            description: description.to_string(),
            languages: Vec::new(),
            enabled: true,
        }
    }

    pub fn for_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn compile(&self) -> Result<Regex> {
        Regex::new(&self.pattern)
            .with_context(|| format!("Rule '{}' has an invalid pattern: {}", self.id, self.pattern))
    }
}

/// Operator overlay on the built-in rules, loaded from `SANDCELL_RULES_FILE`.
///
/// ```yaml
/// disabled_rules: [sh-env]
/// rules:
///   - id: py-pickle
///     pattern: "\\bpickle\\."
///     issue_type: dangerous_module
///     severity: high
///     description: "pickle deserialisation"
///     languages: [python]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Added on top of (or instead of) the built-ins
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
    /// Ids switched off, built-in or custom
    #[serde(default)]
    pub disabled_rules: Vec<String>,
    #[serde(default = "yes")]
    pub use_default_rules: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            disabled_rules: Vec::new(),
            use_default_rules: true,
        }
    }
}

impl RulesConfig {
    /// Read and validate a YAML overlay. A bad pattern fails here rather
    /// than being skipped at screening time.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read screener rules {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid screener rules in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Every custom rule must compile.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            rule.compile()?;
        }
        Ok(())
    }

    /// Load from `path` when given, otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_config_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        fs::write(
            &path,
            r#"
disabled_rules: [py-open]
rules:
  - id: py-pickle-loads
    pattern: "loads\\s*\\("
    issue_type: code_injection
    severity: high
    description: "deserialisation"
    languages: ["python"]
"#,
        )
        .unwrap();

        let cfg = RulesConfig::load_from_file(&path).unwrap();
        assert!(cfg.use_default_rules);
        assert_eq!(cfg.disabled_rules, vec!["py-open"]);
        assert_eq!(cfg.rules.len(), 1);
        assert!(cfg.rules[0].enabled);
        assert_eq!(cfg.rules[0].issue_type, SecurityIssueType::CodeInjection);
    }

    #[test]
    fn test_bad_pattern_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        fs::write(
            &path,
            "rules:\n  - id: broken\n    pattern: \"(unclosed\"\n    issue_type: reflection\n    severity: low\n    description: x\n",
        )
        .unwrap();
        let err = RulesConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_invalid_pattern_fails_to_compile() {
        let rule = SecurityRule::new(
            "bad",
            "(unclosed",
            SecurityIssueType::CodeInjection,
            SecuritySeverity::Low,
            "bad",
        );
        assert!(rule.compile().is_err());
    }
}
