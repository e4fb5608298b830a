//! Static screener for submitted source
//!
//! Bounded-time, line-by-line regex matching. The screener is a cheap
//! fail-closed pre-filter layered under process/container isolation: any
//! match rejects the submission, severity is informational only.

use super::default_rules::default_rules;
use super::rules::{RulesConfig, SecurityRule};
use super::types::{ScreeningReport, SecuritySeverity, Violation};
use crate::runner::Language;
use regex::Regex;

struct CompiledRule {
    rule: SecurityRule,
    regex: Regex,
}

impl CompiledRule {
    fn applies_to(&self, language: Language) -> bool {
        self.rule.languages.is_empty() || self.rule.languages.iter().any(|l| language.matches(l))
    }
}

/// Compiled rule set. Disabled ids are dropped when the screener is built.
pub struct Screener {
    rules: Vec<CompiledRule>,
}

impl Default for Screener {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Screener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screener")
            .field("rules", &self.rule_count())
            .finish()
    }
}

impl Screener {
    pub fn new() -> Self {
        Self::with_config(&RulesConfig::default())
    }

    pub fn with_config(config: &RulesConfig) -> Self {
        let builtin = if config.use_default_rules {
            default_rules()
        } else {
            Vec::new()
        };
        let rules = builtin
            .into_iter()
            .chain(config.rules.iter().cloned())
            .filter(|r| r.enabled && !config.disabled_rules.contains(&r.id))
            .filter_map(|rule| match rule.compile() {
                Ok(regex) => Some(CompiledRule { rule, regex }),
                Err(e) => {
                    tracing::warn!(rule = %rule.id, "skipping screener rule: {:#}", e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Screen `source` for `language`. Pure: the same input always yields the same report.
    pub fn screen(&self, source: &str, language: Language) -> ScreeningReport {
        let active: Vec<&CompiledRule> =
            self.rules.iter().filter(|r| r.applies_to(language)).collect();
        let mut violations = Vec::new();

        for (idx, line) in source.lines().enumerate() {
            if is_comment_line(line.trim(), language) {
                continue;
            }
            for compiled in &active {
                let Some(m) = compiled.regex.find(line) else {
                    continue;
                };
                let rule = &compiled.rule;
                violations.push(Violation {
                    pattern_id: rule.id.clone(),
                    fragment: m.as_str().trim().to_string(),
                    line_number: idx + 1,
                    category: rule.issue_type,
                    severity: rule.severity,
                    description: rule.description.clone(),
                });
            }
        }

        ScreeningReport::from_violations(violations)
    }
}

fn is_comment_line(line: &str, language: Language) -> bool {
    match language {
        Language::Python | Language::Bash => line.starts_with('#'),
        Language::Node => line.starts_with("//") || line.starts_with("/*") || line.starts_with('*'),
    }
}

/// Format a screening report for display.
pub fn format_report(report: &ScreeningReport) -> String {
    if report.violations.is_empty() {
        return "✅ No violations found. Submission passes screening.".to_string();
    }

    let mut output = format!(
        "📋 Screening: {} violation(s), submission rejected\n\n",
        report.violations.len()
    );

    for (idx, v) in report.violations.iter().enumerate() {
        let severity_icon = match v.severity {
            SecuritySeverity::Low => "🟢",
            SecuritySeverity::Medium => "🟡",
            SecuritySeverity::High => "🟠",
            SecuritySeverity::Critical => "🔴",
        };

        output.push_str(&format!(
            "  {} #{} [{}] {}\n",
            severity_icon,
            idx + 1,
            v.severity,
            v.category
        ));
        output.push_str(&format!("     ├─ Rule: {}\n", v.pattern_id));
        output.push_str(&format!("     ├─ Line {}: {}\n", v.line_number, v.description));
        output.push_str(&format!("     └─ Match: {}\n\n", v.fragment));
    }

    output.push_str("⛔ Any violation rejects the submission before execution.");
    output
}

/// Format a screening report as structured JSON for machine parsing
pub fn format_report_json(report: &ScreeningReport) -> String {
    let count = |pred: fn(&SecuritySeverity) -> bool| {
        report.violations.iter().filter(|v| pred(&v.severity)).count()
    };
    let output = serde_json::json!({
        "safe": report.safe,
        "violations": report.violations,
        "rule_ids": report.violations.iter().map(|v| v.pattern_id.as_str()).collect::<Vec<_>>(),
        "high_severity_count": count(|s| matches!(s, SecuritySeverity::High | SecuritySeverity::Critical)),
        "medium_severity_count": count(|s| matches!(s, SecuritySeverity::Medium)),
        "low_severity_count": count(|s| matches!(s, SecuritySeverity::Low)),
    });

    serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rules::SecurityRule;
    use crate::security::types::SecurityIssueType;

    fn screen_py(code: &str) -> ScreeningReport {
        Screener::new().screen(code, Language::Python)
    }

    #[test]
    fn test_benign_python_is_safe() {
        let report = screen_py("import math\nprint(1+1)\nprint(math.sqrt(16))\n");
        assert!(report.safe, "{:?}", report.violations);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_import_os_rejected() {
        let report = screen_py("import os\nprint(os.getcwd())\n");
        assert!(!report.safe);
        let ids: Vec<&str> = report.violations.iter().map(|v| v.pattern_id.as_str()).collect();
        assert!(ids.contains(&"py-import-denied"));
        assert!(ids.contains(&"py-os-namespace"));
        assert_eq!(report.violations[0].line_number, 1);
        assert_eq!(report.violations[0].fragment, "import os");
    }

    #[test]
    fn test_aliased_import_caught_by_import_rule() {
        let report = screen_py("import subprocess as sp\nsp.run(['ls'])\n");
        assert!(!report.safe);
        assert!(report
            .violations
            .iter()
            .any(|v| v.pattern_id == "py-import-denied"));
    }

    #[test]
    fn test_from_import_and_dynamic_eval() {
        assert!(!screen_py("from shutil import rmtree").safe);
        assert!(!screen_py("x = eval('1+1')").safe);
        assert!(!screen_py("().__class__.__bases__[0].__subclasses__()").safe);
        assert!(!screen_py("m = __import__('o' + 's')").safe);
    }

    #[test]
    fn test_os_reached_through_another_module_rejected() {
        let report = screen_py("import random\nprint(random._os.listdir('.'))\n");
        assert!(!report.safe);
        let hit = report
            .violations
            .iter()
            .find(|v| v.pattern_id == "py-os-namespace")
            .unwrap();
        assert_eq!(hit.line_number, 2);
    }

    #[test]
    fn test_sqlite3_is_not_in_denylist() {
        // The fallback capability layer is expected to catch this one.
        assert!(screen_py("import sqlite3\n").safe);
    }

    #[test]
    fn test_comment_lines_skipped_and_order_preserved() {
        let report = screen_py("# import os\nx = 1\nimport socket\nimport ctypes\n");
        let lines: Vec<usize> = report.violations.iter().map(|v| v.line_number).collect();
        assert_eq!(lines, vec![3, 4]);
    }

    #[test]
    fn test_node_rules() {
        let s = Screener::new();
        assert!(s.screen("console.log(1 + 1);", Language::Node).safe);
        assert!(!s.screen("const cp = require('child_process');", Language::Node).safe);
        assert!(!s.screen("import fs from 'node:fs';", Language::Node).safe);
        assert!(!s.screen("const m = await import('fs');", Language::Node).safe);
        assert!(!s.screen("process.binding('spawn_sync')", Language::Node).safe);
    }

    #[test]
    fn test_bash_rules() {
        let s = Screener::new();
        assert!(s.screen("echo hello\nseq 1 3 | sort -r\n", Language::Bash).safe);
        assert!(!s.screen("curl http://example.com", Language::Bash).safe);
        assert!(!s.screen("cat /etc/passwd", Language::Bash).safe);
        assert!(!s.screen("exec 3<>/dev/tcp/10.0.0.1/80", Language::Bash).safe);
    }

    #[test]
    fn test_rules_do_not_cross_languages() {
        // `fs.readFileSync` is only a Node rule.
        assert!(Screener::new().screen("fs.readFileSync", Language::Bash).safe);
    }

    #[test]
    fn test_with_config_disable_and_custom_rule() {
        let config = RulesConfig {
            rules: vec![SecurityRule::new(
                "py-no-print",
                r"\bprint\s*\(",
                SecurityIssueType::SystemAccess,
                SecuritySeverity::Low,
                "print forbidden",
            )
            .for_languages(&["python"])],
            disabled_rules: vec!["py-open".to_string()],
            use_default_rules: true,
        };
        let s = Screener::with_config(&config);
        assert!(s.screen("f = open('x')", Language::Python).safe);
        let report = s.screen("print(1)", Language::Python);
        assert!(!report.safe, "low severity still rejects");
        assert_eq!(report.violations[0].pattern_id, "py-no-print");
    }

    #[test]
    fn test_use_default_rules_false_keeps_only_custom() {
        let config = RulesConfig {
            rules: vec![SecurityRule::new(
                "any-todo",
                r"TODO",
                SecurityIssueType::CodeInjection,
                SecuritySeverity::Low,
                "marker",
            )],
            disabled_rules: Vec::new(),
            use_default_rules: false,
        };
        let s = Screener::with_config(&config);
        assert_eq!(s.rule_count(), 1);
        assert!(s.screen("import os", Language::Python).safe);
        assert!(!s.screen("# x\necho TODO", Language::Bash).safe);
    }

    #[test]
    fn test_format_report_json() {
        let report = screen_py("import os");
        let v: serde_json::Value = serde_json::from_str(&format_report_json(&report)).unwrap();
        assert_eq!(v["safe"], false);
        assert!(v["high_severity_count"].as_u64().unwrap() >= 1);
        assert_eq!(v["violations"][0]["pattern_id"], "py-import-denied");
    }
}
