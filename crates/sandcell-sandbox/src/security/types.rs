//! Screening report types and severity definitions
//!
//! This module contains the core type definitions for security screening.

use serde::{Deserialize, Serialize};

/// Severity levels for violations. Informational only: any violation rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for SecuritySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecuritySeverity::Low => write!(f, "Low"),
            SecuritySeverity::Medium => write!(f, "Medium"),
            SecuritySeverity::High => write!(f, "High"),
            SecuritySeverity::Critical => write!(f, "Critical"),
        }
    }
}

/// Category of a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityIssueType {
    FileOperation,
    NetworkRequest,
    CodeInjection,
    ProcessExecution,
    SystemAccess,
    /// Reflection / introspection primitives
    Reflection,
    DangerousModule,
    /// Blocked at runtime by the capability layer, not by the screener
    Capability,
}

impl std::fmt::Display for SecurityIssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityIssueType::FileOperation => write!(f, "File Operation"),
            SecurityIssueType::NetworkRequest => write!(f, "Network Request"),
            SecurityIssueType::CodeInjection => write!(f, "Code Injection"),
            SecurityIssueType::ProcessExecution => write!(f, "Process Execution"),
            SecurityIssueType::SystemAccess => write!(f, "System Access"),
            SecurityIssueType::Reflection => write!(f, "Reflection"),
            SecurityIssueType::DangerousModule => write!(f, "Dangerous Module"),
            SecurityIssueType::Capability => write!(f, "Capability"),
        }
    }
}

/// One matched pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule ID that triggered this violation
    pub pattern_id: String,
    /// The matched text
    pub fragment: String,
    /// 1-based line number (0 for runtime capability denials)
    pub line_number: usize,
    pub category: SecurityIssueType,
    pub severity: SecuritySeverity,
    pub description: String,
}

impl Violation {
    /// Violation reported by the capability layer for a blocked import or command.
    pub fn capability(target: &str) -> Self {
        Self {
            pattern_id: "capability".to_string(),
            fragment: target.to_string(),
            line_number: 0,
            category: SecurityIssueType::Capability,
            severity: SecuritySeverity::High,
            description: format!("'{}' is outside the capability allow-list", target),
        }
    }
}

/// Result of screening one submission. Violations are in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub safe: bool,
    pub violations: Vec<Violation>,
}

impl ScreeningReport {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            safe: violations.is_empty(),
            violations,
        }
    }
}
