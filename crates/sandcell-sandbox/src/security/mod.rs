//! Security module: static screening and the fallback capability policy
//!
//! - `types`: violation and report types
//! - `rules`: rule definitions and YAML configuration
//! - `default_rules`: built-in denylists for Python, Node.js and Bash
//! - `scanner`: the `Screener`
//! - `capability`: allow-lists enforced in-process on the fallback route

pub mod capability;
pub mod default_rules;
pub mod rules;
pub mod scanner;
pub mod types;

pub use capability::CapabilityPolicy;
pub use rules::{RulesConfig, SecurityRule};
pub use scanner::{format_report, format_report_json, Screener};
pub use types::{ScreeningReport, SecurityIssueType, SecuritySeverity, Violation};
