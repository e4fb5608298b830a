//! In-process capability policy for the fallback route.
//!
//! An allow-list, not a denylist: the supervisor programs refuse every import
//! (or command) not named here. It is kept independent of the screener's
//! denylist so that a gap in one layer is not automatically a gap in both.

use serde::Serialize;

use crate::runner::Language;

/// Exit code the supervisors use when the capability layer blocks something
pub const CAPABILITY_DENIED_EXIT_CODE: i32 = 86;

/// Marker written to stderr by the supervisors, followed by `<token>:<target>`
pub const CAPABILITY_DENIED_MARKER: &str = "SANDCELL_CAPABILITY_DENIED:";

/// Python modules importable from fallback-routed code
pub const PYTHON_ALLOWED_MODULES: &[&str] = &[
    "abc", "array", "base64", "binascii", "bisect", "calendar", "cmath", "collections",
    "contextlib", "copy", "dataclasses", "datetime", "decimal", "enum", "fractions", "functools",
    "hashlib", "heapq", "itertools", "json", "math", "numbers", "operator", "pprint", "random",
    "re", "statistics", "string", "struct", "textwrap", "time", "typing", "unicodedata", "uuid",
];

/// Builtins exposed to fallback-routed Python code
pub const PYTHON_ALLOWED_BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "bytearray", "bytes", "callable", "chr",
    "classmethod", "complex", "dict", "divmod", "enumerate", "filter", "float", "format",
    "frozenset", "hasattr", "hash", "hex", "id", "int", "isinstance", "issubclass", "iter", "len",
    "list", "map", "max", "min", "next", "object", "oct", "ord", "pow", "print", "property",
    "range", "repr", "reversed", "round", "set", "slice", "sorted", "staticmethod", "str", "sum",
    "super", "tuple", "type", "zip", "__build_class__", "__name__", "None", "True", "False",
    "NotImplemented", "Ellipsis", "BaseException", "Exception", "ArithmeticError",
    "AssertionError", "AttributeError", "EOFError", "IndexError", "KeyError", "LookupError",
    "MemoryError", "NameError", "NotImplementedError", "OverflowError", "RecursionError",
    "RuntimeError", "StopIteration", "TypeError", "UnicodeError", "ValueError",
    "ZeroDivisionError", "ImportError", "ModuleNotFoundError",
];

/// Node.js modules requirable from fallback-routed code
pub const NODE_ALLOWED_MODULES: &[&str] = &[
    "assert", "buffer", "events", "path", "querystring", "string_decoder", "url", "util",
];

/// Commands reachable from the restricted fallback shell
pub const BASH_ALLOWED_COMMANDS: &[&str] = &[
    "basename", "cat", "cut", "date", "dirname", "expr", "false", "fold", "grep", "head", "paste",
    "printf", "rev", "seq", "sleep", "sort", "tail", "tr", "true", "uniq", "wc",
];

/// Capability policy handed to a supervisor as a JSON data file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapabilityPolicy {
    pub language: Language,
    /// Importable modules (Python/Node) or reachable commands (Bash)
    pub allowed: Vec<String>,
    /// Builtins exposed to the submission (Python only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_builtins: Vec<String>,
    pub denied_exit_code: i32,
    pub marker: String,
    /// Per-run secret; a marker line without it is ordinary stderr
    pub token: String,
}

impl CapabilityPolicy {
    pub fn for_language(language: Language) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let (allowed, allowed_builtins) = match language {
            Language::Python => (owned(PYTHON_ALLOWED_MODULES), owned(PYTHON_ALLOWED_BUILTINS)),
            Language::Node => (owned(NODE_ALLOWED_MODULES), Vec::new()),
            Language::Bash => (owned(BASH_ALLOWED_COMMANDS), Vec::new()),
        };
        Self {
            language,
            allowed,
            allowed_builtins,
            denied_exit_code: CAPABILITY_DENIED_EXIT_CODE,
            marker: CAPABILITY_DENIED_MARKER.to_string(),
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Prefix of a genuine denial line written by this run's supervisor.
    pub fn denial_prefix(&self) -> String {
        format!("{}{}:", self.marker, self.token)
    }

    pub fn allows(&self, target: &str) -> bool {
        let root = match self.language {
            Language::Python => target.split('.').next().unwrap_or(target),
            Language::Node => target
                .trim_start_matches("node:")
                .split('/')
                .next()
                .unwrap_or(target),
            Language::Bash => target,
        };
        self.allowed.iter().any(|a| a == root)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::default_rules::{DENIED_NODE_MODULES, DENIED_PYTHON_MODULES};

    #[test]
    fn test_allow_lists_and_denylists_do_not_overlap() {
        let py = CapabilityPolicy::for_language(Language::Python);
        for denied in DENIED_PYTHON_MODULES {
            assert!(!py.allows(denied), "{} is both denied and allowed", denied);
        }
        let js = CapabilityPolicy::for_language(Language::Node);
        for denied in DENIED_NODE_MODULES {
            assert!(!js.allows(denied), "{} is both denied and allowed", denied);
        }
    }

    #[test]
    fn test_allows_submodules_of_allowed_roots() {
        let py = CapabilityPolicy::for_language(Language::Python);
        assert!(py.allows("collections.abc"));
        assert!(!py.allows("sqlite3"));
        assert!(!py.allows("sys"));

        let js = CapabilityPolicy::for_language(Language::Node);
        assert!(js.allows("node:path"));
        assert!(js.allows("path/posix"));
        assert!(!js.allows("fs"));
    }

    #[test]
    fn test_policy_json_shape() {
        let json = CapabilityPolicy::for_language(Language::Bash).to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["language"], "bash");
        assert_eq!(v["denied_exit_code"], 86);
        assert!(v.get("allowed_builtins").is_none());
        assert!(v["allowed"].as_array().unwrap().iter().any(|c| c == "seq"));
        assert_eq!(v["token"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn test_each_policy_gets_its_own_token() {
        let a = CapabilityPolicy::for_language(Language::Python);
        let b = CapabilityPolicy::for_language(Language::Python);
        assert_ne!(a.token, b.token);
        assert!(a.denial_prefix().starts_with(CAPABILITY_DENIED_MARKER));
        assert!(a.denial_prefix().ends_with(&format!("{}:", a.token)));
    }
}
