//! RuntimeResolver trait: extension point for locating interpreters.
//!
//! The executor asks the resolver for an interpreter right before spawning,
//! so a resolver that is never called proves nothing was spawned.

use std::path::PathBuf;

use crate::config::SandboxSettings;
use crate::runner::Language;

/// Resolved runtime for a given language: interpreter path and optional env vars.
#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    /// Absolute path to the interpreter (the child runs with a cleared environment)
    pub interpreter: PathBuf,
    /// Extra environment variables passed to the child
    pub extra_env: Vec<(String, String)>,
}

/// Extension point for resolving runtime interpreters by language.
pub trait RuntimeResolver: Send + Sync {
    /// Resolve the interpreter for `language`.
    /// Returns `None` if no usable interpreter exists on this host.
    fn resolve(&self, language: Language) -> Option<ResolvedRuntime>;
}

/// Resolver backed by configured overrides, then `PATH` lookup.
#[derive(Debug, Clone, Default)]
pub struct SystemRuntimes {
    python: Option<PathBuf>,
    node: Option<PathBuf>,
    bash: Option<PathBuf>,
}

impl SystemRuntimes {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            python: settings.interpreter_override(Language::Python).cloned(),
            node: settings.interpreter_override(Language::Node).cloned(),
            bash: settings.interpreter_override(Language::Bash).cloned(),
        }
    }

    fn candidates(language: Language) -> &'static [&'static str] {
        match language {
            Language::Python => &["python3", "python"],
            Language::Node => &["node", "nodejs"],
            Language::Bash => &["bash"],
        }
    }
}

impl RuntimeResolver for SystemRuntimes {
    fn resolve(&self, language: Language) -> Option<ResolvedRuntime> {
        let configured = match language {
            Language::Python => self.python.as_ref(),
            Language::Node => self.node.as_ref(),
            Language::Bash => self.bash.as_ref(),
        };
        let interpreter = match configured {
            Some(path) if path.is_absolute() => Some(path.clone()),
            Some(name) => which::which(name).ok(),
            None => Self::candidates(language)
                .iter()
                .find_map(|name| which::which(name).ok()),
        }?;

        let extra_env = match language {
            Language::Python => vec![
                ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
                ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ],
            Language::Node | Language::Bash => Vec::new(),
        };
        Some(ResolvedRuntime {
            interpreter,
            extra_env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_resolves_to_absolute_path() {
        if which::which("bash").is_err() {
            eprintln!("bash not available, skipping");
            return;
        }
        let rt = SystemRuntimes::default().resolve(Language::Bash).unwrap();
        assert!(rt.interpreter.is_absolute());
    }

    #[test]
    fn test_missing_override_resolves_to_none() {
        let settings = SandboxSettings {
            python: Some(PathBuf::from("sandcell-no-such-python")),
            ..SandboxSettings::default()
        };
        assert!(SystemRuntimes::from_settings(&settings)
            .resolve(Language::Python)
            .is_none());
    }
}
