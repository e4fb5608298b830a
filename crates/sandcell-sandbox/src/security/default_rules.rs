//! Default screening rules for Python, JavaScript/Node.js and Bash
//!
//! Each language gets two kinds of rules: whole-word patterns for dangerous
//! namespaces and primitives, and import/require statements naming a module
//! from the language's denylist (a module can be imported under an alias and
//! never referenced by name again).

use super::rules::SecurityRule;
use super::types::SecurityIssueType::{self, *};
use super::types::SecuritySeverity::{self, *};

/// Python modules whose import alone rejects a submission
pub const DENIED_PYTHON_MODULES: &[&str] = &[
    "os", "posix", "nt", "subprocess", "shutil", "socket", "socketserver", "ssl", "ctypes", "cffi",
    "pty", "fcntl", "resource", "multiprocessing", "threading", "_thread", "importlib", "imp",
    "builtins", "inspect", "gc", "pickle", "marshal", "shelve", "pathlib", "glob", "tempfile",
    "io", "urllib", "http", "requests", "httpx", "ftplib", "smtplib", "telnetlib", "webbrowser",
    "code", "codeop", "runpy", "signal", "platform", "pwd", "grp", "mmap", "asyncio",
];

/// Node.js modules whose require/import alone rejects a submission
pub const DENIED_NODE_MODULES: &[&str] = &[
    "fs", "child_process", "net", "http", "https", "http2", "dgram", "dns", "tls", "os", "vm",
    "worker_threads", "cluster", "process", "module", "v8", "inspector", "perf_hooks", "repl",
    "async_hooks", "trace_events", "wasi",
];

fn alternation(modules: &[&str]) -> String {
    modules
        .iter()
        .map(|m| regex::escape(m))
        .collect::<Vec<_>>()
        .join("|")
}

/// `(id, kind, severity, pattern, description)`
type RuleRow = (
    &'static str,
    SecurityIssueType,
    SecuritySeverity,
    &'static str,
    &'static str,
);

fn expand(language: &str, rows: &[RuleRow]) -> Vec<SecurityRule> {
    rows.iter()
        .map(|&(id, kind, severity, pattern, description)| {
            SecurityRule::new(id, pattern, kind, severity, description).for_languages(&[language])
        })
        .collect()
}

// Open-call rules use `(?:^|[^.\w])` so `file.open()` style method calls pass.
#[rustfmt::skip]
const PYTHON_ROWS: &[RuleRow] = &[
    ("py-open", FileOperation, Medium, r"(?:^|[^.\w])open\s*\(", "Built-in open() function (file operation)"),
    ("py-os-namespace", FileOperation, High, r"(?:\b|_)(?:os|posix|shutil|pathlib|glob|tempfile)\.\w+", "Filesystem / OS namespace access"),
    ("py-process", ProcessExecution, Critical, r"\b(?:subprocess|multiprocessing|pty)\b|\b(?:system|popen|spawn\w*|execv\w*|fork)\s*\(", "Process spawning"),
    ("py-env", SystemAccess, High, r"\benviron\b|\bgetenv\s*\(|\bputenv\s*\(", "Environment access"),
    ("py-native", SystemAccess, Critical, r"\b(?:ctypes|cffi|mmap|fcntl|resource)\.\w+", "Native memory / syscall access"),
    ("py-network", NetworkRequest, High, r"\b(?:socket|urllib|requests|httpx|ftplib|smtplib|telnetlib|ssl)\.\w+|\bhttp\.client\b|\burlopen\s*\(", "Network access"),
    ("py-eval", CodeInjection, Critical, r"(?:^|[^.\w])eval\s*\(", "eval() - arbitrary code execution"),
    ("py-exec", CodeInjection, Critical, r"(?:^|[^.\w])exec\s*\(", "exec() - arbitrary code execution"),
    ("py-compile", CodeInjection, High, r"(?:^|[^.\w])compile\s*\(", "compile() - dynamic code object creation"),
    ("py-dynamic-import", CodeInjection, Critical, r"\b__import__\b|\bimportlib\b|\bimport_module\s*\(", "Dynamic import"),
    ("py-dunder-introspection", Reflection, Critical, r"__(?:class|bases|base|mro|subclasses|globals|builtins|code|closure|getattribute|dict|loader|spec|reduce|reduce_ex)__", "Object model introspection (sandbox escape primitive)"),
    ("py-reflection-builtins", Reflection, High, r"(?:^|[^.\w])(?:getattr|setattr|delattr|globals|locals|vars)\s*\(", "Reflective attribute / namespace access"),
    ("py-sys-internals", Reflection, Critical, r"\bsys\.(?:modules|_getframe|settrace|setprofile|meta_path|path_hooks|addaudithook)\b", "Interpreter internals access"),
];

#[rustfmt::skip]
const NODE_ROWS: &[RuleRow] = &[
    ("js-dynamic-import", CodeInjection, Critical, r"\bimport\s*\(", "Dynamic import()"),
    ("js-eval", CodeInjection, Critical, r"(?:^|[^.\w])eval\s*\(", "eval() - arbitrary code execution"),
    ("js-function-constructor", CodeInjection, Critical, r"\bnew\s+Function\s*\(|(?:^|[^.\w])Function\s*\(", "Function constructor - dynamic code"),
    ("js-child-process", ProcessExecution, Critical, r"\bchild_process\b|\b(?:execSync|spawnSync|execFileSync|execFile|spawn|fork)\s*\(", "Process spawning"),
    ("js-fs", FileOperation, High, r"\bfs\.\w+|\b(?:readFileSync|writeFileSync|createReadStream|createWriteStream)\b", "Filesystem access"),
    ("js-process-internals", SystemAccess, Critical, r"\bprocess\s*\.\s*(?:binding|_linkedBinding|dlopen|env|kill|mainModule|getBuiltinModule|chdir|setuid|setgid|umask)\b", "Process internals / environment access"),
    ("js-network", NetworkRequest, High, r"\bfetch\s*\(|\bXMLHttpRequest\b|\bWebSocket\b", "Network access"),
    ("js-reflection", Reflection, Critical, r"\bconstructor\s*\.\s*constructor\b|\b__proto__\b|\bglobalThis\b|\brequire\s*\.\s*cache\b|\bmodule\s*\.\s*constructor\b", "Prototype / module system reflection (sandbox escape primitive)"),
];

#[rustfmt::skip]
const BASH_ROWS: &[RuleRow] = &[
    ("sh-network", NetworkRequest, High, r"\b(?:curl|wget|nc|ncat|netcat|telnet|ssh|scp|sftp|ftp|socat|rsync)\b|/dev/(?:tcp|udp)/", "Network client or /dev/tcp socket"),
    ("sh-interpreter", ProcessExecution, High, r"\b(?:python[\d.]*|perl|ruby|node|php|lua|sh|bash|zsh|dash|ksh|busybox)\b", "Nested interpreter"),
    ("sh-eval", CodeInjection, Critical, r"\b(?:eval|exec|source|nohup|setsid|disown|xargs)\b|(?:^|[;&|]\s*)\.\s+\S", "Dynamic evaluation or process replacement"),
    ("sh-privilege", SystemAccess, Critical, r"\b(?:sudo|su|doas|chmod|chown|chroot|mount|umount|setcap|kill|killall|pkill)\b", "Privilege or process control"),
    ("sh-filesystem", FileOperation, High, r"\b(?:rm|rmdir|dd|mkfs\w*|shred|mv|cp|ln|truncate|find)\b", "Filesystem modification"),
    ("sh-sensitive-path", SystemAccess, High, r"/(?:etc|proc|sys|root|home|boot|var)/|/dev/(?:mem|kmem|sd\w*|nvme\w*)", "Sensitive host path"),
    ("sh-env", SystemAccess, Medium, r"\b(?:env|printenv|export|declare\s+-x)\b|\$\{?(?:PATH|HOME|SHELL|ENV|BASH_ENV|LD_PRELOAD|LD_LIBRARY_PATH)\b", "Environment access"),
];

pub fn python_rules() -> Vec<SecurityRule> {
    let mods = alternation(DENIED_PYTHON_MODULES);
    let mut rules = vec![
        SecurityRule::new(
            "py-import-denied",
            &format!(r"(?:^|;)\s*import\s+(?:[\w.]+(?:\s+as\s+\w+)?\s*,\s*)*(?:{mods})\b"),
            DangerousModule,
            High,
            "Import of a denied module",
        )
        .for_languages(&["python"]),
        SecurityRule::new(
            "py-from-import-denied",
            &format!(r"(?:^|;)\s*from\s+(?:{mods})\b[\w.]*\s+import\b"),
            DangerousModule,
            High,
            "from-import of a denied module",
        )
        .for_languages(&["python"]),
    ];
    rules.extend(expand("python", PYTHON_ROWS));
    rules
}

pub fn node_rules() -> Vec<SecurityRule> {
    let mods = alternation(DENIED_NODE_MODULES);
    let mut rules = vec![
        SecurityRule::new(
            "js-require-denied",
            &format!(r#"\brequire\s*\(\s*['"`](?:node:)?(?:{mods})(?:/[\w/]*)?['"`]\s*\)"#),
            DangerousModule,
            High,
            "require() of a denied module",
        )
        .for_languages(&["node"]),
        SecurityRule::new(
            "js-import-denied",
            &format!(r#"\bimport\b[^'"]*['"](?:node:)?(?:{mods})(?:/[\w/]*)?['"]"#),
            DangerousModule,
            High,
            "import of a denied module",
        )
        .for_languages(&["node"]),
    ];
    rules.extend(expand("node", NODE_ROWS));
    rules
}

pub fn bash_rules() -> Vec<SecurityRule> {
    expand("bash", BASH_ROWS)
}

/// Python, then Node, then Bash.
pub fn default_rules() -> Vec<SecurityRule> {
    let mut rules = python_rules();
    rules.extend(node_rules());
    rules.extend(bash_rules());
    rules
}
