use anyhow::Result;
use sandcell_sandbox::{ExecuteRequest, Sandbox};

use super::{print_json, read_source, resolve_language};

pub struct ExecArgs {
    pub source: String,
    pub language: Option<String>,
    pub timeout: Option<u64>,
    pub max_memory: Option<u64>,
    pub isolation: String,
    pub pretty: bool,
}

/// Run one submission and print its `ExecutionResult`.
pub fn exec_source(args: ExecArgs) -> Result<i32> {
    let language = resolve_language(args.language.as_deref(), &args.source)?;
    let code = read_source(&args.source)?;
    let sandbox = Sandbox::from_env()?;

    let result = sandbox.execute(ExecuteRequest {
        language,
        code,
        timeout_secs: args.timeout,
        memory_limit_mb: args.max_memory,
        isolation: Some(args.isolation),
    });
    print_json(&result, args.pretty)?;
    Ok(if result.success { 0 } else { 1 })
}
