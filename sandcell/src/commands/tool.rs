use anyhow::Result;
use sandcell_sandbox::{Sandbox, ToolRequest};

use super::{print_json, read_source, resolve_language};

/// Build and run one-off tool code; always requests the container tier.
pub fn run_tool(
    source: &str,
    name: Option<String>,
    language: Option<&str>,
    timeout: Option<u64>,
    max_memory: Option<u64>,
    pretty: bool,
) -> Result<i32> {
    let language = resolve_language(language, source)?;
    let code = read_source(source)?;
    let sandbox = Sandbox::from_env()?;

    let run = sandbox.build_and_run_tool(ToolRequest {
        name,
        language,
        code,
        timeout_secs: timeout,
        memory_limit_mb: max_memory,
    });
    print_json(&run, pretty)?;
    Ok(if run.result.success { 0 } else { 1 })
}
