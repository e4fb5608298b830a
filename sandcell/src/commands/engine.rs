use anyhow::Result;
use sandcell_sandbox::container::{CliEngine, ContainerEngine};
use sandcell_sandbox::SandboxSettings;
use serde_json::json;

/// Check the container engine and print `{available, engine, reason}`.
pub fn engine_status(engine: Option<String>) -> Result<i32> {
    let mut settings = SandboxSettings::from_env();
    if engine.is_some() {
        settings.container_engine = engine;
    }
    let cli = CliEngine::from_settings(&settings);
    let check = cli.check_available();

    let status = json!({
        "available": check.is_ok(),
        "engine": cli.name(),
        "reason": check.as_ref().err(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(if check.is_ok() { 0 } else { 1 })
}
