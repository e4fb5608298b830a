mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use sandcell_core::{config, observability};

fn main() -> Result<()> {
    config::load_dotenv();
    observability::init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Exec {
            source,
            language,
            timeout,
            max_memory,
            isolation,
            pretty,
        } => commands::exec::exec_source(commands::exec::ExecArgs {
            source,
            language,
            timeout,
            max_memory,
            isolation,
            pretty,
        })?,
        Commands::Tool {
            source,
            name,
            language,
            timeout,
            max_memory,
            pretty,
        } => commands::tool::run_tool(
            &source,
            name,
            language.as_deref(),
            timeout,
            max_memory,
            pretty,
        )?,
        Commands::SecurityScan {
            script_path,
            language,
            json,
        } => commands::scan::security_scan(&script_path, language.as_deref(), json)?,
        Commands::Engine { engine } => commands::engine::engine_status(engine)?,
    };

    std::process::exit(code);
}
