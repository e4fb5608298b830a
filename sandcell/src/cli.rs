use clap::{Parser, Subcommand};

/// Sandcell - run untrusted code under layered containment
#[derive(Parser, Debug)]
#[command(name = "sandcell")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a script file (or "-" for stdin) and print the result as JSON
    Exec {
        /// Path to the source file. Use "-" to read from stdin
        #[arg(value_name = "SOURCE")]
        source: String,

        /// python, node or bash (default: inferred from the file extension)
        #[arg(short, long)]
        language: Option<String>,

        /// Execution timeout in seconds, clamped to [1, 300] (default: from env or 30)
        #[arg(long)]
        timeout: Option<u64>,

        /// Memory ceiling in MB, clamped to [10, 512] (default: from env or 128)
        #[arg(long)]
        max_memory: Option<u64>,

        /// Isolation tier: process or container
        #[arg(long, default_value = "process")]
        isolation: String,

        /// Pretty-print the JSON result
        #[arg(long, default_value = "false")]
        pretty: bool,
    },

    /// Build and run one-off tool code with the strongest available isolation
    Tool {
        /// Path to the tool source. Use "-" to read from stdin
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Tool name used in the returned tool id
        #[arg(long)]
        name: Option<String>,

        /// python, node or bash (default: inferred from the file extension)
        #[arg(short, long)]
        language: Option<String>,

        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long)]
        max_memory: Option<u64>,

        #[arg(long, default_value = "false")]
        pretty: bool,
    },

    /// Screen a script without running it
    SecurityScan {
        /// Path to the script file to scan
        #[arg(value_name = "SCRIPT_PATH")]
        script_path: String,

        /// python, node or bash (default: inferred from the file extension)
        #[arg(short, long)]
        language: Option<String>,

        /// Output results as structured JSON (default: false)
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Report whether a container engine is usable
    Engine {
        /// Container CLI to check (default: SANDCELL_CONTAINER_ENGINE, then docker, then podman)
        #[arg(long, env = "SANDCELL_CONTAINER_ENGINE")]
        engine: Option<String>,
    },
}
