//! semloop CLI: the main entry point.
//!
//! Commands:
//! - `run`    : Run one goal through the reasoning loop
//! - `serve`  : Start the HTTP gateway
//! - `tools`  : List the addressable tools
//! - `parse`  : Run an output parser over text
//! - `status` : Show configuration status

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "semloop",
    about = "semloop: a ReAct reasoning-loop engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a goal to completion
    Run {
        /// What the agent should achieve
        #[arg(short, long)]
        goal: String,

        /// Restrict the run to these tools (repeatable; default: all)
        #[arg(short, long = "tool")]
        tools: Vec<String>,

        /// Override the iteration budget
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Override the retry budget
        #[arg(long)]
        max_retries: Option<usize>,

        /// Print every run event as it happens
        #[arg(long)]
        show_events: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List available tools
    Tools,

    /// Parse text with one of the output parsers
    Parse {
        /// Parser name (json, action, boolean, code, list, numbered_list, last_line, datetime)
        #[arg(short, long)]
        parser: String,

        /// Read the text from a file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            goal,
            tools,
            max_iterations,
            max_retries,
            show_events,
        } => {
            commands::run::run(commands::run::RunArgs {
                goal,
                tools,
                max_iterations,
                max_retries,
                show_events,
            })
            .await?
        }
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Tools => commands::tools::run()?,
        Commands::Parse { parser, file } => commands::parse::run(&parser, file.as_deref())?,
        Commands::Status => commands::status::run()?,
    }

    Ok(())
}
