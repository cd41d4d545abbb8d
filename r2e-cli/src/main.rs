mod commands;
mod workspace;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use r2e_observability::{Observability, ObservabilityConfig};

#[derive(Parser)]
#[command(name = "r2e", version, about = "R2E CLI — inspect and validate a UNS data-integration workspace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a workspace's samples, then run the historical-retention
    /// sweep once and print how many points it archived
    Archive {
        /// Path to the workspace JSON file
        workspace: PathBuf,
        /// Drop points older than this many minutes
        #[arg(long, default_value_t = 43_200)]
        retention_minutes: u64,
    },
    /// Sanity-check a workspace file's hierarchy, auto-map rules, and
    /// declared connections
    Doctor {
        /// Path to the workspace JSON file
        workspace: PathBuf,
    },
    /// Print the namespace structure a workspace's samples resolve into
    Namespace {
        /// Path to the workspace JSON file
        workspace: PathBuf,
    },
    /// Print a connection descriptor's config/input/output schema
    Schema {
        /// Connection type (e.g. mqtt, socketio)
        connection_type: String,
    },
    /// Replay a workspace's samples and print system status
    Status {
        /// Path to the workspace JSON file
        workspace: PathBuf,
    },
    /// List or search topics registered while replaying a workspace
    Topics {
        /// Path to the workspace JSON file
        workspace: PathBuf,
        /// MQTT-style glob to match against the wire topic
        #[arg(long)]
        pattern: Option<String>,
        /// Only topics from this sourceType
        #[arg(long)]
        source_type: Option<String>,
        /// Only topics that have not yet been verified
        #[arg(long)]
        unverified: bool,
    },
    /// Validate every declared connection's configuration
    Validate {
        /// Path to the workspace JSON file
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Held for the process lifetime so `tracing::warn!`/`debug!` calls
    // throughout the hub crates actually reach the terminal.
    let _otel_guard = Observability::new(ObservabilityConfig::new("r2e-cli")).install();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Archive { workspace, retention_minutes } => {
            commands::archive::run(&workspace, retention_minutes).await
        }
        Commands::Doctor { workspace } => commands::doctor::run(&workspace),
        Commands::Namespace { workspace } => commands::namespace::run(&workspace).await,
        Commands::Schema { connection_type } => commands::schema::run(&connection_type),
        Commands::Status { workspace } => commands::status::run(&workspace).await,
        Commands::Topics { workspace, pattern, source_type, unverified } => {
            commands::topics::run(
                &workspace,
                commands::topics::TopicsFilter {
                    pattern,
                    source_type,
                    unverified_only: unverified,
                },
            )
            .await
        }
        Commands::Validate { workspace } => commands::validate::run(&workspace),
    };

    if let Err(e) = result {
        eprintln!("{}", colored::Colorize::red(format!("Error: {e}").as_str()));
        std::process::exit(1);
    }
}
