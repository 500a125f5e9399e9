mod builtin;
mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "topic-relay",
    about = "Match queue message topics to configured actions and relay them to HTTP APIs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Relay config file (YAML, or JSON when it ends in .json)
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "TOPIC_RELAY_CONFIG",
        default_value = "relay.yaml"
    )]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config for common mistakes
    Validate,

    /// Show the actions a topic and payload would trigger, without running them
    Hydrate {
        /// Message topic
        #[arg(long)]
        topic: String,

        /// Payload as inline JSON
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the payload from a JSON file
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },

    /// Handle queue messages read as JSON lines
    Dispatch {
        /// Messages file, one message per line (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Dispatch { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Validate => cmd::validate::run(&cli.config, cli.json),
        Commands::Hydrate {
            topic,
            payload,
            payload_file,
        } => cmd::hydrate::run(
            &cli.config,
            &topic,
            payload.as_deref(),
            payload_file.as_deref(),
            cli.json,
        ),
        Commands::Dispatch { input } => cmd::dispatch::run(&cli.config, input.as_deref(), cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
