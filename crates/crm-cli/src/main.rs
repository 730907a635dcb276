mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, digest::DigestArgs, simulate::SimulateArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "crm",
    about = "Cluster transition graphs: inspect, dry-run and fingerprint configuration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Engine configuration file
    #[arg(long, global = true, env = "CRM_CONFIG", default_value = crm_core::config::CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the synapses and actions of a transition graph
    Show {
        /// Graph document (JSON or YAML)
        graph: PathBuf,
    },

    /// Dry-run a transition graph, confirming every action immediately
    Simulate(SimulateArgs),

    /// Compute the digest of a configuration snapshot
    Digest(DigestArgs),

    /// Check a configuration snapshot against its on-disk digest
    Verify {
        /// Configuration snapshot (JSON or YAML)
        snapshot: PathBuf,

        /// Expected digest (default: read from <snapshot>.sig)
        #[arg(long)]
        digest: Option<String>,
    },

    /// Manage the engine configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Simulate(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Show { graph } => cmd::show::run(&cli.config, &graph, cli.json),
        Commands::Simulate(args) => cmd::simulate::run(&cli.config, args, cli.json),
        Commands::Digest(args) => cmd::digest::run(&cli.config, args, cli.json),
        Commands::Verify { snapshot, digest } => {
            cmd::verify::run(&snapshot, digest.as_deref(), cli.json)
        }
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
