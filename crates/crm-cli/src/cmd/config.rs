use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use crm_core::config::{EngineConfig, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a default configuration
    Init {
        /// Name of the local node
        #[arg(long)]
        node: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Validate the configuration for common mistakes
    Check,
}

pub fn run(path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { node, force } => init(path, &node, force, json),
        ConfigSubcommand::Show => show(path, json),
        ConfigSubcommand::Check => check(path, json),
    }
}

fn init(path: &Path, node: &str, force: bool, json: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = EngineConfig::new(node);
    config
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({ "path": path.display().to_string(), "node": node }))?;
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(path).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn check(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(path).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
