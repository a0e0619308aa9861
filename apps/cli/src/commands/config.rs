//! Config file commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use mrf_driver::MrfConfig;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a config file with every default spelled out
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective config (defaults merged with the file, if any)
    Show {
        path: Option<PathBuf>,
    },

    /// Load and validate a config file
    Check {
        path: PathBuf,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Init { path, force } => init(&path, force),
            ConfigCommand::Show { path } => {
                let config = load_or_default(path.as_deref())?;
                print!("{}", config.to_toml_string()?);
                Ok(())
            },
            ConfigCommand::Check { path } => {
                let config = MrfConfig::load(&path)
                    .with_context(|| format!("{} is not a valid config", path.display()))?;
                println!("Config OK: {}", path.display());
                println!(
                    "  serial: {} @ {} baud",
                    config.robot.serial_port, config.robot.baud_rate
                );
                println!(
                    "  operator: {}:{}",
                    config.robot.tcp_host, config.robot.tcp_port
                );
                println!(
                    "  control period: {:?}",
                    config.runtime.control_period(&config.robot)
                );
                println!("  required channels: {:?}", config.runtime.required_channels);
                Ok(())
            },
        }
    }
}

/// Load `path`, or fall back to defaults when no file is given
pub fn load_or_default(path: Option<&Path>) -> Result<MrfConfig> {
    match path {
        Some(path) => MrfConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(MrfConfig::default()),
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let text = MrfConfig::default().to_toml_string()?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
