//! # MRF CLI
//!
//! Command-line runner for the MRF robot runtime.
//!
//! ```bash
//! # Write a default config, edit it, check it
//! mrf-cli config init mrf.toml
//! mrf-cli config check mrf.toml
//!
//! # Run against the hardware described in the config
//! mrf-cli run --config mrf.toml
//!
//! # Run without hardware (scripted serial link, operator and camera)
//! mrf-cli run --simulate --start
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCommand, RunCommand};

/// MRF CLI - robot runtime runner
#[derive(Parser, Debug)]
#[command(name = "mrf-cli")]
#[command(about = "Command-line runner for the MRF robot runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Config file management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Start the runtime and run until Ctrl-C or an operator SHUTDOWN
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mrf=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Run { args } => args.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "mrf-cli",
            "run",
            "--simulate",
            "--start",
            "--port",
            "/dev/ttyUSB1",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { args } => {
                assert!(args.simulate);
                assert!(args.start);
                assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB1"));
                assert!(args.config.is_none());
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::try_parse_from(["mrf-cli", "config", "check", "robot.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommand::Check { .. })
        ));
    }
}
