use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pickplace")]
#[command(version, about = "Convergence-monitored pick, transfer and place sequencer")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file. Defaults to pickplace.toml in the work directory.
    #[arg(long, global = true, env = "PICKPLACE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full sequence against the simulated cell
    Run {
        /// Do not write a run record
        #[arg(long)]
        no_report: bool,
    },
    /// Print the stage plan
    Stages,
    /// View, validate or create the configuration file
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default pickplace.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let work_dir = match cli.work_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run { no_report } => {
            let code = cmd::cmd_run(&cli, work_dir, *no_report).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Stages => cmd::cmd_stages(&cli, work_dir)?,
        Commands::Config { command } => cmd::cmd_config(&cli, work_dir, command.clone())?,
    }

    Ok(())
}
