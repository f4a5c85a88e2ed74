use anyhow::Result;
use blinder_platform::{ConsoleLevel, set_console_handler};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{ElemhideCommand, EvalCommand, MatchesCommand};

#[derive(Parser)]
#[command(name = "blinder", version, about = "Query a script-hosted ad filtering engine")]
struct Cli {
    /// Configuration file (default: blinder.toml in the current directory or a parent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the bootstrap scripts
    #[arg(long, global = true)]
    resources: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a script in the engine session
    Eval(EvalCommand),
    /// Check whether a request would be blocked
    Matches(MatchesCommand),
    /// Print element hiding rules for a domain
    Elemhide(ElemhideCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    set_console_handler(|level, message| match level {
        ConsoleLevel::Warn | ConsoleLevel::Error => eprintln!("{}", message),
        _ => println!("{}", message),
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(resources) = cli.resources {
        config.resources.dir = Some(resources);
        config.source = None;
    }

    let platform = commands::build_platform(&config)?;
    match cli.command {
        Commands::Eval(cmd) => cmd.run(&platform).await?,
        Commands::Matches(cmd) => cmd.run(&platform, &config).await?,
        Commands::Elemhide(cmd) => cmd.run(&platform, &config).await?,
    }

    Ok(())
}
