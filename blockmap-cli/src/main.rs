//! blockmap command-line interface.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockmap")]
#[command(about = "Renders browsable tile maps from voxel-world saves", version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "blockmap.toml", global = true)]
    config: PathBuf,

    #[command(flatten)]
    render: commands::render::RenderArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Update the entities cache and print all signs of the configured worlds
    Signs,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match blockmap::config::Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    };

    let exit_code = match args.command {
        None => commands::render::run(&config, &args.render),
        Some(Command::Signs) => commands::signs::run(&config),
    };
    process::exit(exit_code);
}
