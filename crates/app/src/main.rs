mod cli;
mod html;
mod record;
#[cfg(feature = "with-tch")]
mod runtime;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use monitor::SessionConfig;

use crate::cli::{Cli, Command};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Record(args) => record::run(args),
        Command::CheckConfig { path } => {
            let config = SessionConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            let plan = config.plan().context("configuration is invalid")?;
            println!("{plan:#?}");
            println!("{} is valid", path.display());
            Ok(())
        }
    }
}
