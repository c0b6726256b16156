mod apnx;
mod cli;
mod container;
mod device;
mod error;
mod exth;
#[cfg(test)]
mod fixture;
mod ledger;
mod metadata;
mod pipeline;
mod reader;
mod thumbnail;
mod writer;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.silent);
    pipeline::run(&cli)
}

fn init_logging(silent: bool) {
    let level = if silent { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}
