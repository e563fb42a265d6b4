//! bucketdrop daemon entry point.

mod app;
mod cli;
mod logging;

use bucketdrop_config::{Config, FileConfig};
use clap::Parser;

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", cli::version_text());
        return Ok(());
    }

    let file = FileConfig::discover(cli.config.as_deref())?;
    logging::init(cli.verbose || file.verbose.unwrap_or(false));

    let rt = tokio::runtime::Runtime::new()?;

    if let Some(key_path) = &cli.set_sa_key_path {
        return rt.block_on(app::store_key(key_path, &file));
    }

    let config = Config::from_sources(file, cli.overrides())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting bucketdrop");

    rt.block_on(app::run(config))?;

    tracing::info!("shut down cleanly");
    Ok(())
}
