use azure_ops_toolkit::cli::{self, Cli};
use azure_ops_toolkit::config::Settings;
use azure_ops_toolkit::logging;
use clap::Parser;
use log::LevelFilter;
use std::error::Error;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    logging::init(Path::new(logging::LOG_CONFIG_FILE), LevelFilter::Info)?;
    dotenv::dotenv().ok();
    let args = Cli::parse();
    log::info!("#Start azops {:?}", args.command);

    let settings = Settings::from_env()?;
    if !cli::run(args, settings).await? {
        log::error!("Finished with failures");
        std::process::exit(1);
    }
    Ok(())
}
