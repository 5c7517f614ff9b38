//! log4rs set-up.

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::path::Path;

pub const LOG_CONFIG_FILE: &str = "log4rs.yml";

/// Initialise logging from `config_file`, or a console logger at `fallback`
/// level when the file is missing.
pub fn init(config_file: &Path, fallback: LevelFilter) -> Result<(), Box<dyn Error>> {
    if config_file.exists() {
        log4rs::init_file(config_file, Default::default())
            .map_err(|e| format!("Error initializing log4rs from {}: {e}", config_file.display()))?;
        log::debug!("Logging configured from {}", config_file.display());
        return Ok(());
    }
    log4rs::init_config(console_config(fallback)?)?;
    log::debug!("{} not found, logging to console", config_file.display());
    Ok(())
}

fn console_config(level: LevelFilter) -> Result<Config, Box<dyn Error>> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l:5})} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))?;
    Ok(config)
}
