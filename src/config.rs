//! Constants and environment driven settings.
//!
//! Settings are read once from the process environment (after `dotenv` has
//! loaded `.env`). Command line arguments override them per tool.

use std::env;
use std::error::Error;
use std::time::Duration;

/// Base sleep unit between paged Azure calls.
pub const SLEEP_MSEC: u64 = 200;

/// Largest stdout we accept from an external command.
pub const MAX_CMD_OUTPUT: usize = 50_000_000;

/// Azure hard limit on routes in a single route table.
pub const MAX_ROUTES_PER_TABLE: usize = 400;

/// SQL Server rejects more than 1000 row constructors in one VALUES list.
pub const MAX_SQL_BATCH_ROWS: usize = 1000;

/// Typed settings shared by the tools.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Compression tool binary (7-Zip compatible).
    pub seven_zip: String,
    /// Cloud copy tool binary.
    pub azcopy: String,
    /// SQL command line client binary.
    pub sqlcmd: String,
    /// Container URL, e.g. `https://acct.blob.core.windows.net/archive`.
    pub container_url: Option<String>,
    /// SAS token for `container_url`, without the leading `?`.
    pub sas_token: Option<String>,
    /// Time zone used for dated file names.
    pub time_zone: chrono_tz::Tz,
    /// Interval between rehydration status polls.
    pub poll_interval: Duration,
    /// Give up waiting for rehydration after this long.
    pub max_rehydrate_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            seven_zip: "7z".to_string(),
            azcopy: "azcopy".to_string(),
            sqlcmd: "sqlcmd".to_string(),
            container_url: None,
            sas_token: None,
            time_zone: chrono_tz::Pacific::Auckland,
            poll_interval: Duration::from_secs(15 * 60),
            max_rehydrate_wait: Duration::from_secs(16 * 3600),
        }
    }
}

impl Settings {
    /// Build settings from `AZOPS_*` environment variables.
    pub fn from_env() -> Result<Settings, Box<dyn Error>> {
        let mut settings = Settings::default();
        if let Ok(v) = env::var("AZOPS_7Z") {
            settings.seven_zip = v;
        }
        if let Ok(v) = env::var("AZOPS_AZCOPY") {
            settings.azcopy = v;
        }
        if let Ok(v) = env::var("AZOPS_SQLCMD") {
            settings.sqlcmd = v;
        }
        settings.container_url = env::var("AZOPS_CONTAINER_URL").ok();
        settings.sas_token = env::var("AZOPS_SAS_TOKEN")
            .ok()
            .map(|t| t.trim_start_matches('?').to_string());
        if let Ok(tz) = env::var("AZOPS_TIME_ZONE") {
            settings.time_zone = tz
                .parse()
                .map_err(|e| format!("Invalid AZOPS_TIME_ZONE '{tz}': {e}"))?;
        }
        if let Some(secs) = env_u64("AZOPS_POLL_SECS")? {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("AZOPS_MAX_REHYDRATE_SECS")? {
            settings.max_rehydrate_wait = Duration::from_secs(secs);
        }
        log::debug!("settings: {settings:?}");
        Ok(settings)
    }

    /// Current date in the configured time zone, `YYYY-MM-DD`.
    pub fn today(&self) -> String {
        chrono::Utc::now()
            .with_timezone(&self.time_zone)
            .format("%Y-%m-%d")
            .to_string()
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, Box<dyn Error>> {
    match env::var(key) {
        Ok(v) => Ok(Some(
            v.trim()
                .parse()
                .map_err(|e| format!("Invalid {key}='{v}': {e}"))?,
        )),
        Err(_) => Ok(None),
    }
}
