//! Dated JSON cache for slow Azure queries.
//!
//! Data fetched once per day is written to `<stem>_<YYYY-MM-DD>.json` and
//! re-read on later runs that day.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};

/// Default cache file name for `stem` on `date`.
pub fn cache_file_name(stem: &str, date: &str) -> PathBuf {
    PathBuf::from(format!("{stem}_{date}.json"))
}

/// Read data from `cache_file`, or fetch and write it when absent.
///
/// An explicitly given cache file must exist. Without one, the dated default
/// name is used and populated by `fetch` on a miss.
pub fn read_or_fetch<T, F>(
    cache_file: Option<&Path>,
    default_file: &Path,
    fetch: F,
) -> Result<T, Box<dyn Error>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, Box<dyn Error>>,
{
    let cache_file = match cache_file {
        Some(file) => {
            if !file.exists() {
                return Err(format!("Cache file does not exist: {}", file.display()).into());
            }
            log::info!("Using provided cache file: {}", file.display());
            file
        }
        None => default_file,
    };

    match std::fs::read_to_string(cache_file) {
        Ok(json) => {
            log::info!("Reading from cache file: {}", cache_file.display());
            Ok(super::cli::parse_json(&json)
                .map_err(|e| format!("Error parsing cache {}: {e}", cache_file.display()))?)
        }
        Err(_) => {
            log::warn!("Cache file not found: {}", cache_file.display());
            let data = fetch()?;
            let json =
                serde_json::to_string(&data).map_err(|e| format!("Error serializing JSON: {e}"))?;
            log::warn!("Writing data to cache file: {}", cache_file.display());
            std::fs::write(cache_file, json).map_err(|e| {
                format!("Error writing cache file {}: {e}", cache_file.display())
            })?;
            Ok(data)
        }
    }
}
