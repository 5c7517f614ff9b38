//! Azure Resource Graph queries through `az graph query`.

use super::cli::{self, CommandRunner};
use crate::config;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// One page of a Resource Graph response.
#[derive(Serialize, Deserialize, Debug)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub skip_token: Option<String>,
    pub total_records: Option<u32>,
    pub count: i32,
}

/// All rows of a query.
#[derive(Serialize, Deserialize, Debug)]
pub struct Data<T> {
    pub data: Vec<T>,
    pub total_records: Option<u32>,
    pub count: i32,
}

impl<T> Default for Data<T> {
    fn default() -> Self {
        Data {
            data: Vec::new(),
            total_records: None,
            count: 0,
        }
    }
}

/// Run a Resource Graph query, following skip tokens until exhausted.
///
/// `page_pause_ms` is slept between pages to stay under the throttling limit.
/// Like the `az` calls this blocks the thread, async callers go through
/// `block_in_place`.
pub fn query<T, R>(runner: &R, kql: &str, page_pause_ms: u64) -> Result<Data<T>, Box<dyn Error>>
where
    T: DeserializeOwned,
    R: CommandRunner + ?Sized,
{
    let mut data: Data<T> = Default::default();
    let mut skip_token: Option<String> = None;
    let mut block = 0;

    loop {
        let mut args =
            cli::args(["graph", "query", "--first", "1000", "-q", kql, "--output", "json"]);
        if let Some(token) = &skip_token {
            args.push("--skip-token".to_string());
            args.push(token.clone());
        }
        let page: Page<T> = cli::run_json(runner, "az", &args)
            .map_err(|e| format!("Error in graph block {block}: {e}"))?;

        data.count += page.count;
        if let Some(total) = page.total_records {
            data.total_records = Some(total);
        }
        data.data.extend(page.data);

        log::info!(
            "got block#{block:2} record_count=+{count:3} => {total:3}",
            count = page.count,
            total = data.count,
        );

        match page.skip_token {
            Some(token) if !token.is_empty() => {
                if skip_token.as_deref() == Some(token.as_str()) {
                    return Err("Skip token not unique - possible infinite loop".into());
                }
                skip_token = Some(token);
            }
            _ => break,
        }
        block += 1;
        std::thread::sleep(std::time::Duration::from_millis(page_pause_ms));
    }

    log::info!(
        "Got {} records from az graph query in {} block(s)",
        data.data.len(),
        block + 1
    );
    Ok(data)
}

/// [`query`] with the default inter-page pause.
pub fn query_default<T, R>(runner: &R, kql: &str) -> Result<Data<T>, Box<dyn Error>>
where
    T: DeserializeOwned,
    R: CommandRunner + ?Sized,
{
    query(runner, kql, config::SLEEP_MSEC * 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::cli::fake::FakeRunner;

    #[derive(Deserialize, Debug)]
    struct Row {
        name: String,
    }

    #[test]
    fn test_query_follows_skip_token() {
        let runner = FakeRunner::new()
            .queue(Ok(
                r#"{"data":[{"name":"a"},{"name":"b"}],"skip_token":"t1","total_records":3,"count":2}"#,
            ))
            .queue(Ok(r#"{"data":[{"name":"c"}],"skip_token":null,"total_records":3,"count":1}"#));
        let data: Data<Row> = query(&runner, "resources", 0).unwrap();
        let names: Vec<&str> = data.data.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(data.count, 3);
        assert_eq!(data.total_records, Some(3));

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].contains("--skip-token"));
        assert!(calls[1].ends_with("--skip-token t1"));
    }

    #[test]
    fn test_query_repeated_token_is_error() {
        let page = r#"{"data":[],"skip_token":"same","total_records":0,"count":0}"#;
        let runner = FakeRunner::new().queue(Ok(page)).queue(Ok(page));
        let err = query::<Row, _>(&runner, "resources", 0).unwrap_err();
        assert!(err.to_string().contains("infinite loop"));
    }

    #[test]
    fn test_query_error_names_block() {
        let runner = FakeRunner::new().queue(Err("az: not logged in"));
        let err = query::<Row, _>(&runner, "resources", 0).unwrap_err();
        assert!(err.to_string().contains("block 0"));
    }
}
