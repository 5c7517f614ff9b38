//! External command execution.
//!
//! Every tool shells out to something: `az`, `azcopy`, `7z`, `sqlcmd`.
//! [`CommandRunner`] is the seam that lets workflows run against a fake.

use crate::config;
use colored::Colorize;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::error::Error;
use std::process::Command;
use std::sync::OnceLock;

/// Regex for splitting command strings while preserving quoted substrings.
static COMMAND_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_command_regex() -> &'static Regex {
    COMMAND_REGEX.get_or_init(|| {
        Regex::new(r#"'([^']*)'\s*|\"([^\"]*)\"\s*|([^'\s]*)\s*"#).expect("Invalid Regex")
    })
}

static SAS_SIG_REGEX: OnceLock<Regex> = OnceLock::new();

/// Mask SAS signatures so blob URLs can be logged.
pub fn redact(text: &str) -> String {
    SAS_SIG_REGEX
        .get_or_init(|| Regex::new(r"sig=[^&\s]+").expect("Invalid Regex"))
        .replace_all(text, "sig=REDACTED")
        .to_string()
}

/// Runs a program with arguments and returns its stdout.
pub trait CommandRunner {
    fn run_args(&self, program: &str, args: &[String]) -> Result<String, Box<dyn Error>>;

    /// Run a whole command line, split on spaces with quotes preserved.
    fn run(&self, cmd: &str) -> Result<String, Box<dyn Error>> {
        let mut parts = split_and_strip(cmd).into_iter().map(str::to_string);
        let program = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("Empty command: '{cmd}'"))?;
        let args: Vec<String> = parts.collect();
        self.run_args(&program, &args)
    }
}

/// Runs commands on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run_args(&self, program: &str, args: &[String]) -> Result<String, Box<dyn Error>> {
        let display = redact(&format!("{program} {}", args.join(" ")));
        log::debug!("run({cmd})", cmd = display.on_blue());

        let output = Command::new(program).args(args).output().map_err(|e| {
            log::error!("Command execution failed: {}", e);
            format!("Failed to execute {program}: {e}")
        })?;

        if output.status.success() {
            log::debug!("Success output.stdout.len(): {}", output.stdout.len());
            if output.stdout.len() > config::MAX_CMD_OUTPUT {
                return Err(format!(
                    "Response too large: {} bytes for command: {display}",
                    output.stdout.len()
                )
                .into());
            }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::trace!(
                "code={code:?}, status={status}\n┎######\nstderr=\n{stderr}\n┖######",
                code = output.status.code(),
                status = output.status,
                stderr = stderr.red()
            );
            log::warn!(
                "{failed} to run {cmd}",
                failed = "failed".on_red(),
                cmd = display.on_blue()
            );
            return Err(format!("ERROR running {program}: {}", redact(stderr.trim())).into());
        }

        let stdout =
            String::from_utf8(output.stdout).map_err(|e| format!("Invalid UTF-8: {}", e))?;
        Ok(stdout)
    }
}

/// Run a command and deserialize its JSON stdout.
///
/// Parse errors name the JSON path that failed.
pub fn run_json<T, R>(runner: &R, program: &str, args: &[String]) -> Result<T, Box<dyn Error>>
where
    T: DeserializeOwned,
    R: CommandRunner + ?Sized,
{
    let output = runner.run_args(program, args)?;
    parse_json(&output)
}

/// Deserialize with path reporting.
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, Box<dyn Error>> {
    let mut deserializer = serde_json::Deserializer::from_str(output);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        log::trace!("OUTPUT START:\n\n{}\n\nOUTPUT END\n", output);
        format!("Error parsing JSON: path={} error={}", e.path(), e).into()
    })
}

/// Build an owned argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|s| s.as_ref().to_string()).collect()
}

/// Split a command string on spaces, preserving quoted substrings.
fn split_and_strip(input: &str) -> Vec<&str> {
    get_command_regex()
        .find_iter(input)
        .map(|m| m.as_str().trim().trim_matches('\'').trim_matches('"'))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    #[test]
    fn test_split_and_strip_complex() {
        let input = "Hello 'World War'  'fail' Rust";
        let expected = vec!["Hello", "World War", "fail", "Rust"];
        assert_eq!(split_and_strip(input), expected);
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("azcopy copy a https://x.blob.core.windows.net/c/a.7z?sv=1&sig=abc%2B== b"),
            "azcopy copy a https://x.blob.core.windows.net/c/a.7z?sv=1&sig=REDACTED b"
        );
    }

    #[test]
    fn test_split_and_strip_nospaces() {
        assert_eq!(split_and_strip("NoSpacesHere"), vec!["NoSpacesHere"]);
    }

    #[test]
    fn test_quoted_query() {
        let input = "az graph query -q \"resources | where name == 'x'\" --output json";
        let expected = vec![
            "az",
            "graph",
            "query",
            "-q",
            "resources | where name == 'x'",
            "--output",
            "json",
        ];
        assert_eq!(split_and_strip(input), expected);
    }

    #[test]
    fn test_run_splits_into_program_and_args() {
        let runner = FakeRunner::new().queue(Ok("[1,2,3]"));
        let out = runner.run("az account list -o 'json'").unwrap();
        assert_eq!(out, "[1,2,3]");
        assert_eq!(runner.calls.borrow()[0], "az account list -o json");
    }

    #[test]
    fn test_run_json_reports_path() {
        let runner = FakeRunner::new().queue(Ok(r#"[{"a":1},{"a":"x"}]"#));
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Row {
            a: u32,
        }
        let err = run_json::<Vec<Row>, _>(&runner, "az", &[]).unwrap_err();
        assert!(err.to_string().contains("[1].a"), "got {err}");
    }

    #[test]
    fn test_system_runner_failure() {
        let err = SystemRunner
            .run_args("azops-no-such-binary", &args(["--version"]))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to execute"));
    }
}
