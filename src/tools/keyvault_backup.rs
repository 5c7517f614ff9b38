//! Key vault backup to local disk.
//!
//! Secrets, keys and certificates are written with `az keyvault <kind> backup`
//! into `<root>/<vault>/<YYYY-MM-DD>/`. Backups are opaque blobs that can only
//! be restored into a vault in the same geography and subscription.

use super::workflow::{Outcome, WorkflowReport};
use crate::azure::{self, args, CommandRunner};
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Secret,
    Key,
    Certificate,
}

impl ItemKind {
    pub const ALL: [ItemKind; 3] = [ItemKind::Secret, ItemKind::Key, ItemKind::Certificate];

    fn cli_noun(&self) -> &'static str {
        match self {
            ItemKind::Secret => "secret",
            ItemKind::Key => "key",
            ItemKind::Certificate => "certificate",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cli_noun())
    }
}

/// Listing entry, shared by the three `list` commands.
#[derive(Deserialize, Debug, Clone)]
pub struct VaultItem {
    #[serde(default)]
    pub name: Option<String>,
    /// Item id, `https://<vault>.vault.azure.net/<kind>s/<name>`.
    #[serde(alias = "kid")]
    pub id: String,
    /// Set for secrets and keys that back a certificate.
    #[serde(default)]
    pub managed: Option<bool>,
}

impl VaultItem {
    pub fn item_name(&self) -> &str {
        match &self.name {
            Some(n) => n,
            None => self.id.trim_end_matches('/').rsplit('/').next().unwrap_or(&self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub vaults: Vec<String>,
    pub root: PathBuf,
    /// Date directory name, `YYYY-MM-DD`.
    pub date: String,
    /// Dated directories older than this many days are removed.
    pub retain_days: Option<i64>,
}

/// Backup file for one item.
pub fn backup_path(root: &Path, vault: &str, date: &str, kind: ItemKind, name: &str) -> PathBuf {
    root.join(vault).join(date).join(format!("{kind}-{name}.backup"))
}

pub fn list_items<R: CommandRunner + ?Sized>(
    runner: &R,
    vault: &str,
    kind: ItemKind,
) -> Result<Vec<VaultItem>, Box<dyn Error>> {
    azure::run_json(
        runner,
        "az",
        &args([
            "keyvault",
            kind.cli_noun(),
            "list",
            "--vault-name",
            vault,
            "--output",
            "json",
        ]),
    )
}

/// Back up every vault. Listing failures fail the whole kind for that vault.
///
/// Old backups of a vault are only pruned after a run without failures for
/// that vault.
pub fn backup_vaults<R: CommandRunner + ?Sized>(
    runner: &R,
    opts: &BackupOptions,
) -> WorkflowReport {
    let mut report = WorkflowReport::new("keyvault-backup");
    for vault in &opts.vaults {
        log::info!("#Start backup of vault {vault}");
        let failed_before = report.failed().len();
        let dir = opts.root.join(vault).join(&opts.date);
        if let Err(e) = fs::create_dir_all(&dir) {
            report.push(vault.clone(), Outcome::failed(format!("create {}: {e}", dir.display())));
            continue;
        }
        for kind in ItemKind::ALL {
            let items = match list_items(runner, vault, kind) {
                Ok(items) => items,
                Err(e) => {
                    report.push(format!("{vault}/{kind}s"), Outcome::failed(e));
                    continue;
                }
            };
            log::info!("{vault}: {} {kind}(s)", items.len());
            for item in items {
                let label = format!("{vault}/{kind}/{}", item.item_name());
                let outcome = backup_item(runner, opts, vault, kind, &item);
                report.push(label, outcome);
            }
        }
        if opts.retain_days.is_some() && report.failed().len() > failed_before {
            log::warn!("{vault}: backup incomplete, keeping old backups");
            report.push(
                format!("{vault}/retention"),
                Outcome::Skipped("backup incomplete".to_string()),
            );
        } else if let Some(days) = opts.retain_days {
            match prune_old_backups(&opts.root.join(vault), &opts.date, days) {
                Ok(removed) if !removed.is_empty() => {
                    log::info!("{vault}: removed {} old backup dir(s)", removed.len())
                }
                Ok(_) => {}
                Err(e) => report.push(format!("{vault}/retention"), Outcome::failed(e)),
            }
        }
    }
    report
}

fn backup_item<R: CommandRunner + ?Sized>(
    runner: &R,
    opts: &BackupOptions,
    vault: &str,
    kind: ItemKind,
    item: &VaultItem,
) -> Outcome {
    let name = item.item_name();
    if item.managed == Some(true) {
        return Outcome::Skipped("managed by a certificate".to_string());
    }
    let path = backup_path(&opts.root, vault, &opts.date, kind, name);
    if path.exists() {
        return Outcome::Skipped(format!("{} already exists", path.display()));
    }
    let path_str = path.display().to_string();
    match runner.run_args(
        "az",
        &args([
            "keyvault",
            kind.cli_noun(),
            "backup",
            "--vault-name",
            vault,
            "--name",
            name,
            "--file",
            path_str.as_str(),
        ]),
    ) {
        Ok(_) => Outcome::Succeeded(path_str),
        Err(e) => {
            // az can leave a zero length file behind
            let _ = fs::remove_file(&path);
            Outcome::failed(e)
        }
    }
}

/// Remove `YYYY-MM-DD` directories more than `retain_days` before `today`.
///
/// Other directory names are left alone.
pub fn prune_old_backups(
    vault_dir: &Path,
    today: &str,
    retain_days: i64,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let today = chrono::NaiveDate::parse_from_str(today, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{today}': {e}"))?;
    let cutoff = today - chrono::Duration::days(retain_days);
    let mut removed = Vec::new();
    for entry in fs::read_dir(vault_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Ok(date) = chrono::NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            log::info!("Removing expired backup {}", entry.path().display());
            fs::remove_dir_all(entry.path())?;
            removed.push(entry.path());
        }
    }
    removed.sort();
    Ok(removed)
}
