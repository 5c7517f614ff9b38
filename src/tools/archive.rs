//! Archive directories to blob storage.
//!
//! Each source directory is compressed, integrity-checked, uploaded with the
//! cloud copy tool and confirmed against the blob service before the local
//! archive (and optionally the source) is removed. A failure only stops the
//! directory it belongs to.

use super::workflow::{Outcome, WorkflowReport};
use crate::azure::{args, AccessTier, BlobStore, CommandRunner};
use crate::config::Settings;
use crate::error::{Stage, StageContext, StageError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub sources: Vec<PathBuf>,
    /// Where archives are built before upload.
    pub staging_dir: PathBuf,
    /// Blob name prefix, e.g. `projects/2026`.
    pub blob_prefix: String,
    pub tier: AccessTier,
    /// 7-Zip `-mx` level, 0-9.
    pub compression_level: u8,
    pub remove_source: bool,
    pub dry_run: bool,
}

/// Archive every source directory and report per path.
pub async fn archive_directories<R, B>(
    runner: &R,
    blobs: &B,
    settings: &Settings,
    opts: &ArchiveOptions,
) -> WorkflowReport
where
    R: CommandRunner + ?Sized,
    B: BlobStore,
{
    let mut report = WorkflowReport::new("archive");
    log::info!(
        "#Start archive of {} source(s) to prefix '{}' tier={}",
        opts.sources.len(),
        opts.blob_prefix,
        opts.tier
    );

    let stamp = chrono::Utc::now()
        .with_timezone(&settings.time_zone)
        .format("%Y%m%d-%H%M%S")
        .to_string();

    // Sources sharing a directory name would share a blob name.
    let mut first_by_name: HashMap<String, &Path> = HashMap::new();
    for source in &opts.sources {
        if let Some(name) = source.file_name().map(|n| n.to_string_lossy().to_string()) {
            if let Some(first) = first_by_name.get(&name) {
                let outcome: Outcome = StageError::failed(
                    Stage::Source,
                    format!("archive name '{name}' is already used by {}", first.display()),
                )
                .into();
                report.push(source.display().to_string(), outcome);
                continue;
            }
            first_by_name.insert(name, source);
        }
        let outcome = match archive_one(runner, blobs, settings, opts, source, &stamp).await {
            Ok(outcome) => outcome,
            Err(e) => e.into(),
        };
        report.push(source.display().to_string(), outcome);
    }
    report
}

/// Remove a staged archive, a missing file is fine.
fn remove_staged(archive_path: &Path) -> Result<(), StageError> {
    match fs::remove_file(archive_path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            Err(StageError::io(Stage::Cleanup, e))
        }
        _ => Ok(()),
    }
}

/// Blob name for an archive: `<prefix>/<dir name>/<archive file>`.
pub fn blob_name_for(prefix: &str, dir_name: &str, archive_file: &str) -> String {
    [prefix.trim_matches('/'), dir_name, archive_file]
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<&str>>()
        .join("/")
}

async fn archive_one<R, B>(
    runner: &R,
    blobs: &B,
    settings: &Settings,
    opts: &ArchiveOptions,
    source: &Path,
    stamp: &str,
) -> Result<Outcome, StageError>
where
    R: CommandRunner + ?Sized,
    B: BlobStore,
{
    if !source.is_dir() {
        return Err(StageError::failed(
            Stage::Source,
            format!("{} is not a directory", source.display()),
        ));
    }
    let dir_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| StageError::failed(Stage::Source, "source has no directory name"))?;

    let archive_file = format!("{dir_name}_{stamp}.7z");
    let archive_path = opts.staging_dir.join(&archive_file);
    let blob_name = blob_name_for(&opts.blob_prefix, &dir_name, &archive_file);

    if opts.dry_run {
        return Ok(Outcome::DryRun(format!(
            "would archive to {} as {blob_name}",
            archive_path.display()
        )));
    }

    fs::create_dir_all(&opts.staging_dir).stage(Stage::Compress)?;
    let compressed = runner
        .run_args(
            &settings.seven_zip,
            &args([
                "a".to_string(),
                "-t7z".to_string(),
                format!("-mx={}", opts.compression_level.min(9)),
                "-y".to_string(),
                archive_path.display().to_string(),
                source.display().to_string(),
            ]),
        )
        .stage(Stage::Compress);

    let uploaded = match compressed {
        Ok(_) => {
            verify_upload_confirm(runner, blobs, settings, opts, &archive_path, &blob_name).await
        }
        Err(e) => Err(e),
    };

    // The local archive goes whether or not the upload worked.
    let cleanup = remove_staged(&archive_path);

    let bytes = match (uploaded, cleanup) {
        (Ok(bytes), Ok(())) => bytes,
        (Ok(_), Err(e)) => return Err(e),
        (Err(e), Err(cleanup_err)) => {
            log::warn!("Also failed to remove {}: {cleanup_err}", archive_path.display());
            return Err(e);
        }
        (Err(e), Ok(())) => return Err(e),
    };

    if opts.remove_source {
        log::warn!("Removing archived source {}", source.display());
        fs::remove_dir_all(source).stage(Stage::Cleanup)?;
    }

    Ok(Outcome::Succeeded(format!("{blob_name} ({bytes} bytes)")))
}

async fn verify_upload_confirm<R, B>(
    runner: &R,
    blobs: &B,
    settings: &Settings,
    opts: &ArchiveOptions,
    archive_path: &Path,
    blob_name: &str,
) -> Result<u64, StageError>
where
    R: CommandRunner + ?Sized,
    B: BlobStore,
{
    runner
        .run_args(
            &settings.seven_zip,
            &args(["t".to_string(), archive_path.display().to_string()]),
        )
        .stage(Stage::Verify)?;

    let local_len = fs::metadata(archive_path).stage(Stage::Verify)?.len();

    // Only a blob this run created may be deleted below.
    if blobs.get_properties(blob_name).await.stage(Stage::Upload)?.is_some() {
        return Err(StageError::failed(Stage::Upload, format!("{blob_name} already exists")));
    }
    let url = blobs.blob_url(blob_name).stage(Stage::Upload)?;
    runner
        .run_args(
            &settings.azcopy,
            &args([
                "copy".to_string(),
                archive_path.display().to_string(),
                url,
                format!("--block-blob-tier={}", opts.tier),
                "--overwrite=false".to_string(),
            ]),
        )
        .stage(Stage::Upload)?;

    let props = blobs
        .get_properties(blob_name)
        .await
        .stage(Stage::Confirm)?
        .ok_or_else(|| {
            StageError::failed(Stage::Confirm, format!("{blob_name} not found after upload"))
        })?;
    if props.content_length != local_len {
        // an incomplete blob would block the next upload, which never overwrites
        if let Err(e) = blobs.delete(blob_name).await {
            log::warn!("Failed to delete incomplete blob {blob_name}: {e}");
        }
        return Err(StageError::failed(
            Stage::Confirm,
            format!(
                "size mismatch for {blob_name}: local {local_len} bytes, blob {} bytes",
                props.content_length
            ),
        ));
    }
    if props.access_tier != Some(opts.tier) {
        log::warn!(
            "{blob_name} landed in tier {:?}, setting {}",
            props.access_tier,
            opts.tier
        );
        blobs
            .set_tier(blob_name, opts.tier, None)
            .await
            .stage(Stage::Confirm)?;
    }
    Ok(local_len)
}
