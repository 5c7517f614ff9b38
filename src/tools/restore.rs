//! Restore archives from blob storage, rehydrating from the Archive tier.
//!
//! Blobs already online are downloaded straight away. Archived blobs get a
//! tier change request and are polled in rounds until readable or until the
//! maximum wait runs out.

use super::workflow::{Outcome, WorkflowReport};
use crate::azure::{args, AccessTier, BlobStore, CommandRunner, RehydratePriority};
use crate::config::Settings;
use crate::error::{Stage, StageContext, StageError};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub blobs: Vec<String>,
    /// Each archive is extracted into `<destination>/<archive stem>`, see
    /// [`extract_dirs`].
    pub destination: PathBuf,
    pub staging_dir: PathBuf,
    /// Tier to rehydrate into.
    pub target_tier: AccessTier,
    pub priority: RehydratePriority,
    /// Move the blob back to Archive after a successful restore.
    pub rearchive: bool,
    pub dry_run: bool,
}

/// State of a blob between the phases.
enum Phase {
    Ready,
    Pending,
    Done(Outcome),
}

/// Restore every requested blob and report per blob.
pub async fn restore_blobs<R, B>(
    runner: &R,
    blobs: &B,
    settings: &Settings,
    opts: &RestoreOptions,
) -> WorkflowReport
where
    R: CommandRunner + ?Sized,
    B: BlobStore,
{
    log::info!("#Start restore of {} blob(s)", opts.blobs.len());
    let mut phases: Vec<Phase> = Vec::with_capacity(opts.blobs.len());
    for name in &opts.blobs {
        phases.push(match start_rehydration(blobs, opts, name).await {
            Ok(phase) => phase,
            Err(e) => Phase::Done(e.into()),
        });
    }

    wait_for_rehydration(blobs, settings, opts, &mut phases).await;

    let targets = extract_dirs(&opts.destination, &opts.blobs);
    let mut report = WorkflowReport::new("restore");
    for ((name, phase), target) in opts.blobs.iter().zip(phases).zip(targets) {
        let outcome = match phase {
            Phase::Done(outcome) => outcome,
            Phase::Ready if opts.dry_run => Outcome::DryRun(format!(
                "would download and extract into {}",
                target.display()
            )),
            Phase::Ready => match restore_one(runner, blobs, settings, opts, name, &target).await {
                Ok(outcome) => outcome,
                Err(e) => e.into(),
            },
            Phase::Pending => StageError::failed(Stage::Rehydrate, "still pending").into(),
        };
        report.push(name.clone(), outcome);
    }
    report
}

/// Extraction directory for a blob: the file name without `.7z`.
pub fn extract_dir(destination: &Path, blob_name: &str) -> PathBuf {
    let file = blob_name.rsplit('/').next().unwrap_or(blob_name);
    let stem = file.strip_suffix(".7z").unwrap_or(file);
    destination.join(stem)
}

/// Extraction directories for all blobs in order. Blobs with the same file
/// name under different prefixes get `-2`, `-3`, .. appended.
pub fn extract_dirs(destination: &Path, blob_names: &[String]) -> Vec<PathBuf> {
    let mut used = HashSet::new();
    blob_names
        .iter()
        .map(|name| {
            let base = extract_dir(destination, name);
            let mut dir = base.clone();
            let mut n = 2;
            while !used.insert(dir.clone()) {
                dir = PathBuf::from(format!("{}-{n}", base.display()));
                n += 1;
            }
            dir
        })
        .collect()
}

async fn start_rehydration<B: BlobStore>(
    blobs: &B,
    opts: &RestoreOptions,
    name: &str,
) -> Result<Phase, StageError> {
    let props = blobs
        .get_properties(name)
        .await
        .stage(Stage::Rehydrate)?
        .ok_or_else(|| StageError::failed(Stage::Rehydrate, format!("{name} not found")))?;

    if props.is_online() {
        log::info!("{name} is online ({:?})", props.access_tier);
        return Ok(Phase::Ready);
    }
    if let Some(target) = props.rehydrating_to {
        log::info!("{name} already rehydrating to {target}");
        if opts.dry_run {
            return Ok(Phase::Done(Outcome::DryRun(format!(
                "rehydration to {target} already pending"
            ))));
        }
        return Ok(Phase::Pending);
    }
    if opts.dry_run {
        return Ok(Phase::Done(Outcome::DryRun(format!(
            "would rehydrate to {} with {} priority",
            opts.target_tier, opts.priority
        ))));
    }
    blobs
        .set_tier(name, opts.target_tier, Some(opts.priority))
        .await
        .stage(Stage::Rehydrate)?;
    log::info!(
        "Requested rehydration of {name} to {} ({})",
        opts.target_tier,
        opts.priority
    );
    Ok(Phase::Pending)
}

/// Poll pending blobs in rounds until all are ready, failed or timed out.
async fn wait_for_rehydration<B: BlobStore>(
    blobs: &B,
    settings: &Settings,
    opts: &RestoreOptions,
    phases: &mut [Phase],
) {
    let started = Instant::now();
    let mut round = 0;
    loop {
        let pending: Vec<usize> = phases
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, Phase::Pending))
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }
        if round > 0 && started.elapsed() >= settings.max_rehydrate_wait {
            for i in pending {
                phases[i] = Phase::Done(
                    StageError::Timeout {
                        name: opts.blobs[i].clone(),
                        waited_secs: started.elapsed().as_secs(),
                    }
                    .into(),
                );
            }
            return;
        }

        log::info!(
            "Waiting {}s for {} blob(s) to rehydrate, round {round}",
            settings.poll_interval.as_secs(),
            pending.len()
        );
        tokio::time::sleep(settings.poll_interval).await;
        round += 1;

        for i in pending {
            let name = &opts.blobs[i];
            phases[i] = match blobs.get_properties(name).await {
                Ok(Some(p)) if p.is_online() => {
                    log::info!("{name} rehydrated after {}s", started.elapsed().as_secs());
                    Phase::Ready
                }
                Ok(Some(_)) => Phase::Pending,
                Ok(None) => Phase::Done(
                    StageError::failed(Stage::Rehydrate, format!("{name} disappeared")).into(),
                ),
                Err(e) => Phase::Done(StageError::failed(Stage::Rehydrate, e).into()),
            };
        }
    }
}

async fn restore_one<R, B>(
    runner: &R,
    blobs: &B,
    settings: &Settings,
    opts: &RestoreOptions,
    name: &str,
    target: &Path,
) -> Result<Outcome, StageError>
where
    R: CommandRunner + ?Sized,
    B: BlobStore,
{
    // named after the target so repeated file names do not share a download
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| StageError::failed(Stage::Download, format!("no file name in {name}")))?;
    let staged = opts.staging_dir.join(format!("{stem}.7z"));

    fs::create_dir_all(&opts.staging_dir).stage(Stage::Download)?;
    let url = blobs.blob_url(name).stage(Stage::Download)?;

    let result = download_verify_extract(runner, settings, &url, &staged, target);
    let cleanup = match fs::remove_file(&staged) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            Err(StageError::io(Stage::Cleanup, e))
        }
        _ => Ok(()),
    };
    result?;
    cleanup?;

    if opts.rearchive {
        blobs
            .set_tier(name, AccessTier::Archive, None)
            .await
            .stage(Stage::Cleanup)?;
    }
    Ok(Outcome::Succeeded(target.display().to_string()))
}

fn download_verify_extract<R: CommandRunner + ?Sized>(
    runner: &R,
    settings: &Settings,
    url: &str,
    staged: &Path,
    target: &Path,
) -> Result<(), StageError> {
    let staged_str = staged.display().to_string();
    runner
        .run_args(
            &settings.azcopy,
            &args(["copy", url, staged_str.as_str(), "--overwrite=true"]),
        )
        .stage(Stage::Download)?;
    runner
        .run_args(&settings.seven_zip, &args(["t", staged_str.as_str()]))
        .stage(Stage::Verify)?;
    fs::create_dir_all(target).stage(Stage::Extract)?;
    runner
        .run_args(
            &settings.seven_zip,
            &args([
                "x".to_string(),
                staged_str,
                format!("-o{}", target.display()),
                "-y".to_string(),
            ]),
        )
        .stage(Stage::Extract)?;
    Ok(())
}
