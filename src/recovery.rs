use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AudioRequirements;
use crate::models::{DataDir, Job, JobId};
use crate::processor::{DispatchError, Dispatcher};
use crate::store::{JobStore, StoreError};
use crate::validate::validate;

pub const MSG_INTERRUPTED: &str = "processing was interrupted before completion";

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveryReport {
    pub resumed: Vec<JobId>,
    pub rejected: Vec<JobId>,
    pub interrupted: Vec<JobId>,
    pub skipped: Vec<JobId>,
    /// Jobs whose record or input could not be read or written. Left as found.
    pub unreadable: Vec<JobId>,
}

enum Recovered {
    Resumed,
    Rejected,
    Skipped,
}

/// Clears half-received uploads. Nothing in `staging/` was ever acknowledged.
pub fn purge_staging(data_dir: &DataDir) -> io::Result<usize> {
    let mut purged = 0;
    for entry in std::fs::read_dir(data_dir.staging())? {
        let path = entry?.path();
        if path.is_file() {
            std::fs::remove_file(&path)?;
            purged += 1;
        }
    }
    Ok(purged)
}

fn recover_input(
    id: &JobId,
    path: &Path,
    store: &Arc<dyn JobStore>,
    dispatcher: &Dispatcher,
    requirements: &AudioRequirements,
) -> Result<Recovered, RecoveryError> {
    let existing = store.get(id)?;
    if existing.as_ref().map_or(false, |job| job.state.is_terminal()) {
        warn!("[{}] recovery: input {} outlived its finished job, leaving it", id, path.display());
        return Ok(Recovered::Skipped);
    }

    if dispatcher.is_in_flight(id) {
        return Ok(Recovered::Skipped);
    }

    let mut job = Job::accepted(id.clone(), path.to_path_buf());
    if let Some(existing) = existing {
        job.created_at = existing.created_at;
    }

    match validate(path, requirements) {
        Ok(_) => {
            store.put(&job)?;
            dispatcher.dispatch(job)?;
            info!("[{}] recovery: requeued", id);
            Ok(Recovered::Resumed)
        }
        Err(rejection) => {
            info!("[{}] recovery: rejected, {}", id, rejection);
            if let Err(err) = job.reject(rejection.to_string()) {
                warn!("[{}] recovery: {}", id, err);
            }
            std::fs::remove_file(path)?;
            store.put(&job)?;
            Ok(Recovered::Rejected)
        }
    }
}

/// Brings every job left behind by a previous process to a state a client can
/// observe: surviving inputs are checked again and requeued, inputs that no
/// longer pass are rejected, and live records without an input are failed.
///
/// A requeued job starts over as ACCEPTED, whatever live state its old record
/// held, since the run that record describes died with the previous process.
///
/// Errors touching a single job are logged and reported as `unreadable`. Only
/// failing to read the data directories or a closed queue stops the scan.
pub fn recover_all(
    data_dir: &DataDir,
    store: &Arc<dyn JobStore>,
    dispatcher: &Dispatcher,
    requirements: &AudioRequirements,
) -> Result<RecoveryReport, RecoveryError> {
    let mut report = RecoveryReport::default();
    let mut seen = HashSet::new();

    let purged = purge_staging(data_dir)?;
    if purged > 0 {
        info!("recovery: discarded {} unfinished uploads", purged);
    }

    let mut inputs: Vec<_> = std::fs::read_dir(data_dir.inputs())?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    inputs.sort();

    for path in inputs {
        let Some(stem) = path.file_stem() else {
            continue;
        };
        let id = JobId::new(stem.to_string_lossy());
        seen.insert(id.clone());

        match recover_input(&id, &path, store, dispatcher, requirements) {
            Ok(Recovered::Resumed) => report.resumed.push(id),
            Ok(Recovered::Rejected) => report.rejected.push(id),
            Ok(Recovered::Skipped) => report.skipped.push(id),
            Err(err @ RecoveryError::Dispatch(DispatchError::Closed(_))) => return Err(err),
            Err(err) => {
                error!("[{}] recovery: {}, leaving it as found", id, err);
                report.unreadable.push(id);
            }
        }
    }

    for mut job in store.list()? {
        if job.state.is_terminal() || seen.contains(&job.id) || dispatcher.is_in_flight(&job.id) {
            continue;
        }

        warn!("[{}] recovery: input is gone, marking failed", job.id);
        if job.fail(MSG_INTERRUPTED).is_err() {
            continue;
        }
        match store.put(&job) {
            Ok(()) => report.interrupted.push(job.id),
            Err(err) => {
                error!("[{}] recovery: {}", job.id, err);
                report.unreadable.push(job.id);
            }
        }
    }

    info!(
        "recovery: {} resumed, {} rejected, {} interrupted",
        report.resumed.len(),
        report.rejected.len(),
        report.interrupted.len()
    );
    if !report.unreadable.is_empty() {
        warn!("recovery: {} jobs need attention", report.unreadable.len());
    }

    Ok(report)
}
