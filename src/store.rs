use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::models::{DataDir, FileType, Job, JobId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job record I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("job record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Job records keyed by id. Writers are partitioned by id, so implementations
/// only need per-record consistency.
pub trait JobStore: Send + Sync {
    fn put(&self, job: &Job) -> Result<(), StoreError>;
    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError>;
    fn list(&self) -> Result<Vec<Job>, StoreError>;
}

/// One JSON file per job. Survives restarts.
pub struct FileJobStore {
    data_dir: DataDir,
}

impl FileJobStore {
    pub fn open(data_dir: DataDir) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir.records())?;
        Ok(FileJobStore { data_dir })
    }

    fn path(&self, id: &JobId) -> PathBuf {
        self.data_dir.build_path(id, FileType::Record)
    }
}

impl JobStore for FileJobStore {
    fn put(&self, job: &Job) -> Result<(), StoreError> {
        let mut file = tempfile::Builder::new()
            .prefix(".record")
            .suffix(".tmp")
            .tempfile_in(self.data_dir.records())?;

        serde_json::to_writer(file.as_file_mut(), job)?;
        file.as_file_mut().flush()?;
        file.as_file().sync_all()?;
        file.persist(self.path(&job.id)).map_err(|err| err.error)?;

        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        match std::fs::read(self.path(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = vec![];

        for entry in std::fs::read_dir(self.data_dir.records())? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let parsed = std::fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| serde_json::from_slice::<Job>(&bytes).map_err(StoreError::from));

            match parsed {
                Ok(job) => jobs.push(job),
                Err(err) => warn!("skipping job record {}: {}", path.display(), err),
            }
        }

        Ok(jobs)
    }
}

/// Process-lifetime records. A restart forgets every job, finished or not.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn put(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.lock().insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.lock().values().cloned().collect())
    }
}
