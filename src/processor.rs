use std::any::Any;
use std::collections::HashSet;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CONFIG;
use crate::engine::{decode_mono, EngineError, SerializedEngine};
use crate::models::{DataDir, FileType, Job, JobId};
use crate::segments::{compact, write_csv, Segment};
use crate::store::JobStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decoding failed: {0}")]
    Decode(#[from] hound::Error),

    #[error("diarization failed: {0}")]
    Engine(#[from] EngineError),

    #[error("writing the result failed: {0}")]
    Io(#[from] io::Error),

    #[error("diarization panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub segments: Vec<Segment>,
    pub speaker_count: u32,
}

/// Decode, diarize, compact, write. Shared by the workers and the one-shot CLI.
#[derive(Clone)]
pub struct Pipeline {
    engine: SerializedEngine,
    hop_len: f64,
    frame_len: f64,
}

impl Pipeline {
    pub fn new(engine: SerializedEngine) -> Self {
        Pipeline {
            engine,
            hop_len: CONFIG.hop_len,
            frame_len: CONFIG.frame_len,
        }
    }

    pub fn analyze(&self, source: &Path, result_path: &Path) -> Result<Analysis, PipelineError> {
        debug!("preprocessing {}", source.display());
        let signal = decode_mono(source)?;
        debug!("decoded {} s", signal.duration_secs());

        let diarization = self.engine.diarize(&signal)?;
        debug!("engine found {} speakers", diarization.num_speakers);

        let segments = compact(&diarization.labels, self.hop_len, self.frame_len);
        write_csv(result_path, &segments)?;
        debug!("saved {}", result_path.display());

        Ok(Analysis {
            segments,
            speaker_count: diarization.num_speakers,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Owns a job from dispatch until its terminal record is written.
pub struct Runner {
    pipeline: Pipeline,
    store: Arc<dyn JobStore>,
    data_dir: DataDir,
}

impl Runner {
    pub fn new(pipeline: Pipeline, store: Arc<dyn JobStore>, data_dir: DataDir) -> Self {
        Runner {
            pipeline,
            store,
            data_dir,
        }
    }

    pub fn run(&self, mut job: Job) -> Job {
        let id = job.id.clone();

        if let Err(err) = job.mark_running() {
            warn!("[{}] runner: {}, ignoring", id, err);
            return job;
        }

        if let Err(err) = self.store.put(&job) {
            warn!("[{}] runner: could not record running state: {}", id, err);
        }

        info!("[{}] runner: starting diarization", id);

        let result_path = self.data_dir.build_path(&id, FileType::Result);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.analyze(&job.source_path, &result_path)
        }))
        .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(payload.as_ref()))));

        let transition = match outcome {
            Ok(analysis) => {
                info!(
                    "[{}] runner: complete, {} speakers in {} segments",
                    id,
                    analysis.speaker_count,
                    analysis.segments.len()
                );
                job.complete(result_path, analysis.speaker_count)
            }
            Err(err) => {
                error!("[{}] runner: ended with error: {}", id, err);
                job.fail(err.to_string())
            }
        };

        if let Err(err) = transition {
            error!("[{}] runner: {}", id, err);
        }

        if let Err(err) = std::fs::remove_file(&job.source_path) {
            warn!("[{}] runner: could not remove {}: {}", id, job.source_path.display(), err);
        }

        if let Err(err) = self.store.put(&job) {
            error!("[{}] runner: could not record final state: {}", id, err);
        }

        job
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("[{0}] is already being processed")]
    AlreadyRunning(JobId),

    #[error("[{0}] job queue is full")]
    Busy(JobId),

    #[error("[{0}] job queue is closed")]
    Closed(JobId),
}

type InFlight = Arc<Mutex<HashSet<JobId>>>;

/// Marks a job id as live until dropped.
struct Claim {
    id: JobId,
    in_flight: InFlight,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.id);
    }
}

struct Ticket {
    job: Job,
    claim: Claim,
}

/// Cheap handle for queueing jobs onto a [`WorkerPool`].
#[derive(Clone)]
pub struct Dispatcher {
    sender: Sender<Ticket>,
    in_flight: InFlight,
}

impl Dispatcher {
    fn claim(&self, id: &JobId) -> Result<Claim, DispatchError> {
        if !self.in_flight.lock().insert(id.clone()) {
            return Err(DispatchError::AlreadyRunning(id.clone()));
        }

        Ok(Claim {
            id: id.clone(),
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_in_flight(&self, id: &JobId) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Queues without waiting. A full queue is reported as `Busy`.
    pub fn try_dispatch(&self, job: Job) -> Result<(), DispatchError> {
        let claim = self.claim(&job.id)?;

        match self.sender.try_send(Ticket { job, claim }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(ticket)) => Err(DispatchError::Busy(ticket.job.id)),
            Err(TrySendError::Disconnected(ticket)) => Err(DispatchError::Closed(ticket.job.id)),
        }
    }

    /// Queues, waiting for room if the queue is full.
    pub fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        let claim = self.claim(&job.id)?;

        self.sender
            .send(Ticket { job, claim })
            .map_err(|err| DispatchError::Closed(err.into_inner().job.id))
    }
}

/// Fixed set of worker threads fed by a bounded queue.
pub struct WorkerPool {
    dispatcher: Dispatcher,
    workers: Vec<JoinHandle<()>>,
}

fn worker(index: usize, rx: Receiver<Ticket>, runner: Arc<Runner>) {
    info!("worker {}: started", index);

    for ticket in rx.iter() {
        let Ticket { job, claim } = ticket;
        runner.run(job);
        drop(claim);
    }

    info!("worker {}: shutdown", index);
}

impl WorkerPool {
    pub fn start(runner: Arc<Runner>, workers: usize, queue_capacity: usize) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(queue_capacity.max(1));

        let workers = (0..workers.max(1))
            .map(|index| {
                let rx = receiver.clone();
                let runner = runner.clone();
                thread::Builder::new()
                    .name(format!("job-worker-{index}"))
                    .spawn(move || worker(index, rx, runner))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(WorkerPool {
            dispatcher: Dispatcher {
                sender,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            },
            workers,
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Runs everything still queued, then joins the workers. Returns once every
    /// `Dispatcher` handed out has been dropped as well.
    pub fn shutdown(self) {
        drop(self.dispatcher);

        for handle in self.workers {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}
