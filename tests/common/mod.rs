//! Shared fixtures: WAV generation, scripted engines and a ready-to-use service.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use diarserve::config::CONFIG;
use diarserve::engine::{Diarization, Diarizer, EngineError, SerializedEngine, Signal};
use diarserve::processor::{Pipeline, Runner, WorkerPool};
use diarserve::web::AppState;
use diarserve::{DataDir, Job, JobId, JobStore, MemoryJobStore};

pub fn wav_spec(channels: u16, sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

pub fn wav_bytes(channels: u16, sample_rate: u32, frames: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(channels, sample_rate)).unwrap();
        for i in 0..frames * channels as u32 {
            writer.write_sample(((i % 100) as i16 - 50) * 200).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: u32) {
    std::fs::write(path, wav_bytes(channels, sample_rate, frames)).unwrap();
}

/// Returns the same labels for every job and counts calls.
pub struct ScriptedEngine {
    pub labels: Vec<i64>,
    pub speakers: u32,
    pub calls: AtomicUsize,
    /// Held by a test to keep the engine busy.
    pub gate: Arc<Mutex<()>>,
    pub fail_with: Option<String>,
}

impl ScriptedEngine {
    pub fn new(labels: Vec<i64>, speakers: u32) -> Self {
        ScriptedEngine {
            labels,
            speakers,
            calls: AtomicUsize::new(0),
            gate: Arc::new(Mutex::new(())),
            fail_with: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut engine = Self::new(vec![], 0);
        engine.fail_with = Some(message.to_owned());
        engine
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Diarizer for ScriptedEngine {
    fn diarize(&self, _signal: &Signal) -> Result<Diarization, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _open = self.gate.lock();

        if let Some(message) = &self.fail_with {
            return Err(EngineError::Failed(message.clone()));
        }

        Ok(Diarization {
            labels: self.labels.clone(),
            num_speakers: self.speakers,
        })
    }
}

pub struct Service {
    pub dir: TempDir,
    pub data_dir: DataDir,
    pub store: Arc<dyn JobStore>,
    pub engine: Arc<ScriptedEngine>,
    pub pool: WorkerPool,
}

impl Service {
    pub fn start(engine: ScriptedEngine, workers: usize, queue_capacity: usize) -> Self {
        Self::start_with_store(engine, workers, queue_capacity, |_| Arc::new(MemoryJobStore::new()))
    }

    pub fn start_with_store(
        engine: ScriptedEngine,
        workers: usize,
        queue_capacity: usize,
        store: impl FnOnce(&DataDir) -> Arc<dyn JobStore>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let data_dir = DataDir::new(dir.path());
        data_dir.create_all().unwrap();
        let store = store(&data_dir);
        let engine = Arc::new(engine);

        let runner = Runner::new(
            Pipeline::new(SerializedEngine::new(engine.clone())),
            store.clone(),
            data_dir.clone(),
        );
        let pool = WorkerPool::start(Arc::new(runner), workers, queue_capacity).unwrap();

        Service {
            dir,
            data_dir,
            store,
            engine,
            pool,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            dispatcher: self.pool.dispatcher(),
            data_dir: self.data_dir.clone(),
            requirements: CONFIG.requirements,
        }
    }

    pub fn files_in(&self, dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }
}

/// Polls the store until the job reaches a terminal state.
pub async fn wait_terminal(store: &Arc<dyn JobStore>, id: &JobId) -> Job {
    for _ in 0..500 {
        if let Some(job) = store.get(id).unwrap() {
            if job.state.is_terminal() {
                return job;
            }
        }
        actix_web::rt::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never finished");
}
