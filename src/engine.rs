//! Boundary to the speaker diarization engine.
//!
//! The engine itself lives outside this crate. Jobs only see the [`Diarizer`]
//! trait, always called through [`SerializedEngine`] because engines hold
//! session state that must not be shared between two jobs at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::command::{run_command, CommandError};

/// Mono samples in `[-1.0, 1.0]` together with the file they came from.
#[derive(Debug, Clone)]
pub struct Signal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub source: PathBuf,
}

impl Signal {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Engine output: one label per hop plus the number of speakers it settled on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Diarization {
    pub labels: Vec<i64>,
    pub num_speakers: u32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("engine output is not valid JSON: {0}")]
    Output(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

pub trait Diarizer: Send + Sync {
    fn diarize(&self, signal: &Signal) -> Result<Diarization, EngineError>;

    /// Drops whatever per-job state the engine keeps. Called after every job.
    fn release(&self) {}
}

/// Decodes the first channel of a WAV file into normalized `f32` samples.
pub fn decode_mono(path: &Path) -> Result<Signal, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Signal {
        samples,
        sample_rate: spec.sample_rate,
        source: path.to_path_buf(),
    })
}

/// Runs an external diarization program per job.
///
/// The program gets the configured arguments followed by the path of the
/// validated WAV file and must print `{"labels": [...], "num_speakers": n}`.
pub struct CommandDiarizer {
    program: String,
    arguments: Vec<String>,
}

impl CommandDiarizer {
    pub fn new(program: impl Into<String>, arguments: Vec<String>) -> Self {
        CommandDiarizer {
            program: program.into(),
            arguments,
        }
    }
}

impl Diarizer for CommandDiarizer {
    fn diarize(&self, signal: &Signal) -> Result<Diarization, EngineError> {
        let mut arguments = self.arguments.clone();
        arguments.push(signal.source.to_string_lossy().into_owned());

        let output = run_command(&self.program, &arguments, "diarization engine")?;
        let diarization: Diarization = serde_json::from_slice(&output.stdout)?;

        Ok(diarization)
    }
}

struct ReleaseOnDrop<'a>(&'a dyn Diarizer);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Lets any number of workers share one engine, one call at a time.
#[derive(Clone)]
pub struct SerializedEngine {
    inner: Arc<dyn Diarizer>,
    gate: Arc<Mutex<()>>,
}

impl SerializedEngine {
    pub fn new(inner: Arc<dyn Diarizer>) -> Self {
        SerializedEngine {
            inner,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn diarize(&self, signal: &Signal) -> Result<Diarization, EngineError> {
        let _gate = self.gate.lock();
        let _release = ReleaseOnDrop(self.inner.as_ref());

        debug!(
            "engine: {} s of audio from {}",
            signal.duration_secs(),
            signal.source.display()
        );

        let diarization = self.inner.diarize(signal)?;

        if diarization.labels.is_empty() {
            return Err(EngineError::Failed("engine returned no labels".to_owned()));
        }

        Ok(diarization)
    }
}
