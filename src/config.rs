use std::path::PathBuf;

use clap::{Args, ValueEnum};

/// What an uploaded file has to look like before any work is spent on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioRequirements {
    pub mime_type: &'static str,
    pub channels: u16,
    pub sample_rate: u32,
}

pub struct Config {
    pub requirements: AudioRequirements,
    /// Analysis window length in seconds.
    pub frame_len: f64,
    /// Step between successive analysis windows in seconds.
    pub hop_len: f64,
}

pub static CONFIG: Config = Config {
    requirements: AudioRequirements {
        mime_type: "audio/x-wav",
        channels: 1,
        sample_rate: 16000,
    },
    frame_len: 2.0,
    hop_len: 0.5,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// One JSON record per job on disk, survives restarts.
    File,
    /// Process-lifetime map, restart loses all job state.
    Memory,
}

#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// External diarization program. The validated WAV path is appended as its last argument.
    #[arg(long, env = "ENGINE")]
    pub engine: String,

    /// Extra arguments passed to the engine before the WAV path.
    #[arg(long, env = "ENGINE_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory holding staged uploads, inputs, job records and results.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Number of worker threads running jobs.
    #[arg(long, env = "WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Jobs allowed to wait for a worker before uploads are turned away.
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    #[arg(long, env = "STORE", value_enum, default_value_t = StoreBackend::File)]
    pub store: StoreBackend,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl ServeArgs {
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
