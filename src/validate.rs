use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::AudioRequirements;

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct AudioInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub duration_secs: f64,
}

/// Why an upload was turned away. The display text is what the client sees.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Rejection {
    #[error("The file format is not WAVE audio")]
    WrongFormat { found: Option<String> },

    #[error("The file contains more than one channel (i.e. {0}).")]
    TooManyChannels(u16),

    #[error("The file sampling rate is {:?} kHz: should be {:?} kHz", khz(.found), khz(.expected))]
    WrongSampleRate { found: u32, expected: u32 },

    #[error("The file could not be read as audio: {0}")]
    Unreadable(String),
}

fn khz(rate: &u32) -> f64 {
    *rate as f64 / 1000.0
}

/// The `(accepted, reason)` pair handed to clients and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: String,
}

impl<T> From<&Result<T, Rejection>> for Verdict {
    fn from(result: &Result<T, Rejection>) -> Self {
        match result {
            Ok(_) => Verdict {
                accepted: true,
                reason: "OK".to_owned(),
            },
            Err(rejection) => Verdict {
                accepted: false,
                reason: rejection.to_string(),
            },
        }
    }
}

/// Checks container type, channel count and sample rate, in that order. Only
/// reads the file.
pub fn validate(path: &Path, requirements: &AudioRequirements) -> Result<AudioInfo, Rejection> {
    let kind = infer::get_from_path(path).map_err(|err| Rejection::Unreadable(err.to_string()))?;
    let mime_type = kind.map(|kind| kind.mime_type());

    debug!("{}: sniffed {:?}", path.display(), mime_type);

    if mime_type != Some(requirements.mime_type) {
        return Err(Rejection::WrongFormat {
            found: mime_type.map(str::to_owned),
        });
    }

    let reader = hound::WavReader::open(path).map_err(|err| Rejection::Unreadable(err.to_string()))?;
    let spec = reader.spec();

    if spec.channels != requirements.channels {
        return Err(Rejection::TooManyChannels(spec.channels));
    }

    if spec.sample_rate != requirements.sample_rate {
        return Err(Rejection::WrongSampleRate {
            found: spec.sample_rate,
            expected: requirements.sample_rate,
        });
    }

    Ok(AudioInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        duration_secs: reader.duration() as f64 / spec.sample_rate as f64,
    })
}
