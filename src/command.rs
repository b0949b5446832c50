use std::process::{Command, Output};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{descriptor} could not be started: {source}")]
    Spawn {
        descriptor: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{descriptor} failed\n\n{stderr}")]
    Failed { descriptor: String, stderr: String },

    #[error("{descriptor} failed and the output was not UTF-8")]
    NotUtf8 { descriptor: String },
}

/// Runs `executable` to completion and hands back its output when it exits
/// successfully. A non-zero exit carries stderr in the error.
pub fn run_command(executable: &str, arguments: &[String], descriptor: &str) -> Result<Output, CommandError> {
    debug!("{descriptor}: {executable} {}", arguments.join(" "));

    let output = Command::new(executable)
        .args(arguments)
        .output()
        .map_err(|source| CommandError::Spawn {
            descriptor: descriptor.to_owned(),
            source,
        })?;

    if !output.status.success() {
        return match String::from_utf8(output.stderr) {
            Ok(text) => Err(CommandError::Failed {
                descriptor: descriptor.to_owned(),
                stderr: text,
            }),
            Err(_) => Err(CommandError::NotUtf8 {
                descriptor: descriptor.to_owned(),
            }),
        };
    }

    Ok(output)
}
