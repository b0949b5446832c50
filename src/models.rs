use std::fmt;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wraps an already sanitized identifier. Use `identity::allocate` for uploads.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Accepted,
    Running,
    Done,
    Failed,
    Rejected,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed | State::Rejected)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("[{id}] cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: State,
    pub to: State,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: State,
    pub source_path: PathBuf,
    pub result_path: Option<PathBuf>,
    pub speaker_count: Option<u32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn accepted(id: JobId, source_path: PathBuf) -> Self {
        Job {
            id,
            state: State::Accepted,
            source_path,
            result_path: None,
            speaker_count: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, to: State) -> Result<(), TransitionError> {
        let allowed = match (self.state, to) {
            (State::Accepted, State::Running) => true,
            (State::Accepted | State::Running, State::Done | State::Failed) => true,
            (State::Accepted, State::Rejected) => true,
            _ => false,
        };

        if !allowed {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.state,
                to,
            });
        }

        self.state = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }

        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.transition(State::Running)
    }

    pub fn complete(&mut self, result_path: PathBuf, speaker_count: u32) -> Result<(), TransitionError> {
        self.transition(State::Done)?;
        self.result_path = Some(result_path);
        self.speaker_count = Some(speaker_count);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(State::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(State::Rejected)?;
        self.error_message = Some(reason.into());
        Ok(())
    }
}

pub enum FileType<'a> {
    Input { extension: &'a str },
    Record,
    Result,
}

/// Where everything a job touches lives on disk.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataDir { root: root.into() }
    }

    pub fn staging(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn inputs(&self) -> PathBuf {
        self.root.join("inputs")
    }

    pub fn records(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn results(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn create_all(&self) -> io::Result<()> {
        for dir in [self.staging(), self.inputs(), self.records(), self.results()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn build_path(&self, id: &JobId, file_type: FileType) -> PathBuf {
        match file_type {
            FileType::Input { extension } => self.inputs().join(format!("{id}{extension}")),
            FileType::Record => self.records().join(format!("{id}.json")),
            FileType::Result => self.results().join(format!("{id}.csv")),
        }
    }
}
