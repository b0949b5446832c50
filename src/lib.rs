//! Speaker diarization as a job service.
//!
//! Uploads are validated, queued onto a bounded worker pool and diarized by an
//! external engine. Clients poll for the job and fetch the speaker count or a
//! CSV of `(start_seg, end_seg, label)` intervals once it is done.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod models;
pub mod processor;
pub mod publish;
pub mod recovery;
pub mod segments;
pub mod store;
pub mod validate;
pub mod web;

pub use models::{DataDir, Job, JobId, State};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
