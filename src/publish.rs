use std::path::PathBuf;

use crate::models::{Job, State};

pub const MSG_OK: &str = "OK";
pub const MSG_PENDING: &str = "The request was accepted for processing, but it was not completed.";
pub const MSG_NOT_FOUND: &str = "The specified request ID was not found.";
pub const MSG_INTERNAL: &str =
    "An unexpected error occurred while processing the file. You can try again or make another request.";

/// What a client polling for a job gets to see.
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    NotFound,
    Pending(State),
    SpeakerCount(u32),
    Artifact(PathBuf),
    Failed(Option<String>),
    Rejected(String),
}

/// Reads only: a job is reported as done once its record says so, and the
/// runner writes that record after the result file is in place.
pub fn publish(job: Option<&Job>, want_speaker_count: bool) -> Publication {
    let Some(job) = job else {
        return Publication::NotFound;
    };

    match job.state {
        State::Accepted | State::Running => Publication::Pending(job.state),
        State::Done => match (want_speaker_count, job.speaker_count, &job.result_path) {
            (true, Some(count), _) => Publication::SpeakerCount(count),
            (false, _, Some(path)) => Publication::Artifact(path.clone()),
            _ => Publication::Failed(Some("finished job is missing its result".to_owned())),
        },
        State::Failed => Publication::Failed(job.error_message.clone()),
        State::Rejected => Publication::Rejected(
            job.error_message
                .clone()
                .unwrap_or_else(|| "The file was rejected.".to_owned()),
        ),
    }
}
