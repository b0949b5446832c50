use std::fmt;

use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::JobId;
use crate::publish::{MSG_INTERNAL, MSG_NOT_FOUND};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldLocation {
    Body,
    Parameters,
}

impl fmt::Display for FieldLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldLocation::Body => f.write_str("body"),
            FieldLocation::Parameters => f.write_str("parameters"),
        }
    }
}

/// Body of every response that is not a file download.
#[derive(Serialize, Debug)]
pub struct JobResponse {
    pub id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_speakers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobResponse {
    pub fn new(id: Option<&JobId>, message: impl Into<String>) -> Self {
        JobResponse {
            id: id.map(JobId::to_string),
            message: message.into(),
            num_speakers: None,
            detail: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Error in the request: there is no '{field}' field in {location}.")]
    MissingField {
        field: &'static str,
        location: FieldLocation,
    },

    #[error("Error in the request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{}", MSG_NOT_FOUND)]
    NotFound(JobId),

    #[error("The request {0} is already being processed.")]
    Conflict(JobId),

    #[error("The service is busy. Try again later.")]
    Busy(JobId),

    #[error("job store failed: {0}")]
    Store(#[from] StoreError),

    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task was cancelled")]
    Blocking(#[from] BlockingError),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    fn job_id(&self) -> Option<&JobId> {
        match self {
            ServiceError::NotFound(id) | ServiceError::Conflict(id) | ServiceError::Busy(id) => Some(id),
            _ => None,
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingField { .. } | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(_)
            | ServiceError::Io(_)
            | ServiceError::Blocking(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = if self.is_internal() {
            error!("request failed: {}", self);
            MSG_INTERNAL.to_owned()
        } else {
            self.to_string()
        };

        HttpResponse::build(self.status_code()).json(JobResponse::new(self.job_id(), message))
    }
}
