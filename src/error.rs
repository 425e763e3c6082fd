use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::{fmt::Display, io, path::PathBuf};
use thiserror::Error;

use crate::lock::LockName;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Reasons a write is refused because the week is in the wrong phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseViolation {
    UploadsClosed,
    VotingNotOpen,
    VotingClosed,
}

impl Display for PhaseViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            PhaseViolation::UploadsClosed => "uploads are closed for this week",
            PhaseViolation::VotingNotOpen => "voting has not started yet, uploads are still open",
            PhaseViolation::VotingClosed => "voting has already finished for this week",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed week path {path}: {reason}")]
    MalformedPath { path: PathBuf, reason: &'static str },
    #[error("{0} is not of the expected upload file name format")]
    MalformedFileName(String),
    #[error("invalid owner name {0:?}")]
    InvalidOwner(String),
    #[error("unsupported image type {0:?}")]
    UnsupportedImage(String),
    #[error("invalid ballot: {0}")]
    InvalidBallot(String),
    #[error("{0} not found")]
    NotFound(PathBuf),
    #[error("{0} lock already exists")]
    AlreadyLocked(LockName),
    #[error("{0} lock does not exist")]
    NotLocked(LockName),
    #[error("ballot must contain {expected} choices, got {actual}")]
    BallotSizeMismatch { expected: usize, actual: usize },
    #[error("corrupt ballot file {path} at line {line}")]
    CorruptBallotFile { path: PathBuf, line: usize },
    #[error("{0}")]
    PhaseClosed(PhaseViolation),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Wraps an I/O error, keeping "not found" distinct from other faults.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(path)
        } else {
            StoreError::Io { path, source }
        }
    }
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("invalid image path {0:?}")]
    InvalidPath(String),
    #[error("source image {path} unreadable: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    DecodeFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode preview: {0}")]
    EncodeFailed(#[source] image::ImageError),
    #[error("preview cache i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::MalformedPath { .. }
            | StoreError::MalformedFileName(_)
            | StoreError::InvalidOwner(_)
            | StoreError::UnsupportedImage(_)
            | StoreError::InvalidBallot(_) => AppError::bad_request(value.to_string()),
            StoreError::NotFound(_) => AppError::not_found(),
            StoreError::AlreadyLocked(_)
            | StoreError::NotLocked(_)
            | StoreError::BallotSizeMismatch { .. } => AppError::conflict(value.to_string()),
            StoreError::PhaseClosed(violation) => AppError::forbidden(violation.to_string()),
            StoreError::CorruptBallotFile { .. } | StoreError::Io { .. } => {
                AppError::internal(value)
            }
        }
    }
}

impl From<PreviewError> for AppError {
    fn from(value: PreviewError) -> Self {
        match value {
            PreviewError::InvalidPath(_) => AppError::bad_request(value.to_string()),
            PreviewError::SourceUnreadable { ref source, .. }
                if source.kind() == io::ErrorKind::NotFound =>
            {
                AppError::not_found()
            }
            _ => AppError::internal(value),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        AppError::internal(format!("blocking task failed: {value}"))
    }
}
