use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::teller::{LaunchError, Phase};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    TellerLaunch(#[from] LaunchError),
    #[error("Invalid request: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("Election {0} already exists")]
    AlreadyExists(String),
    #[error("Election {0} does not exist")]
    ElectionNotExist(String),
    #[error("Election {election} has {registered} of {expected} voters registered")]
    IncompleteRegistration {
        election: String,
        registered: u64,
        expected: u32,
    },
    #[error("Election {election} has {registered} voters registered but expects {expected}")]
    TooManyRegistrations {
        election: String,
        registered: u64,
        expected: u32,
    },
    #[error("{phase} is still running for election {election}")]
    PhaseInProgress { election: String, phase: Phase },
    #[error("No voter with that device in election {0}")]
    NoSuchVoter(String),
    #[error("No such voter in election {0}")]
    VoterNotExist(String),
    #[error("Election {0} has not started")]
    ElectionNotStarted(String),
    #[error("Election {0} has not ended")]
    ElectionNotEnded(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The symbolic code reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "DATABASE",
            Self::Artifact(_) => "ARTIFACT_IO",
            Self::TellerLaunch(_) => "TELLER_LAUNCH",
            Self::Validation(_) => "VALIDATION",
            Self::AlreadyExists(_) => "ELECTION_EXISTS",
            Self::ElectionNotExist(_) => "ELECTION_NOT_EXIST",
            Self::IncompleteRegistration { .. } => "INCOMPLETE_REGISTRATION",
            Self::TooManyRegistrations { .. } => "TOO_MANY_REGISTRATIONS",
            Self::PhaseInProgress { .. } => "PHASE_IN_PROGRESS",
            Self::NoSuchVoter(_) => "NO_SUCH_VOTER",
            Self::VoterNotExist(_) => "VOTER_NOT_EXIST",
            Self::ElectionNotStarted(_) => "ELECTION_NOT_STARTED",
            Self::ElectionNotEnded(_) => "ELECTION_NOT_ENDED",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::Artifact(_) | Self::TellerLaunch(_) => Status::InternalServerError,
            Self::PhaseInProgress { .. } => Status::Conflict,
            Self::NotFound(_) => Status::NotFound,
            _ => Status::BadRequest,
        }
    }
}

/// The JSON body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            errors: match self {
                Self::Validation(errors) => errors,
                _ => Vec::new(),
            },
        };
        (status, Json(body)).respond_to(req)
    }
}
