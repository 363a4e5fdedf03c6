use giftwheel_types::{RoundId, RoundStatus};
use thiserror::Error as ThisError;

use crate::{admission::AdmissionError, store::StakeError};

/// Errors surfaced by [`crate::Engine`] operations.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("round {round_id} is {status}")]
    InvalidRoundState {
        round_id: RoundId,
        status: RoundStatus,
    },
    #[error("round {round_id} has {participants} participant(s)")]
    NotEnoughParticipants {
        round_id: RoundId,
        participants: usize,
    },
    #[error("round {0} not found")]
    RoundNotFound(RoundId),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl Error {
    /// Stable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Admission(err) => err.code(),
            Error::InvalidRoundState { .. } => "INVALID_ROUND_STATE",
            Error::NotEnoughParticipants { .. } => "NOT_ENOUGH_PARTICIPANTS",
            Error::RoundNotFound(_) => "ROUND_NOT_FOUND",
            Error::Store(_) => "INTERNAL",
        }
    }
}

impl From<StakeError> for Error {
    fn from(err: StakeError) -> Self {
        match err {
            StakeError::Rejected(err) => Error::Admission(err),
            StakeError::Store(err) => Error::Store(err),
        }
    }
}
