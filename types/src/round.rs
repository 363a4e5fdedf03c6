use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use super::{RoundId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Countdown,
    Spinning,
    Finished,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Waiting => "waiting",
            RoundStatus::Countdown => "countdown",
            RoundStatus::Spinning => "spinning",
            RoundStatus::Finished => "finished",
        }
    }

    /// Whether new stakes may enter a round in this status.
    pub fn accepts_stakes(&self) -> bool {
        matches!(self, RoundStatus::Waiting | RoundStatus::Countdown)
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, RoundStatus::Finished)
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
#[error("unknown round status: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for RoundStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(RoundStatus::Waiting),
            "countdown" => Ok(RoundStatus::Countdown),
            "spinning" => Ok(RoundStatus::Spinning),
            "finished" => Ok(RoundStatus::Finished),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted round record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: RoundId,
    pub status: RoundStatus,
    pub created_at_ms: u64,
    /// Set on waiting -> countdown.
    pub started_at_ms: Option<u64>,
    /// Set on countdown -> spinning.
    pub spinning_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    pub winner_id: Option<UserId>,
    /// Value in [0, 100) that selected the winner.
    pub draw_value: Option<f64>,
}

impl Round {
    pub fn new(id: RoundId, created_at_ms: u64) -> Self {
        Self {
            id,
            status: RoundStatus::Waiting,
            created_at_ms,
            started_at_ms: None,
            spinning_at_ms: None,
            finished_at_ms: None,
            winner_id: None,
            draw_value: None,
        }
    }
}

/// Extra fields written alongside a conditional status change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub started_at_ms: Option<u64>,
    pub spinning_at_ms: Option<u64>,
    /// Only apply while the round still has at least this many distinct stakers.
    pub min_participants: Option<usize>,
}

impl Transition {
    pub fn started_at(now_ms: u64) -> Self {
        Self {
            started_at_ms: Some(now_ms),
            ..Self::default()
        }
    }

    pub fn spinning_at(now_ms: u64) -> Self {
        Self {
            spinning_at_ms: Some(now_ms),
            ..Self::default()
        }
    }

    pub fn with_min_participants(self, min_participants: usize) -> Self {
        Self {
            min_participants: Some(min_participants),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RoundStatus::Waiting,
            RoundStatus::Countdown,
            RoundStatus::Spinning,
            RoundStatus::Finished,
        ] {
            assert_eq!(status.as_str().parse::<RoundStatus>(), Ok(status));
        }
        assert!("paused".parse::<RoundStatus>().is_err());
    }

    #[test]
    fn test_status_accepts_stakes() {
        assert!(RoundStatus::Waiting.accepts_stakes());
        assert!(RoundStatus::Countdown.accepts_stakes());
        assert!(!RoundStatus::Spinning.accepts_stakes());
        assert!(!RoundStatus::Finished.accepts_stakes());
        assert!(!RoundStatus::Finished.is_open());
    }

    #[test]
    fn test_round_serializes_camel_case() {
        let round = Round::new(3, 1_000);
        let json = serde_json::to_value(&round).unwrap();
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["createdAtMs"], 1_000);
        assert!(json["winnerId"].is_null());
    }
}
