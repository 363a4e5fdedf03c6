//! Stake admission rules.
//!
//! Stores evaluate [`check`] inside the same atomic unit that inserts the stake, so the
//! decision and the insert cannot be separated by a concurrent settlement or a second stake
//! on the same item. The unique index on active stakes remains the final arbiter for races
//! that slip past the check (see [`AdmissionError::DuplicateStake`]).

use giftwheel_types::{ItemId, RoundId, RoundStatus, StakeRequest, UserId, MAX_PARTICIPANTS};
use thiserror::Error as ThisError;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AdmissionError {
    #[error("item {item_id} already carries an unresolved stake")]
    DuplicateStake { item_id: ItemId },
    #[error("round {round_id} already has {max} participants")]
    RoundFull { round_id: RoundId, max: usize },
    #[error("item {item_id} is not owned by user {user_id}")]
    ItemNotOwned { item_id: ItemId, user_id: UserId },
    #[error("round {round_id} is not accepting stakes (status={status:?})")]
    RoundNotAcceptingStakes {
        round_id: RoundId,
        status: Option<RoundStatus>,
    },
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::DuplicateStake { .. } => "DUPLICATE_STAKE",
            AdmissionError::RoundFull { .. } => "ROUND_FULL",
            AdmissionError::ItemNotOwned { .. } => "ITEM_NOT_OWNED",
            AdmissionError::RoundNotAcceptingStakes { .. } => "ROUND_NOT_ACCEPTING_STAKES",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionLimits {
    /// Distinct stakers a round accepts. Existing participants may always add items.
    pub max_participants: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_participants: MAX_PARTICIPANTS,
        }
    }
}

/// Everything admission needs, read by the store under its atomicity guarantee.
#[derive(Clone, Debug)]
pub struct AdmissionContext<'a> {
    pub request: &'a StakeRequest,
    /// `None` when the round does not exist.
    pub round_status: Option<RoundStatus>,
    /// `None` when the item does not exist.
    pub item_owner: Option<UserId>,
    /// The item carries an active stake (in any round).
    pub item_staked: bool,
    /// Distinct users with stakes in the round.
    pub participants: &'a [UserId],
}

/// Decide whether a stake may be recorded.
///
/// Rules are evaluated in order: round status, ownership, duplicate stake, participant cap.
pub fn check(ctx: &AdmissionContext<'_>, limits: &AdmissionLimits) -> Result<(), AdmissionError> {
    let request = ctx.request;
    match ctx.round_status {
        Some(status) if status.accepts_stakes() => {}
        status => {
            return Err(AdmissionError::RoundNotAcceptingStakes {
                round_id: request.round_id,
                status,
            })
        }
    }

    if ctx.item_owner != Some(request.user_id) {
        return Err(AdmissionError::ItemNotOwned {
            item_id: request.item_id,
            user_id: request.user_id,
        });
    }

    if ctx.item_staked {
        return Err(AdmissionError::DuplicateStake {
            item_id: request.item_id,
        });
    }

    let is_new_participant = !ctx.participants.contains(&request.user_id);
    if is_new_participant && ctx.participants.len() >= limits.max_participants {
        return Err(AdmissionError::RoundFull {
            round_id: request.round_id,
            max: limits.max_participants,
        });
    }

    Ok(())
}
