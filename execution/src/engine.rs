//! Orchestrates rounds over a [`Store`]: stake placement, lazy lifecycle ticks, the draw, and
//! administrative reset.

use giftwheel_types::{
    ItemId, Resolution, Round, RoundId, RoundStatus, RoundView, StakeId, StakeRequest, Transition,
    UserId,
};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    admission::AdmissionLimits,
    draw::{pick_winner, roll},
    error::Error,
    lifecycle::{Lifecycle, LifecycleConfig, TransitionResult},
    projector::project,
    store::{Settlement, Store},
};

/// Upper bound on transitions applied by one tick (waiting -> countdown -> spinning -> finished).
const MAX_TICK_STEPS: usize = 4;

/// Default number of attempts for the settlement transaction.
pub const DEFAULT_SETTLE_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub lifecycle: LifecycleConfig,
    pub limits: AdmissionLimits,
    pub settle_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            limits: AdmissionLimits::default(),
            settle_attempts: DEFAULT_SETTLE_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        self.lifecycle.validate()?;
        if self.limits.max_participants < self.lifecycle.min_participants {
            return Err("max_participants must be at least min_participants");
        }
        if self.settle_attempts == 0 {
            return Err("settle_attempts must be greater than zero");
        }
        Ok(())
    }
}

/// Identifiers of an accepted stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacedStake {
    pub round_id: RoundId,
    pub stake_id: StakeId,
}

#[derive(Clone, Debug)]
pub struct Engine {
    lifecycle: Lifecycle,
    limits: AdmissionLimits,
    settle_attempts: u32,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(config.lifecycle),
            limits: config.limits,
            settle_attempts: config.settle_attempts.max(1),
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            lifecycle: *self.lifecycle.config(),
            limits: self.limits,
            settle_attempts: self.settle_attempts,
        }
    }

    /// Stake `item_id` into the open round on behalf of `user_id`.
    ///
    /// The open round is ticked first, so a countdown that ran out closes the round before
    /// admission. Admission is decided by the store. The round is ticked again afterwards; a
    /// failing tick there does not undo the accepted stake.
    pub fn place_stake<S: Store, R: Rng + ?Sized>(
        &self,
        store: &mut S,
        user_id: UserId,
        item_id: ItemId,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<PlacedStake, Error> {
        let open = store.open_round(now_ms)?;
        let mut round = self.tick(store, open.id, now_ms, rng)?;
        if round.status == RoundStatus::Finished {
            // Auto-resolve settled it; stakes go to the next round.
            round = store.open_round(now_ms)?;
        }
        let request = StakeRequest {
            round_id: round.id,
            item_id,
            user_id,
            placed_at_ms: now_ms,
        };
        let stake = store.insert_stake(&request, &self.limits)?;
        info!(
            round_id = round.id,
            stake_id = stake.id,
            user_id,
            item_id,
            "stake accepted"
        );

        if let Err(err) = self.tick(store, round.id, now_ms, rng) {
            warn!(round_id = round.id, ?err, "tick after stake failed");
        }

        Ok(PlacedStake {
            round_id: round.id,
            stake_id: stake.id,
        })
    }

    /// Apply every transition that is due for `round_id` at `now_ms` and return the round.
    ///
    /// Losing a transition race to another caller is not an error; the round is re-read and
    /// evaluated again.
    pub fn tick<S: Store, R: Rng + ?Sized>(
        &self,
        store: &mut S,
        round_id: RoundId,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<Round, Error> {
        for _ in 0..MAX_TICK_STEPS {
            let round = load_round(store, round_id)?;
            let participants = store.participant_count(round_id)?;
            let applied = match self.lifecycle.check_transition(&round, participants, now_ms) {
                TransitionResult::NoTransition => return Ok(round),
                TransitionResult::ToCountdown { started_at_ms } => {
                    let applied = store.transition_status(
                        round_id,
                        RoundStatus::Waiting,
                        RoundStatus::Countdown,
                        Transition::started_at(started_at_ms)
                            .with_min_participants(self.lifecycle.config().min_participants),
                    )?;
                    if applied {
                        info!(round_id, participants, "countdown started");
                    }
                    applied
                }
                TransitionResult::ToSpinning { spinning_at_ms } => {
                    let applied = store.transition_status(
                        round_id,
                        RoundStatus::Countdown,
                        RoundStatus::Spinning,
                        Transition::spinning_at(spinning_at_ms),
                    )?;
                    if applied {
                        info!(round_id, participants, "round spinning");
                    }
                    applied
                }
                TransitionResult::Resolve => match self.settle(store, &round, now_ms, rng) {
                    Ok(_) => true,
                    Err(Error::InvalidRoundState { .. }) => false,
                    Err(err) => return Err(err),
                },
            };
            if !applied {
                debug!(round_id, status = %round.status, "transition taken by another caller");
            }
        }
        load_round(store, round_id)
    }

    /// Project a round, ticking it first so the view reflects any transition now due.
    ///
    /// Without `round_id` the open round is used (created if none exists).
    pub fn round_view<S: Store, R: Rng + ?Sized>(
        &self,
        store: &mut S,
        round_id: Option<RoundId>,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<RoundView, Error> {
        let round_id = match round_id {
            Some(round_id) => round_id,
            None => store.open_round(now_ms)?.id,
        };
        let round = self.tick(store, round_id, now_ms, rng)?;
        let stakes = store.round_stakes(round_id)?;
        Ok(project(
            &round,
            &stakes,
            now_ms,
            &self.lifecycle,
            self.limits.max_participants,
        ))
    }

    /// Draw a winner for a spinning round and transfer every staked item to them.
    pub fn resolve<S: Store, R: Rng + ?Sized>(
        &self,
        store: &mut S,
        round_id: RoundId,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<Resolution, Error> {
        let round = self.tick(store, round_id, now_ms, rng)?;
        match round.status {
            RoundStatus::Spinning => self.settle(store, &round, now_ms, rng),
            RoundStatus::Waiting => {
                let participants = store.participant_count(round_id)?;
                if participants < self.lifecycle.config().min_participants {
                    Err(Error::NotEnoughParticipants {
                        round_id,
                        participants,
                    })
                } else {
                    Err(Error::InvalidRoundState {
                        round_id,
                        status: round.status,
                    })
                }
            }
            status => Err(Error::InvalidRoundState { round_id, status }),
        }
    }

    /// Return an unfinished round to waiting, dropping its stakes.
    pub fn reset<S: Store>(&self, store: &mut S, round_id: RoundId) -> Result<Round, Error> {
        let round = load_round(store, round_id)?;
        if round.status == RoundStatus::Finished {
            return Err(Error::InvalidRoundState {
                round_id,
                status: round.status,
            });
        }
        match store.reset_round(round_id)? {
            Some(removed) => {
                info!(round_id, from = %round.status, removed, "round reset");
                load_round(store, round_id)
            }
            None => {
                let status = load_round(store, round_id)?.status;
                Err(Error::InvalidRoundState { round_id, status })
            }
        }
    }

    fn settle<S: Store, R: Rng + ?Sized>(
        &self,
        store: &mut S,
        round: &Round,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<Resolution, Error> {
        let stakes = store.round_stakes(round.id)?;
        let view = project(
            round,
            &stakes,
            now_ms,
            &self.lifecycle,
            self.limits.max_participants,
        );
        let draw_value = roll(rng);
        let draw = pick_winner(&view.participants, draw_value).ok_or(
            Error::NotEnoughParticipants {
                round_id: round.id,
                participants: 0,
            },
        )?;
        let settlement = Settlement {
            round_id: round.id,
            winner_id: draw.winner_id,
            draw_value,
            finished_at_ms: now_ms,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match store.settle_round(&settlement) {
                Ok(Some(settled_item_count)) => {
                    info!(
                        round_id = round.id,
                        winner_id = draw.winner_id,
                        draw_value,
                        settled_item_count,
                        total_value = view.total_value,
                        "round settled"
                    );
                    return Ok(Resolution {
                        round_id: round.id,
                        winner_id: draw.winner_id,
                        draw_value,
                        settled_item_count,
                    });
                }
                Ok(None) => {
                    let status = load_round(store, round.id)?.status;
                    return Err(Error::InvalidRoundState {
                        round_id: round.id,
                        status,
                    });
                }
                Err(err) if attempt < self.settle_attempts => {
                    warn!(round_id = round.id, attempt, ?err, "settlement failed, retrying");
                }
                Err(err) => {
                    return Err(Error::Store(err.context(format!(
                        "settle round {} after {attempt} attempts",
                        round.id
                    ))))
                }
            }
        }
    }
}

fn load_round<S: Store>(store: &S, round_id: RoundId) -> Result<Round, Error> {
    store.round(round_id)?.ok_or(Error::RoundNotFound(round_id))
}
