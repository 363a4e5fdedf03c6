use anyhow::Result;
use giftwheel_types::{
    Item, ItemId, Round, RoundId, RoundStatus, Stake, StakeEntry, StakeRequest, Transition,
    UserId,
};
use thiserror::Error as ThisError;

use crate::admission::{AdmissionError, AdmissionLimits};

#[cfg(any(test, feature = "mocks"))]
use anyhow::anyhow;
#[cfg(any(test, feature = "mocks"))]
use crate::admission::{check, AdmissionContext};
#[cfg(any(test, feature = "mocks"))]
use giftwheel_types::{display_name, Gift, GiftId, StakeId, User};
#[cfg(any(test, feature = "mocks"))]
use std::collections::BTreeMap;

/// Failure to record a stake.
#[derive(Debug, ThisError)]
pub enum StakeError {
    #[error(transparent)]
    Rejected(#[from] AdmissionError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Outcome of a draw, written atomically with the ownership transfer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settlement {
    pub round_id: RoundId,
    pub winner_id: UserId,
    pub draw_value: f64,
    pub finished_at_ms: u64,
}

pub trait RoundRepository {
    /// Newest round that is not finished, creating a waiting round if there is none.
    ///
    /// Concurrent callers must all observe the same round.
    fn open_round(&mut self, now_ms: u64) -> Result<Round>;

    fn round(&self, round_id: RoundId) -> Result<Option<Round>>;

    fn latest_round(&self) -> Result<Option<Round>>;

    /// Move `round_id` from `from` to `to` if it is still in `from`.
    ///
    /// Returns whether this call performed the transition.
    fn transition_status(
        &mut self,
        round_id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
        transition: Transition,
    ) -> Result<bool>;
}

pub trait BetLedger {
    /// Admit and record a stake, marking its item staked.
    fn insert_stake(
        &mut self,
        request: &StakeRequest,
        limits: &AdmissionLimits,
    ) -> Result<Stake, StakeError>;

    /// Stakes of a round in placement order, joined with item value and staker name.
    fn round_stakes(&self, round_id: RoundId) -> Result<Vec<StakeEntry>>;

    /// Distinct users with a stake in the round.
    fn participant_count(&self, round_id: RoundId) -> Result<usize> {
        let mut users: Vec<UserId> = self
            .round_stakes(round_id)?
            .into_iter()
            .map(|entry| entry.stake.user_id)
            .collect();
        users.sort_unstable();
        users.dedup();
        Ok(users.len())
    }
}

pub trait OwnershipStore {
    fn item(&self, item_id: ItemId) -> Result<Option<Item>>;

    /// Items owned by `user_id` that are not staked.
    fn inventory(&self, user_id: UserId) -> Result<Vec<Item>>;
}

pub trait Store: RoundRepository + BetLedger + OwnershipStore {
    /// Finish a spinning round and hand every staked item to the winner, all or nothing.
    ///
    /// Returns the number of items transferred, or `None` if the round was no longer spinning.
    fn settle_round(&mut self, settlement: &Settlement) -> Result<Option<usize>>;

    /// Return an unfinished round to waiting and drop its stakes.
    ///
    /// Returns the number of stakes removed, or `None` if the round is missing or finished.
    fn reset_round(&mut self, round_id: RoundId) -> Result<Option<usize>>;
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    users: BTreeMap<UserId, User>,
    gifts: BTreeMap<GiftId, Gift>,
    items: BTreeMap<ItemId, Item>,
    rounds: BTreeMap<RoundId, Round>,
    stakes: BTreeMap<StakeId, Stake>,
    next_id: u64,
    failing_settlements: u32,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_user(&mut self, user_id: UserId, username: Option<&str>) -> User {
        let user = User {
            id: user_id,
            username: username.map(str::to_string),
            created_at_ms: 0,
        };
        self.users.insert(user_id, user.clone());
        user
    }

    pub fn add_gift(&mut self, name: &str, value: u64) -> Gift {
        let gift = Gift {
            id: self.next_id(),
            name: name.to_string(),
            description: None,
            value,
            active: true,
        };
        self.gifts.insert(gift.id, gift.clone());
        gift
    }

    pub fn grant_item(&mut self, owner_id: UserId, gift_id: GiftId) -> Result<Item> {
        let gift = self
            .gifts
            .get(&gift_id)
            .cloned()
            .ok_or_else(|| anyhow!("gift {gift_id} not found"))?;
        let item = Item {
            id: self.next_id(),
            gift_id,
            owner_id,
            staked: false,
            name: gift.name,
            value: gift.value,
        };
        self.items.insert(item.id, item.clone());
        Ok(item)
    }

    /// Make the next `count` settlements fail before touching any state.
    pub fn fail_next_settlements(&mut self, count: u32) {
        self.failing_settlements = count;
    }

    pub fn stakes(&self) -> impl Iterator<Item = &Stake> {
        self.stakes.values()
    }

    fn round_participants(&self, round_id: RoundId) -> Vec<UserId> {
        let mut participants = Vec::new();
        for stake in self.stakes.values().filter(|s| s.round_id == round_id) {
            if !participants.contains(&stake.user_id) {
                participants.push(stake.user_id);
            }
        }
        participants
    }
}

#[cfg(any(test, feature = "mocks"))]
impl RoundRepository for Memory {
    fn open_round(&mut self, now_ms: u64) -> Result<Round> {
        if let Some(round) = self.rounds.values().rev().find(|r| r.status.is_open()) {
            return Ok(round.clone());
        }
        let round = Round::new(self.next_id(), now_ms);
        self.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    fn round(&self, round_id: RoundId) -> Result<Option<Round>> {
        Ok(self.rounds.get(&round_id).cloned())
    }

    fn latest_round(&self) -> Result<Option<Round>> {
        Ok(self.rounds.values().next_back().cloned())
    }

    fn transition_status(
        &mut self,
        round_id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
        transition: Transition,
    ) -> Result<bool> {
        if let Some(min) = transition.min_participants {
            if self.participant_count(round_id)? < min {
                return Ok(false);
            }
        }
        let Some(round) = self.rounds.get_mut(&round_id) else {
            return Ok(false);
        };
        if round.status != from {
            return Ok(false);
        }
        round.status = to;
        if transition.started_at_ms.is_some() {
            round.started_at_ms = transition.started_at_ms;
        }
        if transition.spinning_at_ms.is_some() {
            round.spinning_at_ms = transition.spinning_at_ms;
        }
        Ok(true)
    }
}

#[cfg(any(test, feature = "mocks"))]
impl BetLedger for Memory {
    fn insert_stake(
        &mut self,
        request: &StakeRequest,
        limits: &AdmissionLimits,
    ) -> Result<Stake, StakeError> {
        let item = self.items.get(&request.item_id);
        let item_staked = item.is_some_and(|item| item.staked)
            || self
                .stakes
                .values()
                .any(|s| s.active && s.item_id == request.item_id);
        let participants = self.round_participants(request.round_id);
        let ctx = AdmissionContext {
            request,
            round_status: self.rounds.get(&request.round_id).map(|r| r.status),
            item_owner: item.map(|item| item.owner_id),
            item_staked,
            participants: &participants,
        };
        check(&ctx, limits)?;

        let stake = Stake {
            id: self.next_id(),
            round_id: request.round_id,
            item_id: request.item_id,
            user_id: request.user_id,
            placed_at_ms: request.placed_at_ms,
            active: true,
        };
        if let Some(item) = self.items.get_mut(&request.item_id) {
            item.staked = true;
        }
        self.stakes.insert(stake.id, stake.clone());
        Ok(stake)
    }

    fn round_stakes(&self, round_id: RoundId) -> Result<Vec<StakeEntry>> {
        self.stakes
            .values()
            .filter(|stake| stake.round_id == round_id)
            .map(|stake| -> Result<StakeEntry> {
                let item = self
                    .items
                    .get(&stake.item_id)
                    .ok_or_else(|| anyhow!("item {} not found", stake.item_id))?;
                let username = self
                    .users
                    .get(&stake.user_id)
                    .and_then(|user| user.username.as_deref());
                Ok(StakeEntry {
                    stake: stake.clone(),
                    gift_name: item.name.clone(),
                    value: item.value,
                    display_name: display_name(stake.user_id, username),
                })
            })
            .collect()
    }
}

#[cfg(any(test, feature = "mocks"))]
impl OwnershipStore for Memory {
    fn item(&self, item_id: ItemId) -> Result<Option<Item>> {
        Ok(self.items.get(&item_id).cloned())
    }

    fn inventory(&self, user_id: UserId) -> Result<Vec<Item>> {
        Ok(self
            .items
            .values()
            .filter(|item| item.owner_id == user_id && !item.staked)
            .cloned()
            .collect())
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Store for Memory {
    fn settle_round(&mut self, settlement: &Settlement) -> Result<Option<usize>> {
        if self.failing_settlements > 0 {
            self.failing_settlements -= 1;
            return Err(anyhow!("settlement unavailable"));
        }
        let Some(round) = self.rounds.get_mut(&settlement.round_id) else {
            return Ok(None);
        };
        if round.status != RoundStatus::Spinning {
            return Ok(None);
        }
        round.status = RoundStatus::Finished;
        round.winner_id = Some(settlement.winner_id);
        round.draw_value = Some(settlement.draw_value);
        round.finished_at_ms = Some(settlement.finished_at_ms);

        let mut settled = 0;
        for stake in self
            .stakes
            .values_mut()
            .filter(|s| s.round_id == settlement.round_id && s.active)
        {
            stake.active = false;
            if let Some(item) = self.items.get_mut(&stake.item_id) {
                item.owner_id = settlement.winner_id;
                item.staked = false;
                settled += 1;
            }
        }
        Ok(Some(settled))
    }

    fn reset_round(&mut self, round_id: RoundId) -> Result<Option<usize>> {
        let Some(round) = self.rounds.get_mut(&round_id) else {
            return Ok(None);
        };
        if !round.status.is_open() {
            return Ok(None);
        }
        round.status = RoundStatus::Waiting;
        round.started_at_ms = None;
        round.spinning_at_ms = None;

        let removed: Vec<StakeId> = self
            .stakes
            .values()
            .filter(|s| s.round_id == round_id)
            .map(|s| s.id)
            .collect();
        for stake_id in &removed {
            if let Some(stake) = self.stakes.remove(stake_id) {
                if let Some(item) = self.items.get_mut(&stake.item_id) {
                    item.staked = false;
                }
            }
        }
        Ok(Some(removed.len()))
    }
}
