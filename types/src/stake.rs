use serde::{Deserialize, Serialize};

use super::{ItemId, RoundId, StakeId, UserId};

/// An accepted stake. Retained after its round finishes with `active` cleared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stake {
    pub id: StakeId,
    pub round_id: RoundId,
    pub item_id: ItemId,
    pub user_id: UserId,
    pub placed_at_ms: u64,
    pub active: bool,
}

/// A stake submission, before admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StakeRequest {
    pub round_id: RoundId,
    pub item_id: ItemId,
    pub user_id: UserId,
    pub placed_at_ms: u64,
}

/// A stake joined with what the projector needs: the item's value and the staker's name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeEntry {
    pub stake: Stake,
    pub gift_name: String,
    pub value: u64,
    pub display_name: String,
}
