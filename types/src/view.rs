use serde::{Deserialize, Serialize};

use super::{ItemId, RoundId, RoundStatus, UserId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakedItemView {
    pub item_id: ItemId,
    pub name: String,
    pub value: u64,
}

/// One participant's share of the pot, derived from the round's stakes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: UserId,
    pub display_name: String,
    pub total_value: u64,
    pub items: Vec<StakedItemView>,
    /// Percentage in [0, 100].
    pub win_probability: f64,
    /// Join order; first staker is slot 0.
    pub slot: usize,
    pub color: String,
}

/// Externally visible state of a round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub round_id: RoundId,
    pub status: RoundStatus,
    /// Ordered by join order.
    pub participants: Vec<ParticipantView>,
    pub total_value: u64,
    pub countdown_remaining_ms: u64,
    pub time_left_secs: u64,
    pub min_participants: usize,
    pub max_participants: usize,
    pub created_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_value: Option<f64>,
}

impl RoundView {
    pub fn participant(&self, user_id: UserId) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

/// Outcome of resolving a spinning round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub round_id: RoundId,
    pub winner_id: UserId,
    pub draw_value: f64,
    pub settled_item_count: usize,
}
