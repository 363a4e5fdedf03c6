use serde::{Deserialize, Serialize};

use super::{GiftId, ItemId, UserId};

/// Catalog entry. `value` is in minor units (nano-TON).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: GiftId,
    pub name: String,
    pub description: Option<String>,
    pub value: u64,
    pub active: bool,
}

/// An owned instance of a catalog gift.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub gift_id: GiftId,
    pub owner_id: UserId,
    /// True while the item carries an unresolved stake.
    pub staked: bool,
    pub name: String,
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub created_at_ms: u64,
}
