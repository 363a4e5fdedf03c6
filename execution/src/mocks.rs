//! Fixtures for exercising the engine against the in-memory store.

use crate::store::Memory;
use giftwheel_types::{ItemId, UserId};
use rand::{rngs::StdRng, SeedableRng};

/// Creates a deterministic generator for draws.
pub fn create_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Creates a store with one user per value, each owning a single item worth that value.
///
/// Users are numbered from 1 in the order given.
pub fn create_players(values: &[u64]) -> (Memory, Vec<(UserId, ItemId)>) {
    let mut store = Memory::default();
    let players = values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let user_id = index as UserId + 1;
            store.add_user(user_id, None);
            let gift = store.add_gift(&format!("gift-{value}"), *value);
            let item = store
                .grant_item(user_id, gift.id)
                .expect("gift was just added");
            (user_id, item.id)
        })
        .collect();
    (store, players)
}
