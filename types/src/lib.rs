//! Gift wheel domain types.
//!
//! Defines rounds, stakes, owned items, the catalog, and the derived round view shared by the
//! execution layer and the server.

mod constants;
mod inventory;
mod round;
mod stake;
mod view;

pub use constants::*;
pub use inventory::*;
pub use round::*;
pub use stake::*;
pub use view::*;

pub type RoundId = u64;
pub type StakeId = u64;
pub type ItemId = u64;
pub type UserId = u64;
pub type GiftId = u64;

/// Display name used when a user never supplied a username.
pub fn display_name(user_id: UserId, username: Option<&str>) -> String {
    match username.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("user-{user_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(display_name(7, Some("alice")), "alice");
        assert_eq!(display_name(7, Some("  ")), "user-7");
        assert_eq!(display_name(7, None), "user-7");
    }
}
