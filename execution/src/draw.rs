//! Weighted winner selection.
//!
//! The wheel is laid out in join order, each participant owning a segment as wide as their win
//! probability. A draw value `r` in `[0, 100)` lands on the first segment whose cumulative end
//! is at or beyond `r`. Floating-point error can leave the cumulative sum a hair under 100, so
//! a value past the final boundary falls to the last participant.

use giftwheel_types::{ParticipantView, UserId, DRAW_RANGE};
use rand::Rng;

/// A chosen winner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Draw {
    pub winner_id: UserId,
    /// Join-order index of the winner.
    pub slot: usize,
    pub draw_value: f64,
}

/// Draw a value uniformly from `[0, 100)`.
pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(0.0..DRAW_RANGE)
}

/// Pick the participant whose wheel segment contains `draw_value`.
///
/// Returns `None` only when there are no participants.
pub fn pick_winner(participants: &[ParticipantView], draw_value: f64) -> Option<Draw> {
    let mut cumulative = 0.0;
    for (slot, participant) in participants.iter().enumerate() {
        cumulative += participant.win_probability;
        if draw_value <= cumulative {
            return Some(Draw {
                winner_id: participant.user_id,
                slot,
                draw_value,
            });
        }
    }

    let slot = participants.len().checked_sub(1)?;
    Some(Draw {
        winner_id: participants[slot].user_id,
        slot,
        draw_value,
    })
}
