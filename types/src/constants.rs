/// Distinct participants required before the countdown starts.
pub const MIN_PARTICIPANTS: usize = 2;

/// Maximum distinct participants accepted into one round.
pub const MAX_PARTICIPANTS: usize = 5;

/// Countdown between the second participant joining and the wheel spinning.
pub const DEFAULT_COUNTDOWN_MS: u64 = 20_000;

/// Wheel segment colors, assigned by join order.
pub const PALETTE: [&str; 5] = ["#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7"];

/// Upper bound (exclusive) of the draw value; probabilities are percentages.
pub const DRAW_RANGE: f64 = 100.0;
