//! Round lifecycle state machine.
//!
//! Pure transition logic for a round, kept separate from storage. Callers read the round and
//! its participant count, ask [`Lifecycle::check_transition`] what is due, and apply the result
//! through a conditional status update.
//!
//! ## Phases
//!
//! 1. **Waiting** - Accepting stakes, fewer than `min_participants` distinct users
//! 2. **Countdown** - Enough users joined; stakes still accepted until the countdown ends
//! 3. **Spinning** - Stakes closed, awaiting the draw
//! 4. **Finished** - Winner chosen and items transferred (terminal)
//!
//! ## Clock
//!
//! Nothing reads the wall clock. Every check takes `now_ms` from the caller, so a replay with
//! the same timestamps yields the same transitions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use giftwheel_execution::lifecycle::{Lifecycle, LifecycleConfig, TransitionResult};
//!
//! let lifecycle = Lifecycle::new(LifecycleConfig::default());
//! match lifecycle.check_transition(&round, participants, now_ms) {
//!     TransitionResult::ToCountdown { started_at_ms } => { /* waiting -> countdown */ }
//!     TransitionResult::ToSpinning { spinning_at_ms } => { /* countdown -> spinning */ }
//!     TransitionResult::Resolve => { /* run the draw */ }
//!     TransitionResult::NoTransition => {}
//! }
//! ```

use giftwheel_types::{Round, RoundStatus, DEFAULT_COUNTDOWN_MS, MIN_PARTICIPANTS};

/// Timing and threshold configuration for the lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Duration of the countdown phase in milliseconds.
    pub countdown_ms: u64,
    /// Distinct participants required to leave waiting.
    pub min_participants: usize,
    /// When set, a spinning round older than this is resolved on the next tick.
    pub auto_resolve_ms: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            countdown_ms: DEFAULT_COUNTDOWN_MS,
            min_participants: MIN_PARTICIPANTS,
            auto_resolve_ms: None,
        }
    }
}

impl LifecycleConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.countdown_ms == 0 {
            return Err("countdown_ms must be greater than zero");
        }
        if self.min_participants < 2 {
            return Err("min_participants must be at least two");
        }
        if self.auto_resolve_ms == Some(0) {
            return Err("auto_resolve_ms must be greater than zero when set");
        }
        Ok(())
    }
}

/// Result of a transition check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Nothing is due.
    NoTransition,
    /// waiting -> countdown.
    ToCountdown { started_at_ms: u64 },
    /// countdown -> spinning.
    ToSpinning { spinning_at_ms: u64 },
    /// spinning -> finished through the draw (auto-resolve only).
    Resolve,
}

/// Pure state machine for round lifecycle management.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    config: LifecycleConfig,
}

impl Lifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Determine which transition, if any, is due for `round`.
    ///
    /// `participants` is the number of distinct users with a stake in the round.
    pub fn check_transition(
        &self,
        round: &Round,
        participants: usize,
        now_ms: u64,
    ) -> TransitionResult {
        match round.status {
            RoundStatus::Waiting => {
                if participants >= self.config.min_participants {
                    TransitionResult::ToCountdown {
                        started_at_ms: now_ms,
                    }
                } else {
                    TransitionResult::NoTransition
                }
            }
            RoundStatus::Countdown => {
                if self.countdown_elapsed(round, now_ms) {
                    TransitionResult::ToSpinning {
                        spinning_at_ms: now_ms,
                    }
                } else {
                    TransitionResult::NoTransition
                }
            }
            RoundStatus::Spinning => match self.config.auto_resolve_ms {
                Some(delay) => {
                    let since = round.spinning_at_ms.unwrap_or(round.created_at_ms);
                    if now_ms >= since.saturating_add(delay) {
                        TransitionResult::Resolve
                    } else {
                        TransitionResult::NoTransition
                    }
                }
                None => TransitionResult::NoTransition,
            },
            RoundStatus::Finished => TransitionResult::NoTransition,
        }
    }

    /// Absolute time at which the countdown ends, if the round is counting down.
    pub fn countdown_ends_at(&self, round: &Round) -> Option<u64> {
        match (round.status, round.started_at_ms) {
            (RoundStatus::Countdown, Some(started)) => {
                Some(started.saturating_add(self.config.countdown_ms))
            }
            // A countdown row without a start time ends immediately.
            (RoundStatus::Countdown, None) => Some(round.created_at_ms),
            _ => None,
        }
    }

    fn countdown_elapsed(&self, round: &Round, now_ms: u64) -> bool {
        self.countdown_ends_at(round)
            .is_some_and(|ends_at| now_ms >= ends_at)
    }

    /// Milliseconds left in the countdown; zero outside the countdown phase.
    pub fn countdown_remaining_ms(&self, round: &Round, now_ms: u64) -> u64 {
        self.countdown_ends_at(round)
            .map(|ends_at| ends_at.saturating_sub(now_ms))
            .unwrap_or(0)
    }
}

/// Round milliseconds up to whole seconds.
#[inline]
pub fn ms_to_secs_ceil(ms: u64) -> u64 {
    ms.div_ceil(1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LifecycleConfig {
        LifecycleConfig {
            countdown_ms: 20_000, // 20 seconds
            min_participants: 2,
            auto_resolve_ms: None,
        }
    }

    fn round_in(status: RoundStatus) -> Round {
        let mut round = Round::new(1, 1_000);
        round.status = status;
        round
    }

    #[test]
    fn test_config_validation() {
        let valid = test_config();
        assert!(valid.validate().is_ok());

        let invalid_countdown = LifecycleConfig { countdown_ms: 0, ..valid };
        assert!(invalid_countdown.validate().is_err());

        let invalid_min = LifecycleConfig { min_participants: 1, ..valid };
        assert!(invalid_min.validate().is_err());

        let invalid_auto = LifecycleConfig { auto_resolve_ms: Some(0), ..valid };
        assert!(invalid_auto.validate().is_err());

        assert!(LifecycleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_single_participant_never_leaves_waiting() {
        let lifecycle = Lifecycle::new(test_config());
        let round = round_in(RoundStatus::Waiting);
        for now in [1_000, 60_000, u64::MAX] {
            assert_eq!(
                lifecycle.check_transition(&round, 1, now),
                TransitionResult::NoTransition
            );
        }
        assert_eq!(
            lifecycle.check_transition(&round, 0, 5_000),
            TransitionResult::NoTransition
        );
    }

    #[test]
    fn test_waiting_to_countdown() {
        let lifecycle = Lifecycle::new(test_config());
        let round = round_in(RoundStatus::Waiting);
        assert_eq!(
            lifecycle.check_transition(&round, 2, 5_000),
            TransitionResult::ToCountdown { started_at_ms: 5_000 }
        );
    }

    #[test]
    fn test_countdown_to_spinning() {
        let lifecycle = Lifecycle::new(test_config());
        let mut round = round_in(RoundStatus::Countdown);
        round.started_at_ms = Some(10_000);

        // Not time yet
        assert_eq!(
            lifecycle.check_transition(&round, 2, 29_999),
            TransitionResult::NoTransition
        );

        // Exactly at end time
        assert_eq!(
            lifecycle.check_transition(&round, 2, 30_000),
            TransitionResult::ToSpinning { spinning_at_ms: 30_000 }
        );
    }

    #[test]
    fn test_spinning_waits_for_resolve() {
        let lifecycle = Lifecycle::new(test_config());
        let mut round = round_in(RoundStatus::Spinning);
        round.spinning_at_ms = Some(30_000);
        assert_eq!(
            lifecycle.check_transition(&round, 3, 1_000_000),
            TransitionResult::NoTransition
        );
    }

    #[test]
    fn test_spinning_auto_resolve() {
        let lifecycle = Lifecycle::new(LifecycleConfig {
            auto_resolve_ms: Some(5_000),
            ..test_config()
        });
        let mut round = round_in(RoundStatus::Spinning);
        round.spinning_at_ms = Some(30_000);

        assert_eq!(
            lifecycle.check_transition(&round, 2, 34_999),
            TransitionResult::NoTransition
        );
        assert_eq!(
            lifecycle.check_transition(&round, 2, 35_000),
            TransitionResult::Resolve
        );
    }

    #[test]
    fn test_finished_is_terminal() {
        let lifecycle = Lifecycle::new(LifecycleConfig {
            auto_resolve_ms: Some(1),
            ..test_config()
        });
        let round = round_in(RoundStatus::Finished);
        assert_eq!(
            lifecycle.check_transition(&round, 5, u64::MAX),
            TransitionResult::NoTransition
        );
    }

    #[test]
    fn test_countdown_remaining() {
        let lifecycle = Lifecycle::new(test_config());
        let mut round = round_in(RoundStatus::Countdown);
        round.started_at_ms = Some(10_000);

        assert_eq!(lifecycle.countdown_remaining_ms(&round, 10_000), 20_000);
        assert_eq!(lifecycle.countdown_remaining_ms(&round, 25_500), 4_500);
        assert_eq!(lifecycle.countdown_remaining_ms(&round, 40_000), 0);

        // Clock skew: now before start
        assert_eq!(lifecycle.countdown_remaining_ms(&round, 0), 30_000);

        let waiting = round_in(RoundStatus::Waiting);
        assert_eq!(lifecycle.countdown_remaining_ms(&waiting, 10_000), 0);
    }

    #[test]
    fn test_ms_to_secs_ceil() {
        assert_eq!(ms_to_secs_ceil(0), 0);
        assert_eq!(ms_to_secs_ceil(1), 1);
        assert_eq!(ms_to_secs_ceil(4_500), 5);
        assert_eq!(ms_to_secs_ceil(20_000), 20);
    }

    #[test]
    fn test_full_round_cycle() {
        let lifecycle = Lifecycle::new(test_config());
        let mut round = round_in(RoundStatus::Waiting);

        let start = 100_000;
        match lifecycle.check_transition(&round, 2, start) {
            TransitionResult::ToCountdown { started_at_ms } => {
                round.status = RoundStatus::Countdown;
                round.started_at_ms = Some(started_at_ms);
            }
            other => panic!("unexpected transition: {other:?}"),
        }

        let spin = start + 20_000;
        match lifecycle.check_transition(&round, 2, spin) {
            TransitionResult::ToSpinning { spinning_at_ms } => {
                round.status = RoundStatus::Spinning;
                round.spinning_at_ms = Some(spinning_at_ms);
            }
            other => panic!("unexpected transition: {other:?}"),
        }

        assert_eq!(round.spinning_at_ms, Some(120_000));
        assert_eq!(
            lifecycle.check_transition(&round, 2, spin + 1),
            TransitionResult::NoTransition
        );
    }

    #[test]
    fn test_overflow_protection() {
        let lifecycle = Lifecycle::new(LifecycleConfig {
            countdown_ms: u64::MAX,
            auto_resolve_ms: Some(u64::MAX),
            ..test_config()
        });
        let mut round = round_in(RoundStatus::Countdown);
        round.started_at_ms = Some(u64::MAX - 1);
        assert_eq!(lifecycle.countdown_ends_at(&round), Some(u64::MAX));
        assert_eq!(
            lifecycle.check_transition(&round, 2, u64::MAX - 1),
            TransitionResult::NoTransition
        );
    }
}
