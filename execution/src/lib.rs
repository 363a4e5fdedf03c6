//! Giftwheel execution layer.
//!
//! This crate contains the round lifecycle engine: the admission rules for stakes, the
//! state machine that moves a round from waiting to finished, the projector that derives the
//! visible round view, and the weighted draw that picks a winner before settlement.
//!
//! ## Time and randomness
//! - Nothing here reads the wall clock. Every operation takes `now_ms` from the caller.
//! - Randomness only enters through the `rand::Rng` handed to [`Engine::resolve`] and
//!   [`Engine::tick`], so seeded generators reproduce draws exactly.
//!
//! ## Storage invariants
//! Stores implement [`Store`]. The engine relies on three guarantees from them:
//! - `transition_status` is a single conditional update (only one racer wins a transition);
//! - `insert_stake` re-checks admission inside the same atomic unit as the insert;
//! - `settle_round` moves every staked item or none.
//!
//! ## Example
//! ```rust,ignore
//! use giftwheel_execution::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default());
//! let placed = engine.place_stake(&mut store, user_id, item_id, now_ms, &mut rng)?;
//! let view = engine.round_view(&mut store, Some(placed.round_id), now_ms, &mut rng)?;
//! ```

pub mod admission;
pub mod draw;
pub mod engine;
pub mod lifecycle;
pub mod projector;
pub mod store;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

mod error;

pub use admission::{check as check_admission, AdmissionContext, AdmissionError, AdmissionLimits};
pub use draw::{pick_winner, roll, Draw};
pub use engine::{Engine, EngineConfig, PlacedStake};
pub use error::Error;
pub use lifecycle::{Lifecycle, LifecycleConfig, TransitionResult};
pub use projector::{project, win_probabilities};
pub use store::{BetLedger, OwnershipStore, RoundRepository, Settlement, StakeError, Store};

#[cfg(any(test, feature = "mocks"))]
pub use store::Memory;
