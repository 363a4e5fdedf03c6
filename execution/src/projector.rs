//! Derives the externally visible [`RoundView`] from a round and its stakes.

use giftwheel_types::{
    ParticipantView, Round, RoundView, StakeEntry, StakedItemView, DRAW_RANGE, PALETTE,
};

use crate::lifecycle::{ms_to_secs_ceil, Lifecycle};

/// Win probability (percent) for each pooled value.
///
/// When nothing of value is pooled every participant gets an equal share.
pub fn win_probabilities(values: &[u64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let total: u128 = values.iter().map(|v| u128::from(*v)).sum();
    if total == 0 {
        let share = DRAW_RANGE / values.len() as f64;
        return vec![share; values.len()];
    }
    let total = total as f64;
    values
        .iter()
        .map(|v| *v as f64 / total * DRAW_RANGE)
        .collect()
}

/// Project a round into its view.
///
/// `stakes` must be in placement order; participants are grouped by first stake.
pub fn project(
    round: &Round,
    stakes: &[StakeEntry],
    now_ms: u64,
    lifecycle: &Lifecycle,
    max_participants: usize,
) -> RoundView {
    let mut participants: Vec<ParticipantView> = Vec::new();
    for entry in stakes {
        let user_id = entry.stake.user_id;
        let item = StakedItemView {
            item_id: entry.stake.item_id,
            name: entry.gift_name.clone(),
            value: entry.value,
        };
        match participants.iter_mut().find(|p| p.user_id == user_id) {
            Some(participant) => {
                participant.total_value = participant.total_value.saturating_add(entry.value);
                participant.items.push(item);
            }
            None => {
                let slot = participants.len();
                participants.push(ParticipantView {
                    user_id,
                    display_name: entry.display_name.clone(),
                    total_value: entry.value,
                    items: vec![item],
                    win_probability: 0.0,
                    slot,
                    color: PALETTE[slot % PALETTE.len()].to_string(),
                });
            }
        }
    }

    let values: Vec<u64> = participants.iter().map(|p| p.total_value).collect();
    for (participant, probability) in participants.iter_mut().zip(win_probabilities(&values)) {
        participant.win_probability = probability;
    }

    let total_value = values.iter().fold(0u64, |acc, v| acc.saturating_add(*v));
    let countdown_remaining_ms = lifecycle.countdown_remaining_ms(round, now_ms);

    RoundView {
        round_id: round.id,
        status: round.status,
        participants,
        total_value,
        countdown_remaining_ms,
        time_left_secs: ms_to_secs_ceil(countdown_remaining_ms),
        min_participants: lifecycle.config().min_participants,
        max_participants,
        created_at_ms: round.created_at_ms,
        started_at_ms: round.started_at_ms,
        finished_at_ms: round.finished_at_ms,
        winner_id: round.winner_id,
        draw_value: round.draw_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use giftwheel_types::{RoundStatus, Stake, UserId, MAX_PARTICIPANTS};

    fn entry(id: u64, user_id: UserId, value: u64) -> StakeEntry {
        StakeEntry {
            stake: Stake {
                id,
                round_id: 1,
                item_id: id * 10,
                user_id,
                placed_at_ms: id,
                active: true,
            },
            gift_name: format!("gift-{id}"),
            value,
            display_name: format!("user-{user_id}"),
        }
    }

    #[test]
    fn test_probabilities_proportional() {
        assert_eq!(win_probabilities(&[2, 3, 5]), vec![20.0, 30.0, 50.0]);
        assert_eq!(win_probabilities(&[]), Vec::<f64>::new());
    }

    #[test]
    fn test_probabilities_zero_pool_split_equally() {
        assert_eq!(win_probabilities(&[0, 0]), vec![50.0, 50.0]);
        assert_eq!(win_probabilities(&[0, 0, 0, 0]), vec![25.0; 4]);
    }

    #[test]
    fn test_probabilities_sum_to_hundred() {
        let probabilities = win_probabilities(&[1, 1, 1]);
        let sum: f64 = probabilities.iter().sum();
        assert!((sum - 100.0).abs() < 1e-9);

        let huge = win_probabilities(&[u64::MAX, u64::MAX]);
        assert_eq!(huge, vec![50.0, 50.0]);
    }

    #[test]
    fn test_project_groups_by_join_order() {
        let mut round = Round::new(1, 0);
        round.status = RoundStatus::Countdown;
        round.started_at_ms = Some(1_000);
        let stakes = vec![entry(1, 7, 2), entry(2, 3, 3), entry(3, 7, 3), entry(4, 9, 2)];

        let lifecycle = Lifecycle::new(LifecycleConfig::default());
        let view = project(&round, &stakes, 6_500, &lifecycle, MAX_PARTICIPANTS);

        assert_eq!(view.total_value, 10);
        assert_eq!(view.participants.len(), 3);

        let first = &view.participants[0];
        assert_eq!(first.user_id, 7);
        assert_eq!(first.slot, 0);
        assert_eq!(first.color, PALETTE[0]);
        assert_eq!(first.total_value, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.win_probability, 50.0);

        assert_eq!(view.participants[1].user_id, 3);
        assert_eq!(view.participants[1].color, PALETTE[1]);
        assert_eq!(view.participant(9).map(|p| p.slot), Some(2));

        assert_eq!(view.countdown_remaining_ms, 14_500);
        assert_eq!(view.time_left_secs, 15);
        assert_eq!(view.min_participants, 2);
        assert_eq!(view.max_participants, 5);
    }

    #[test]
    fn test_project_empty_round() {
        let round = Round::new(4, 100);
        let lifecycle = Lifecycle::default();
        let view = project(&round, &[], 200, &lifecycle, 5);
        assert_eq!(view.round_id, 4);
        assert_eq!(view.status, RoundStatus::Waiting);
        assert!(view.participants.is_empty());
        assert_eq!(view.total_value, 0);
        assert_eq!(view.countdown_remaining_ms, 0);
        assert_eq!(view.time_left_secs, 0);
    }

    #[test]
    fn test_project_finished_round_carries_outcome() {
        let mut round = Round::new(2, 0);
        round.status = RoundStatus::Finished;
        round.winner_id = Some(3);
        round.draw_value = Some(42.5);
        round.finished_at_ms = Some(50_000);

        let view = project(&round, &[entry(1, 3, 5)], 60_000, &Lifecycle::default(), 5);
        assert_eq!(view.winner_id, Some(3));
        assert_eq!(view.draw_value, Some(42.5));
        assert_eq!(view.finished_at_ms, Some(50_000));
    }
}
