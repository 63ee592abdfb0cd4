use std::collections::BTreeMap;

use crate::datasets::UserId;
use crate::error::{LfdaeError, Result};
use crate::random::RandomState;

pub type UserEvents = BTreeMap<UserId, Vec<usize>>;

/// Holds out `round(n * test_fraction)` of each user's events, chosen at random,
/// while leaving every user at least one training event. Users with nothing
/// held out do not appear in the test map.
pub fn split_user_events(
    user_events: &UserEvents,
    test_fraction: f64,
    random_state: &mut RandomState,
) -> Result<(UserEvents, UserEvents)> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(LfdaeError::Config(format!(
            "test fraction must lie in [0, 1), got {}",
            test_fraction
        )));
    }

    let mut train = UserEvents::new();
    let mut test = UserEvents::new();
    for (&user, events) in user_events {
        if events.is_empty() {
            continue;
        }
        let mut shuffled = events.clone();
        random_state.shuffle(&mut shuffled)?;
        let held_out = ((events.len() as f64 * test_fraction).round() as usize).min(events.len() - 1);
        let cutoff = events.len() - held_out;

        let mut held = shuffled.split_off(cutoff);
        shuffled.sort_unstable();
        train.insert(user, shuffled);
        if !held.is_empty() {
            held.sort_unstable();
            test.insert(user, held);
        }
    }
    Ok((train, test))
}
