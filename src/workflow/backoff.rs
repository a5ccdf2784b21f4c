// src/workflow/backoff.rs

//! Retry bookkeeping for failed task starts.
//!
//! Exponential intervals grow from the interval stored on the task, so the
//! curve carries across processing cycles instead of restarting at
//! `initial_interval` every time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::model::{BackoffPolicy, RetrySettings, RetryState};
use crate::types::{elapsed_since, time_after};

/// Unlimited when `max_attempts == 0`.
pub fn can_retry(settings: &RetrySettings, state: &RetryState) -> bool {
    settings.max_attempts == 0 || state.attempt < settings.max_attempts
}

/// The retry state after one more failure at `now`, or `None` when the
/// policy's elapsed-time budget is spent.
pub fn next_backoff_state(
    settings: &RetrySettings,
    state: &RetryState,
    now: DateTime<Utc>,
) -> Option<RetryState> {
    next_backoff_state_with(settings, state, now, &mut rand::thread_rng())
}

pub fn next_backoff_state_with<R: Rng + ?Sized>(
    settings: &RetrySettings,
    state: &RetryState,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Option<RetryState> {
    let first_failure_at = state.first_failure_at.unwrap_or(now);

    let (interval, wait) = match &settings.policy {
        BackoffPolicy::Constant { interval } => (interval.0, interval.0),
        BackoffPolicy::Exponential {
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
        } => {
            if !max_elapsed_time.0.is_zero()
                && elapsed_since(first_failure_at, now) > max_elapsed_time.0
            {
                return None;
            }

            let interval = if state.interval.is_zero() {
                initial_interval.0
            } else {
                state.interval.mul_f64(multiplier.max(1.0))
            };
            let interval = interval.min(max_interval.0);
            (interval, randomize(interval, *randomization_factor, rng))
        }
    };

    Some(RetryState {
        attempt: state.attempt + 1,
        interval,
        next_attempt_at: Some(time_after(now, wait)),
        first_failure_at: Some(first_failure_at),
    })
}

/// Uniform pick from `[interval * (1 - f), interval * (1 + f)]`.
fn randomize<R: Rng + ?Sized>(interval: Duration, factor: f64, rng: &mut R) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 {
        return interval;
    }
    let delta = interval.as_secs_f64() * factor;
    let low = interval.as_secs_f64() - delta;
    let high = interval.as_secs_f64() + delta;
    Duration::from_secs_f64(rng.gen_range(low..=high).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HumanDuration;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn exponential(max_elapsed: u64) -> RetrySettings {
        RetrySettings {
            policy: BackoffPolicy::Exponential {
                initial_interval: HumanDuration::from_secs(10),
                max_interval: HumanDuration::from_secs(300),
                max_elapsed_time: HumanDuration::from_secs(max_elapsed),
                multiplier: 2.0,
                randomization_factor: 0.0,
            },
            max_attempts: 0,
        }
    }

    #[test]
    fn attempts_are_bounded_unless_zero() {
        let mut settings = RetrySettings::default();
        let mut state = RetryState::default();
        assert!(can_retry(&settings, &state));

        settings.max_attempts = 2;
        state.attempt = 1;
        assert!(can_retry(&settings, &state));
        state.attempt = 2;
        assert!(!can_retry(&settings, &state));
    }

    #[test]
    fn exponential_interval_grows_from_stored_state_and_caps() {
        let settings = exponential(0);
        let now = Utc::now();
        let mut state = RetryState::default();
        let mut seen = Vec::new();
        for _ in 0..7 {
            state = next_backoff_state(&settings, &state, now).unwrap();
            seen.push(state.interval.as_secs());
        }
        assert_eq!(seen, vec![10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(state.attempt, 7);
        assert_eq!(state.first_failure_at, Some(now));
    }

    #[test]
    fn jitter_stays_within_factor() {
        let mut settings = exponential(0);
        if let BackoffPolicy::Exponential {
            randomization_factor,
            ..
        } = &mut settings.policy
        {
            *randomization_factor = 0.5;
        }
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let next =
                next_backoff_state_with(&settings, &RetryState::default(), now, &mut rng).unwrap();
            let wait = (next.next_attempt_at.unwrap() - now).num_milliseconds();
            assert!((5_000..=15_000).contains(&wait), "wait {wait}ms out of range");
        }
    }

    #[test]
    fn gives_up_after_max_elapsed_time() {
        let settings = exponential(60);
        let now = Utc::now();
        let state = RetryState {
            attempt: 3,
            interval: Duration::from_secs(40),
            next_attempt_at: None,
            first_failure_at: Some(now - chrono::Duration::seconds(61)),
        };
        assert_eq!(next_backoff_state(&settings, &state, now), None);
    }

    #[test]
    fn constant_policy_uses_fixed_interval() {
        let settings = RetrySettings {
            policy: BackoffPolicy::Constant {
                interval: HumanDuration::from_secs(5),
            },
            max_attempts: 3,
        };
        let now = Utc::now();
        let first = next_backoff_state(&settings, &RetryState::default(), now).unwrap();
        let second = next_backoff_state(&settings, &first, now).unwrap();
        assert_eq!(second.interval, Duration::from_secs(5));
        assert_eq!(second.next_attempt_at, Some(now + chrono::Duration::seconds(5)));
        assert_eq!(second.attempt, 2);
    }
}
