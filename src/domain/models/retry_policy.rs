//! `RetryPolicy` data model: a `StopCondition` tree composed with a
//! `WaitPolicy` tree (spec §3, §4.2). Parsing lives in
//! `domain::services::retry_policy_parser`; this module only holds the
//! value types and their evaluation semantics.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum StopCondition {
    Never,
    AfterAttempt(u32),
    AfterDelay(Duration),
    WhenEventSet(String),
    Any(Vec<StopCondition>),
    All(Vec<StopCondition>),
    Or(Box<StopCondition>, Box<StopCondition>),
    And(Box<StopCondition>, Box<StopCondition>),
}

impl StopCondition {
    /// `attempt` is 1-based; `elapsed` is time since the first attempt;
    /// `event_set` resolves named events (e.g. a cooperative cancel flag).
    pub fn should_stop(
        &self,
        attempt: u32,
        elapsed: Duration,
        event_set: &dyn Fn(&str) -> bool,
    ) -> bool {
        match self {
            StopCondition::Never => false,
            StopCondition::AfterAttempt(n) => attempt >= *n,
            StopCondition::AfterDelay(d) => elapsed >= *d,
            StopCondition::WhenEventSet(name) => event_set(name),
            StopCondition::Any(conds) => conds.iter().any(|c| c.should_stop(attempt, elapsed, event_set)),
            StopCondition::All(conds) => conds.iter().all(|c| c.should_stop(attempt, elapsed, event_set)),
            StopCondition::Or(a, b) => {
                a.should_stop(attempt, elapsed, event_set) || b.should_stop(attempt, elapsed, event_set)
            }
            StopCondition::And(a, b) => {
                a.should_stop(attempt, elapsed, event_set) && b.should_stop(attempt, elapsed, event_set)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitPolicy {
    None,
    Fixed(Duration),
    Random(Duration, Duration),
    Incrementing(Duration, Duration),
    Exponential { multiplier: f64, min: Duration, max: Duration },
    RandomExponential { multiplier: f64, max: Duration },
    Combine(Vec<WaitPolicy>),
    Chain(Vec<WaitPolicy>),
    Add(Box<WaitPolicy>, Box<WaitPolicy>),
}

impl WaitPolicy {
    /// `attempt` is 1-based (the attempt that just failed); `rand01` yields a
    /// caller-supplied uniform sample in `[0, 1)` so this stays deterministic
    /// in tests.
    pub fn next_wait(&self, attempt: u32, rand01: &dyn Fn() -> f64) -> Duration {
        match self {
            WaitPolicy::None => Duration::ZERO,
            WaitPolicy::Fixed(d) => *d,
            WaitPolicy::Random(lo, hi) => {
                let span = hi.saturating_sub(*lo).as_secs_f64();
                *lo + Duration::from_secs_f64(span * rand01())
            }
            WaitPolicy::Incrementing(start, inc) => {
                *start + *inc * attempt.saturating_sub(1)
            }
            WaitPolicy::Exponential { multiplier, min, max } => {
                let secs = multiplier * 2f64.powi(attempt.saturating_sub(1) as i32);
                let d = Duration::from_secs_f64(secs.max(0.0));
                d.clamp(*min, *max)
            }
            WaitPolicy::RandomExponential { multiplier, max } => {
                let secs = multiplier * 2f64.powi(attempt.saturating_sub(1) as i32);
                let d = Duration::from_secs_f64((secs * rand01()).max(0.0));
                d.min(*max)
            }
            WaitPolicy::Combine(parts) => parts
                .iter()
                .map(|p| p.next_wait(attempt, rand01))
                .fold(Duration::ZERO, |acc, d| acc + d),
            WaitPolicy::Chain(parts) => {
                let idx = (attempt.saturating_sub(1) as usize).min(parts.len().saturating_sub(1));
                parts.get(idx).map(|p| p.next_wait(attempt, rand01)).unwrap_or(Duration::ZERO)
            }
            WaitPolicy::Add(a, b) => a.next_wait(attempt, rand01) + b.next_wait(attempt, rand01),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub stop: StopCondition,
    pub wait: WaitPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            stop: StopCondition::AfterAttempt(1),
            wait: WaitPolicy::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_attempt_stops_at_threshold() {
        let stop = StopCondition::AfterAttempt(5);
        let no_event = |_: &str| false;
        assert!(!stop.should_stop(4, Duration::ZERO, &no_event));
        assert!(stop.should_stop(5, Duration::ZERO, &no_event));
    }

    #[test]
    fn fixed_wait_ignores_attempt() {
        let wait = WaitPolicy::Fixed(Duration::from_secs(3));
        let rand = || 0.5;
        assert_eq!(wait.next_wait(1, &rand), Duration::from_secs(3));
        assert_eq!(wait.next_wait(10, &rand), Duration::from_secs(3));
    }

    #[test]
    fn incrementing_wait_grows_linearly() {
        let wait = WaitPolicy::Incrementing(Duration::from_secs(1), Duration::from_secs(2));
        let rand = || 0.0;
        assert_eq!(wait.next_wait(1, &rand), Duration::from_secs(1));
        assert_eq!(wait.next_wait(3, &rand), Duration::from_secs(5));
    }

    #[test]
    fn and_or_combinators() {
        let no_event = |_: &str| false;
        let never = StopCondition::Never;
        let after1 = StopCondition::AfterAttempt(1);
        let or = StopCondition::Or(Box::new(never.clone()), Box::new(after1.clone()));
        assert!(or.should_stop(1, Duration::ZERO, &no_event));
        let and = StopCondition::And(Box::new(never), Box::new(after1));
        assert!(!and.should_stop(1, Duration::ZERO, &no_event));
    }
}
