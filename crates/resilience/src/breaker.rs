use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// Sliding-window circuit breaker.
///
/// Counts the outcome of the last `window_size` calls. Once the window is
/// full and the failure rate exceeds the threshold the breaker opens and
/// rejects calls until the cooldown elapses, after which a single probe call
/// is let through. The probe's outcome decides between closing again and
/// another open period.
pub struct CircuitBreaker {
    name: String,
    window_size: usize,
    failure_rate_threshold: f64,
    cooldown: Duration,
    state: Mutex<State>,
}

enum State {
    Closed { outcomes: VecDeque<bool> },
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        window_size: usize,
        failure_rate_threshold: f64,
        cooldown: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            window_size: window_size.max(1),
            failure_rate_threshold,
            cooldown,
            state: Mutex::new(State::Closed {
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Whether a call may proceed right now. Transitions Open → HalfOpen
    /// once the cooldown has elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { .. } => true,
            State::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    tracing::info!(policy = %self.name, "Circuit breaker half-open, probing");
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    false
                } else {
                    *probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { outcomes } => {
                Self::push(outcomes, self.window_size, true);
            }
            State::HalfOpen { .. } => {
                tracing::info!(policy = %self.name, "Circuit breaker closed after successful probe");
                *state = State::Closed {
                    outcomes: VecDeque::new(),
                };
            }
            State::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { outcomes } => {
                Self::push(outcomes, self.window_size, false);
                if outcomes.len() >= self.window_size {
                    let failures = outcomes.iter().filter(|ok| !**ok).count();
                    let rate = failures as f64 / outcomes.len() as f64;
                    if rate > self.failure_rate_threshold {
                        tracing::warn!(
                            policy = %self.name,
                            failure_rate = rate,
                            "Circuit breaker opened"
                        );
                        *state = State::Open {
                            since: Instant::now(),
                        };
                    }
                }
            }
            State::HalfOpen { .. } => {
                tracing::warn!(policy = %self.name, "Probe failed, circuit breaker re-opened");
                *state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), State::Open { since } if since.elapsed() < self.cooldown)
    }

    fn push(outcomes: &mut VecDeque<bool>, window_size: usize, outcome: bool) {
        if outcomes.len() == window_size {
            outcomes.pop_front();
        }
        outcomes.push_back(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", 4, 0.5, cooldown)
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = breaker(Duration::from_secs(30));

        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();

        assert!(breaker.try_acquire());
    }

    #[test]
    fn opens_once_failure_rate_exceeds_threshold() {
        let breaker = breaker(Duration::from_secs(30));

        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();

        assert!(!breaker.try_acquire());
        assert!(breaker.is_open());
    }

    #[test]
    fn half_open_allows_single_probe_then_closes_on_success() {
        let breaker = breaker(Duration::ZERO);
        for _ in 0..4 {
            breaker.record_failure();
        }

        // Cooldown of zero: the first acquire is the probe, the second must
        // wait for its outcome.
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());

        breaker.record_success();
        assert!(breaker.try_acquire());
        assert!(breaker.try_acquire());
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = breaker(Duration::ZERO);
        for _ in 0..4 {
            breaker.record_failure();
        }

        assert!(breaker.try_acquire());
        breaker.record_failure();

        // Re-opened with a fresh cooldown of zero, so the next acquire is a
        // new probe rather than a closed-state pass.
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn window_slides_over_old_outcomes() {
        let breaker = breaker(Duration::from_secs(30));
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        let fresh = CircuitBreaker::new("fresh", 4, 0.5, Duration::from_secs(30));
        fresh.record_failure();
        fresh.record_failure();
        for _ in 0..4 {
            fresh.record_success();
        }
        assert!(fresh.try_acquire());
    }
}
