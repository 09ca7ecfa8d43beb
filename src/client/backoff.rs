//! Reconnection backoff.
//!
//! [`Backoff`] computes exponentially growing, optionally jittered delays.
//! [`Reconnector`] wraps it in a small state machine that the manager
//! drives with [`ReconnectInput`]s and answers with [`ReconnectAction`]s.
//!
//! # Transitions
//!
//! | State | Input | Next | Action |
//! |-------|-------|------|--------|
//! | Idle | Disconnected | Waiting | Schedule |
//! | Idle | Disconnected (budget spent) | Idle | GiveUp |
//! | Waiting | TimerFired | Attempting | Attempt |
//! | Attempting | AttemptFailed | Waiting | Schedule |
//! | Attempting | AttemptFailed (budget spent) | Idle | GiveUp |
//! | Attempting | AttemptSucceeded | Idle | Reconnected |
//! | any | Cancel | Idle | none |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::{debug, trace};

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    ms: u64,
    max: u64,
    factor: u32,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff with factor 2.
    ///
    /// `jitter` is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            ms: min.as_millis() as u64,
            max: max.as_millis() as u64,
            factor: 2,
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
            attempts: 0,
        }
    }

    /// Returns the next delay and counts one attempt.
    pub fn duration(&mut self) -> Duration {
        let mut ms = self.ms as f64 * f64::from(self.factor).powf(f64::from(self.attempts));
        self.attempts = self.attempts.saturating_add(1);

        if self.jitter > 0.0 {
            let rand: f64 = rand::random();
            let deviation = (rand * self.jitter * ms).floor();
            ms = if ((rand * 10.0).floor() as u64) & 1 == 0 {
                ms - deviation
            } else {
                ms + deviation
            };
        }

        Duration::from_millis(ms.min(self.max as f64).max(0.0) as u64)
    }

    /// Resets the attempt counter.
    #[inline]
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts counted since the last reset.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

// ============================================================================
// Reconnector
// ============================================================================

/// Reconnection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Not reconnecting.
    Idle,
    /// Waiting for the backoff delay.
    Waiting,
    /// A reconnection attempt is opening.
    Attempting,
}

/// Stimulus fed to the reconnector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectInput {
    /// The connection was lost.
    Disconnected,
    /// The backoff delay elapsed.
    TimerFired,
    /// The attempt failed.
    AttemptFailed,
    /// The attempt opened a connection.
    AttemptSucceeded,
    /// Reconnection was called off.
    Cancel,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Arm the reconnection timer.
    Schedule {
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Open a new connection.
    Attempt {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Stop retrying; the budget is spent.
    GiveUp,
    /// The connection was restored.
    Reconnected {
        /// Number of attempts it took.
        attempt: u32,
    },
}

/// Reconnection state machine.
#[derive(Debug, Clone)]
pub struct Reconnector {
    backoff: Backoff,
    max_attempts: Option<u32>,
    state: ReconnectState,
}

impl Reconnector {
    /// Creates an idle reconnector; `None` retries forever.
    #[must_use]
    pub fn new(backoff: Backoff, max_attempts: Option<u32>) -> Self {
        Self {
            backoff,
            max_attempts,
            state: ReconnectState::Idle,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Returns `true` unless idle.
    #[inline]
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.state != ReconnectState::Idle
    }

    /// Attempts counted so far.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Resets the backoff without changing state.
    pub fn reset_backoff(&mut self) {
        self.backoff.reset();
    }

    fn schedule(&mut self) -> Option<ReconnectAction> {
        if self
            .max_attempts
            .is_some_and(|max| self.backoff.attempts() >= max)
        {
            debug!(attempts = self.backoff.attempts(), "Reconnection attempts exhausted");
            self.backoff.reset();
            self.state = ReconnectState::Idle;
            return Some(ReconnectAction::GiveUp);
        }

        let delay = self.backoff.duration();
        debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.attempts(),
            "Reconnect scheduled"
        );
        self.state = ReconnectState::Waiting;
        Some(ReconnectAction::Schedule { delay })
    }

    /// Applies one input.
    pub fn transition(&mut self, input: ReconnectInput) -> Option<ReconnectAction> {
        use ReconnectState as S;

        match (self.state, input) {
            (_, ReconnectInput::Cancel) => {
                self.state = S::Idle;
                self.backoff.reset();
                None
            }

            (S::Idle, ReconnectInput::Disconnected)
            | (S::Attempting, ReconnectInput::AttemptFailed) => self.schedule(),

            (S::Waiting, ReconnectInput::TimerFired) => {
                self.state = S::Attempting;
                Some(ReconnectAction::Attempt {
                    attempt: self.backoff.attempts(),
                })
            }

            (S::Attempting, ReconnectInput::AttemptSucceeded) => {
                let attempt = self.backoff.attempts();
                self.backoff.reset();
                self.state = S::Idle;
                Some(ReconnectAction::Reconnected { attempt })
            }

            (state, input) => {
                trace!(?state, ?input, "Reconnect input ignored");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_delays_grow_until_max() {
        let mut backoff = Backoff::new(ms(100), ms(1000), 0.0);
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.duration().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000, 1000]);
        assert_eq!(backoff.attempts(), 7);

        backoff.reset();
        assert_eq!(backoff.duration(), ms(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(ms(1000), ms(100_000), 0.5);
        for _ in 0..100 {
            backoff.reset();
            let delay = backoff.duration().as_millis() as u64;
            assert!((500..=1500).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_large_attempt_counts_saturate() {
        let mut backoff = Backoff::new(ms(100), ms(5000), 0.0);
        for _ in 0..2000 {
            backoff.duration();
        }
        assert_eq!(backoff.duration(), ms(5000));
    }

    #[test]
    fn test_reconnector_gives_up_once() {
        let mut reconnector = Reconnector::new(Backoff::new(ms(100), ms(1000), 0.0), Some(3));
        let mut actions = Vec::new();

        actions.push(reconnector.transition(ReconnectInput::Disconnected));
        for _ in 0..3 {
            actions.push(reconnector.transition(ReconnectInput::TimerFired));
            actions.push(reconnector.transition(ReconnectInput::AttemptFailed));
        }

        assert_eq!(
            actions,
            vec![
                Some(ReconnectAction::Schedule { delay: ms(100) }),
                Some(ReconnectAction::Attempt { attempt: 1 }),
                Some(ReconnectAction::Schedule { delay: ms(200) }),
                Some(ReconnectAction::Attempt { attempt: 2 }),
                Some(ReconnectAction::Schedule { delay: ms(400) }),
                Some(ReconnectAction::Attempt { attempt: 3 }),
                Some(ReconnectAction::GiveUp),
            ]
        );
        assert_eq!(reconnector.state(), ReconnectState::Idle);
        assert_eq!(reconnector.attempts(), 0);

        assert_eq!(reconnector.transition(ReconnectInput::AttemptFailed), None);
        assert_eq!(reconnector.transition(ReconnectInput::TimerFired), None);
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut reconnector = Reconnector::new(Backoff::new(ms(100), ms(1000), 0.0), None);
        reconnector.transition(ReconnectInput::Disconnected);
        reconnector.transition(ReconnectInput::TimerFired);
        reconnector.transition(ReconnectInput::AttemptFailed);
        reconnector.transition(ReconnectInput::TimerFired);
        assert_eq!(
            reconnector.transition(ReconnectInput::AttemptSucceeded),
            Some(ReconnectAction::Reconnected { attempt: 2 })
        );
        assert!(!reconnector.is_reconnecting());
        assert_eq!(
            reconnector.transition(ReconnectInput::Disconnected),
            Some(ReconnectAction::Schedule { delay: ms(100) })
        );
    }

    #[test]
    fn test_disconnect_while_reconnecting_is_ignored() {
        let mut reconnector = Reconnector::new(Backoff::new(ms(100), ms(1000), 0.0), None);
        reconnector.transition(ReconnectInput::Disconnected);
        assert_eq!(reconnector.transition(ReconnectInput::Disconnected), None);
        assert_eq!(reconnector.state(), ReconnectState::Waiting);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut reconnector = Reconnector::new(Backoff::new(ms(100), ms(1000), 0.0), None);
        reconnector.transition(ReconnectInput::Disconnected);
        reconnector.transition(ReconnectInput::TimerFired);
        assert_eq!(reconnector.transition(ReconnectInput::Cancel), None);
        assert_eq!(reconnector.state(), ReconnectState::Idle);
        assert_eq!(reconnector.attempts(), 0);
        assert_eq!(reconnector.transition(ReconnectInput::AttemptSucceeded), None);
    }
}
