//! Per-origin circuit breaker.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: origin assumed down, calls fail fast
//! - HalfOpen: probing whether the origin recovered
//!
//! # Transitions
//! ```text
//! Closed   -> Open:     qualifying failure brings failure_count to threshold
//! Open     -> HalfOpen: next call attempt after recovery_timeout since last failure
//! HalfOpen -> Closed:   required_half_open_successes consecutive successes
//! HalfOpen -> Open:     qualifying failure while failure_count >= threshold
//! ```
//!
//! `failure_count` is only ever cleared by a success in Closed or by the
//! HalfOpen -> Closed transition. Entering HalfOpen leaves it at or above the
//! threshold, so any failed probe pushes it further past the threshold and
//! reopens the breaker through the ordinary failure path.
//!
//! Recovery is evaluated lazily when a caller asks to pass; there is no
//! timer task.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use parking_lot::Mutex;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Probes needed in HalfOpen before closing.
pub const REQUIRED_HALF_OPEN_SUCCESSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric level for gauges.
    pub fn level(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Decides whether an error is "expected" (client-side) and therefore must
/// not count against the origin's health.
pub type FailurePredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Called after every state transition with the breaker name and new state.
pub type TransitionListener = Arc<dyn Fn(&str, CircuitState) + Send + Sync>;

#[derive(Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub required_half_open_successes: u32,
    pub is_expected_failure: FailurePredicate,
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            required_half_open_successes: REQUIRED_HALF_OPEN_SUCCESSES,
            is_expected_failure: Arc::new(|_: &(dyn StdError + 'static)| false),
        }
    }

    pub fn with_expected_failure(mut self, predicate: FailurePredicate) -> Self {
        self.is_expected_failure = predicate;
        self
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("required_half_open_successes", &self.required_half_open_successes)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit for '{name}' is open, retry in {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Counters {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Remaining recovery time while open, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    counters: Mutex<Counters>,
    listener: Option<TransitionListener>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            counters: Mutex::new(Counters {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.counters.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.counters.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.counters.lock().success_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let c = self.counters.lock();
        let retry_after_ms = match (c.state, c.last_failure_at) {
            (CircuitState::Open, Some(at)) => Some(
                self.config
                    .recovery_timeout
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state: c.state,
            failure_count: c.failure_count,
            success_count: c.success_count,
            retry_after_ms,
        }
    }

    /// Asks permission to call the origin.
    ///
    /// While Open and still inside the recovery window, returns the remaining
    /// recovery time. Once the window has elapsed the breaker moves to
    /// HalfOpen and the call is admitted.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let transitioned = {
            let mut c = self.counters.lock();
            if c.state != CircuitState::Open {
                return Ok(());
            }
            let elapsed = c
                .last_failure_at
                .map(|at| at.elapsed())
                .unwrap_or(self.config.recovery_timeout);
            if elapsed < self.config.recovery_timeout {
                return Err(self.config.recovery_timeout - elapsed);
            }
            // failure_count deliberately kept: see module docs.
            c.state = CircuitState::HalfOpen;
            c.success_count = 0;
            CircuitState::HalfOpen
        };
        self.notify(transitioned);
        Ok(())
    }

    pub fn record_success(&self) {
        let transitioned = {
            let mut c = self.counters.lock();
            match c.state {
                CircuitState::Closed => {
                    c.failure_count = 0;
                    None
                }
                // failure_count stays put until the breaker closes, so any
                // failed probe reopens it.
                CircuitState::HalfOpen => {
                    c.success_count += 1;
                    if c.success_count >= self.config.required_half_open_successes {
                        c.state = CircuitState::Closed;
                        c.failure_count = 0;
                        c.success_count = 0;
                        Some(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A straggler admitted before the breaker opened says nothing
                // about the origin's recovery.
                CircuitState::Open => None,
            }
        };
        if let Some(state) = transitioned {
            self.notify(state);
        }
    }

    pub fn record_failure(&self) {
        let transitioned = {
            let mut c = self.counters.lock();
            c.failure_count = c.failure_count.saturating_add(1);
            c.success_count = 0;
            c.last_failure_at = Some(Instant::now());
            if c.state != CircuitState::Open && c.failure_count >= self.config.failure_threshold {
                c.state = CircuitState::Open;
                Some(CircuitState::Open)
            } else {
                None
            }
        };
        if let Some(state) = transitioned {
            self.notify(state);
        }
    }

    /// Runs `call` under the breaker.
    ///
    /// Fails fast with [`BreakerError::Open`] without invoking `call` while
    /// the breaker is open. Otherwise the outcome is classified and the
    /// original error is handed back inside [`BreakerError::Inner`].
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + 'static,
    {
        if let Err(retry_after) = self.try_acquire() {
            return Err(BreakerError::Open {
                name: self.name.clone(),
                retry_after,
            });
        }

        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                let err: &(dyn StdError + 'static) = &e;
                if !(self.config.is_expected_failure)(err) {
                    self.record_failure();
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn notify(&self, state: CircuitState) {
        match state {
            CircuitState::Open => warn!(upstream = %self.name, "Circuit OPEN"),
            CircuitState::HalfOpen => info!(upstream = %self.name, "Circuit HALF_OPEN, probing"),
            CircuitState::Closed => info!(upstream = %self.name, "Circuit CLOSED"),
        }
        if let Some(listener) = &self.listener {
            listener(&self.name, state);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("counters", &*self.counters.lock())
            .finish_non_exhaustive()
    }
}
