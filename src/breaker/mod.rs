// Circuit breaking module
// Author: kelexine (https://github.com/kelexine)

pub mod circuit;
pub mod registry;

pub use circuit::{
    BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, FailurePredicate,
    TransitionListener, REQUIRED_HALF_OPEN_SUCCESSES,
};
pub use registry::BreakerRegistry;
