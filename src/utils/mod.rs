//! Utility functions and helpers for the blobgate gateway.
//!
//! This module provides cross-cutting concerns shared by the pipeline
//! components.
//!
//! # Submodules
//!
//! - `clock`: Injectable wall-clock source for TTL and recency decisions.
//! - `logging`: Tracing initialization and URL redaction for logs.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
