// Fetch pipeline module
// Author: kelexine (https://github.com/kelexine)

pub mod events;
pub mod orchestrator;

pub use events::{CacheEvent, EventBus, EventKind};
pub use orchestrator::{validate_id, FetchOrchestrator, FetchOutcome, CACHE_SOURCE};
