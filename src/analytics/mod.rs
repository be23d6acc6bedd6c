// Request analytics module
// Author: kelexine (https://github.com/kelexine)

pub mod models;
pub mod tracker;

pub use models::{ContentStats, GlobalStats};
pub use tracker::AnalyticsTracker;
