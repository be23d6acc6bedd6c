// Per-origin breaker registry
// Author: kelexine (https://github.com/kelexine)

use super::circuit::{BreakerConfig, BreakerSnapshot, CircuitBreaker, TransitionListener};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps a logical upstream name to its breaker.
///
/// Constructed once by the composition root; every breaker it hands out
/// shares the registry's config and transition listener.
pub struct BreakerRegistry {
    config: BreakerConfig,
    listener: Option<TransitionListener>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            listener: None,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(upstream = name, "Creating circuit breaker");
                let mut breaker = CircuitBreaker::new(name, self.config.clone());
                if let Some(listener) = &self.listener {
                    breaker = breaker.with_listener(listener.clone());
                }
                Arc::new(breaker)
            })
            .clone()
    }

    /// Snapshots of every breaker, ordered by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> = self.breakers.read().values().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use parking_lot::Mutex;

    #[test]
    fn test_same_name_same_breaker() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get_or_create("primary");
        let b = registry.get_or_create("primary");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &registry.get_or_create("mirror")));
    }

    #[tokio::test]
    async fn test_listener_sees_transitions() {
        let seen: Arc<Mutex<Vec<(String, CircuitState)>>> = Arc::default();
        let sink = seen.clone();
        let registry = BreakerRegistry::new(BreakerConfig::new(1, std::time::Duration::from_secs(5)))
            .with_listener(Arc::new(move |name: &str, state: CircuitState| sink.lock().push((name.to_string(), state))));

        registry.get_or_create("primary").record_failure();

        assert_eq!(*seen.lock(), vec![("primary".to_string(), CircuitState::Open)]);
    }
}
