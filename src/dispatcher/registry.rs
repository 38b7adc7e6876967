//! Processor registry and market ownership tables
//!
//! Both tables live behind a single lock: the registration table
//! (server key to URI and owned markets) and the assignment table (market to
//! owning server key). Every mutation updates both under one write guard, so
//! no reader can see a market owned by zero or two processors mid-transition.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::{MarketId, ProcessorSummary};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One registered processor
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub uri: String,
    pub markets: BTreeSet<MarketId>,
    pub registered_at: DateTime<Utc>,
}

/// Current owner of a market
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketOwner {
    pub server_key: String,
    pub uri: String,
}

/// Result of a registration call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    /// The key was already registered; its URI was refreshed and its markets
    /// kept
    Refreshed,
}

/// Result of committing an assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentChange {
    pub market_id: MarketId,
    pub owner: MarketOwner,
    /// Processor that owned the market before, if any and different
    pub previous: Option<MarketOwner>,
    /// The target already owned the market; nothing moved
    pub unchanged: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    processors: HashMap<String, Registration>,
    assignments: HashMap<MarketId, String>,
}

/// Thread-safe registry shared by every dispatcher request
#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a processor, or refresh the URI of an existing registration
    /// while keeping its markets
    pub fn register(&self, server_key: &str, uri: &str) -> RegistrationOutcome {
        let mut state = self.write();
        match state.processors.get_mut(server_key) {
            Some(existing) => {
                existing.uri = uri.to_string();
                RegistrationOutcome::Refreshed
            }
            None => {
                state.processors.insert(
                    server_key.to_string(),
                    Registration {
                        uri: uri.to_string(),
                        markets: BTreeSet::new(),
                        registered_at: Utc::now(),
                    },
                );
                RegistrationOutcome::Registered
            }
        }
    }

    /// Remove a processor. Its markets become unassigned and are returned.
    pub fn unregister(&self, server_key: &str) -> Option<Vec<MarketId>> {
        let mut state = self.write();
        let registration = state.processors.remove(server_key)?;
        for market_id in &registration.markets {
            state.assignments.remove(market_id);
        }
        let orphaned: Vec<MarketId> = registration.markets.into_iter().collect();
        Some(orphaned)
    }

    pub fn is_registered(&self, server_key: &str) -> bool {
        self.read().processors.contains_key(server_key)
    }

    pub fn get(&self, server_key: &str) -> Option<Registration> {
        self.read().processors.get(server_key).cloned()
    }

    /// All registrations, ordered by server key
    pub fn processors(&self) -> Vec<ProcessorSummary> {
        let state = self.read();
        let mut summaries: Vec<ProcessorSummary> = state
            .processors
            .iter()
            .map(|(key, registration)| summary(key, registration))
            .collect();
        summaries.sort_by(|a, b| a.server_key.cmp(&b.server_key));
        summaries
    }

    /// Registrations that own no market
    pub fn unassigned_processors(&self) -> Vec<ProcessorSummary> {
        self.processors()
            .into_iter()
            .filter(|processor| processor.markets.is_empty())
            .collect()
    }

    pub fn owner_of(&self, market_id: MarketId) -> Option<MarketOwner> {
        let state = self.read();
        let server_key = state.assignments.get(&market_id)?;
        let registration = state.processors.get(server_key)?;
        Some(MarketOwner {
            server_key: server_key.clone(),
            uri: registration.uri.clone(),
        })
    }

    pub fn markets_of(&self, server_key: &str) -> Option<Vec<MarketId>> {
        self.read()
            .processors
            .get(server_key)
            .map(|registration| registration.markets.iter().copied().collect())
    }

    /// Move a market to `server_key` in one step.
    ///
    /// Fails with an assignment conflict when the target is not registered;
    /// the tables are left untouched in that case.
    pub fn assign(&self, server_key: &str, market_id: MarketId) -> CoordinatorResult<AssignmentChange> {
        let mut state = self.write();
        let uri = match state.processors.get(server_key) {
            Some(registration) => registration.uri.clone(),
            None => return Err(CoordinatorError::assignment_conflict(server_key, market_id)),
        };

        let previous_key = state.assignments.insert(market_id, server_key.to_string());
        let unchanged = previous_key.as_deref() == Some(server_key);
        let previous = match previous_key {
            Some(previous_key) if previous_key != server_key => {
                let previous_uri = state.processors.get_mut(&previous_key).map(|registration| {
                    registration.markets.remove(&market_id);
                    registration.uri.clone()
                });
                previous_uri.map(|uri| MarketOwner {
                    server_key: previous_key,
                    uri,
                })
            }
            _ => None,
        };

        if let Some(registration) = state.processors.get_mut(server_key) {
            registration.markets.insert(market_id);
        }
        Ok(AssignmentChange {
            market_id,
            owner: MarketOwner {
                server_key: server_key.to_string(),
                uri,
            },
            previous,
            unchanged,
        })
    }

    /// Undo a committed assignment if the tables still reflect it.
    ///
    /// The market goes back to its previous owner when that processor is
    /// still registered, otherwise it becomes unassigned. Returns false when
    /// a later change already superseded the assignment or the change moved
    /// nothing.
    pub fn revert(&self, change: &AssignmentChange) -> bool {
        if change.unchanged {
            return false;
        }
        let mut state = self.write();
        let market_id = change.market_id;
        if state.assignments.get(&market_id) != Some(&change.owner.server_key) {
            return false;
        }

        if let Some(registration) = state.processors.get_mut(&change.owner.server_key) {
            registration.markets.remove(&market_id);
        }
        state.assignments.remove(&market_id);

        if let Some(previous) = &change.previous {
            if let Some(registration) = state.processors.get_mut(&previous.server_key) {
                registration.markets.insert(market_id);
                state
                    .assignments
                    .insert(market_id, previous.server_key.clone());
            }
        }
        true
    }

    /// Check that both tables agree. Returns a description of the first
    /// disagreement found.
    pub fn verify_consistency(&self) -> Result<(), String> {
        let state = self.read();
        for (market_id, owner) in &state.assignments {
            match state.processors.get(owner) {
                Some(registration) if registration.markets.contains(market_id) => {}
                Some(_) => {
                    return Err(format!("market {market_id} assigned to '{owner}' but missing from its set"))
                }
                None => {
                    return Err(format!("market {market_id} assigned to unregistered '{owner}'"))
                }
            }
        }
        for (server_key, registration) in &state.processors {
            for market_id in &registration.markets {
                if state.assignments.get(market_id) != Some(server_key) {
                    return Err(format!(
                        "'{server_key}' lists market {market_id} it does not own"
                    ));
                }
            }
        }
        Ok(())
    }
}

fn summary(server_key: &str, registration: &Registration) -> ProcessorSummary {
    ProcessorSummary {
        server_key: server_key.to_string(),
        uri: registration.uri.clone(),
        markets: registration.markets.iter().copied().collect(),
        registered_at: registration.registered_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reregistration_keeps_markets() {
        let registry = ProcessorRegistry::new();
        assert_eq!(
            registry.register("proc-a", "http://a:9100"),
            RegistrationOutcome::Registered
        );
        registry.assign("proc-a", 1).unwrap();

        assert_eq!(
            registry.register("proc-a", "http://a2:9100"),
            RegistrationOutcome::Refreshed
        );
        assert_eq!(registry.markets_of("proc-a"), Some(vec![1]));
        assert_eq!(registry.owner_of(1).unwrap().uri, "http://a2:9100");
    }

    #[test]
    fn test_unregister_orphans_markets() {
        let registry = ProcessorRegistry::new();
        registry.register("proc-a", "http://a:9100");
        registry.assign("proc-a", 1).unwrap();
        registry.assign("proc-a", 2).unwrap();

        assert_eq!(registry.unregister("proc-a"), Some(vec![1, 2]));
        assert!(registry.owner_of(1).is_none());
        assert!(registry.owner_of(2).is_none());
        assert!(registry.unregister("proc-a").is_none());
        registry.verify_consistency().unwrap();
    }

    #[test]
    fn test_assign_to_unknown_processor_is_a_conflict() {
        let registry = ProcessorRegistry::new();
        let err = registry.assign("ghost", 1).unwrap_err();
        assert!(matches!(err, CoordinatorError::AssignmentConflict { .. }));
        assert!(registry.owner_of(1).is_none());
    }

    #[test]
    fn test_reassignment_moves_market() {
        let registry = ProcessorRegistry::new();
        registry.register("proc-a", "http://a:9100");
        registry.register("proc-b", "http://b:9100");
        registry.assign("proc-a", 1).unwrap();

        let change = registry.assign("proc-b", 1).unwrap();

        assert_eq!(change.previous.unwrap().server_key, "proc-a");
        assert_eq!(registry.owner_of(1).unwrap().server_key, "proc-b");
        assert_eq!(registry.markets_of("proc-a"), Some(vec![]));
        assert_eq!(registry.unassigned_processors().len(), 1);
        registry.verify_consistency().unwrap();
    }

    #[test]
    fn test_revert_restores_previous_owner() {
        let registry = ProcessorRegistry::new();
        registry.register("proc-a", "http://a:9100");
        registry.register("proc-b", "http://b:9100");
        registry.assign("proc-a", 1).unwrap();
        let change = registry.assign("proc-b", 1).unwrap();

        assert!(registry.revert(&change));
        assert_eq!(registry.owner_of(1).unwrap().server_key, "proc-a");
        registry.verify_consistency().unwrap();

        // Already reverted
        assert!(!registry.revert(&change));
    }

    #[test]
    fn test_revert_after_superseding_change_is_noop() {
        let registry = ProcessorRegistry::new();
        registry.register("proc-a", "http://a:9100");
        registry.register("proc-b", "http://b:9100");
        let first = registry.assign("proc-a", 1).unwrap();
        registry.assign("proc-b", 1).unwrap();

        assert!(!registry.revert(&first));
        assert_eq!(registry.owner_of(1).unwrap().server_key, "proc-b");
    }

    #[test]
    fn test_repeated_assignment_is_unchanged_and_not_reverted() {
        let registry = ProcessorRegistry::new();
        registry.register("proc-a", "http://a:9100");
        registry.assign("proc-a", 1).unwrap();

        let again = registry.assign("proc-a", 1).unwrap();
        assert!(again.unchanged);
        assert!(again.previous.is_none());
        assert!(!registry.revert(&again));
        assert_eq!(registry.owner_of(1).unwrap().server_key, "proc-a");
    }

    #[test]
    fn test_concurrent_reassignment_keeps_single_owner() {
        let registry = ProcessorRegistry::new();
        let keys: Vec<String> = (0..4).map(|i| format!("proc-{i}")).collect();
        for key in &keys {
            registry.register(key, &format!("http://{key}:9100"));
        }

        std::thread::scope(|scope| {
            for key in &keys {
                let registry = registry.clone();
                scope.spawn(move || {
                    for market_id in 0..50 {
                        registry.assign(key, market_id).unwrap();
                        assert!(registry.owner_of(market_id).is_some());
                    }
                });
            }
        });

        registry.verify_consistency().unwrap();
        let owned: usize = keys
            .iter()
            .map(|key| registry.markets_of(key).unwrap().len())
            .sum();
        assert_eq!(owned, 50);
    }
}
