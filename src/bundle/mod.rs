//! Bundle identity and lifecycle state.
//!
//! The resolver never owns bundles. It sees them through [`BundleHost`],
//! which reports lifecycle state and receives internal consistency errors.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// Framework-assigned bundle identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl BundleState {
    /// Whether the bundle's wiring is fixed, making its exports usable as
    /// providers without further resolution.
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            BundleState::Resolved
                | BundleState::Starting
                | BundleState::Active
                | BundleState::Stopping
        )
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Active => "ACTIVE",
            BundleState::Stopping => "STOPPING",
            BundleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// What the package registry needs to know about the bundles around it.
///
/// Both methods are called with the registry lock held. A registry call
/// made from inside them is not run: it is reported through
/// `framework_error` as [`ResolveError::Reentrant`] and answers with an
/// empty result.
#[cfg_attr(test, mockall::automock)]
pub trait BundleHost: Send + Sync {
    /// Current lifecycle state. Unknown bundles report `Uninstalled`.
    fn state(&self, bundle: BundleId) -> BundleState;

    /// Sink for resolver invariant violations.
    fn framework_error(&self, bundle: BundleId, error: &ResolveError);
}

/// In-memory [`BundleHost`] backed by a state table.
#[derive(Debug, Default)]
pub struct BundleTable {
    states: RwLock<HashMap<BundleId, BundleState>>,
    errors: RwLock<Vec<(BundleId, String)>>,
}

impl BundleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, bundle: BundleId, state: BundleState) {
        log::debug!("Bundle {} -> {}", bundle, state);
        self.states.write().insert(bundle, state);
    }

    pub fn remove(&self, bundle: BundleId) {
        self.states.write().remove(&bundle);
    }

    /// All known bundles, ordered by id.
    pub fn bundles(&self) -> Vec<BundleId> {
        let mut ids: Vec<BundleId> = self.states.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Framework errors reported so far, oldest first.
    pub fn errors(&self) -> Vec<(BundleId, String)> {
        self.errors.read().clone()
    }
}

impl BundleHost for BundleTable {
    fn state(&self, bundle: BundleId) -> BundleState {
        self.states
            .read()
            .get(&bundle)
            .copied()
            .unwrap_or(BundleState::Uninstalled)
    }

    fn framework_error(&self, bundle: BundleId, error: &ResolveError) {
        log::error!("Framework error for bundle {}: {}", bundle, error);
        self.errors.write().push((bundle, error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_states() {
        assert!(!BundleState::Installed.is_resolved());
        assert!(BundleState::Resolved.is_resolved());
        assert!(BundleState::Starting.is_resolved());
        assert!(BundleState::Active.is_resolved());
        assert!(BundleState::Stopping.is_resolved());
        assert!(!BundleState::Uninstalled.is_resolved());
    }

    #[test]
    fn test_table_unknown_bundle_is_uninstalled() {
        let table = BundleTable::new();
        assert_eq!(table.state(BundleId(7)), BundleState::Uninstalled);
    }

    #[test]
    fn test_table_tracks_states() {
        let table = BundleTable::new();
        table.set_state(BundleId(2), BundleState::Installed);
        table.set_state(BundleId(1), BundleState::Active);
        assert_eq!(table.state(BundleId(2)), BundleState::Installed);
        assert_eq!(table.bundles(), vec![BundleId(1), BundleId(2)]);

        table.remove(BundleId(1));
        assert_eq!(table.bundles(), vec![BundleId(2)]);
    }

    #[test]
    fn test_table_records_errors() {
        let table = BundleTable::new();
        table.framework_error(BundleId(3), &ResolveError::UnknownBundle(BundleId(3)));
        let errors = table.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, BundleId(3));
        assert!(errors[0].1.contains("#3"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BundleState::Active.to_string(), "ACTIVE");
        assert_eq!(BundleId(12).to_string(), "#12");
    }
}
