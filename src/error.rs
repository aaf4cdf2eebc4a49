//! Resolver invariant violations.
//!
//! Unsatisfied imports are not errors; they come back as data in
//! [`crate::package::ResolveOutcome`]. The variants here describe states
//! that should not happen. The registry reports them through
//! [`crate::bundle::BundleHost::framework_error`]; the lifecycle host also
//! returns them, wrapped in `anyhow`, when asked to act on a bundle it does
//! not hold.

use thiserror::Error;

use crate::bundle::BundleId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// An operation named a bundle the framework has never installed or has
    /// already forgotten.
    #[error("bundle {0} is not known to the framework")]
    UnknownBundle(BundleId),

    /// Resolution was requested for a bundle that is already uninstalled.
    #[error("bundle {0} is uninstalled and cannot be resolved")]
    Uninstalled(BundleId),

    /// A package record points at an entry that is gone from the arena.
    #[error("package '{package}' refers to entry {entry} which is no longer registered")]
    DanglingEntry { package: String, entry: u64 },

    /// An import names a package with no record in the registry.
    #[error("import of '{package}' by bundle {bundle} has no package record")]
    MissingPackage { package: String, bundle: BundleId },

    /// A host callback called back into the registry while it was locked by
    /// the same thread. The nested call is refused.
    #[error("re-entrant call to {operation} from a host callback")]
    Reentrant { operation: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ResolveError::Uninstalled(BundleId(4)).to_string(),
            "bundle #4 is uninstalled and cannot be resolved"
        );
        let err = ResolveError::DanglingEntry {
            package: "com.x".into(),
            entry: 9,
        };
        assert!(err.to_string().contains("com.x"));
        assert!(err.to_string().contains('9'));
        assert_eq!(
            ResolveError::Reentrant {
                operation: "get_provider"
            }
            .to_string(),
            "re-entrant call to get_provider from a host callback"
        );
    }
}
