//! Package registry and resolver.
//!
//! This module holds the package data model (versions, entries), the
//! registry that maps package names to their exporters, importers and
//! provider, the resolver that wires imports to providers, and the zombie
//! tracker used when bundles are refreshed.

mod entry;
mod registry;
mod resolver;
mod version;
mod zombie;

pub use entry::{EntryKind, PkgEntry, compare_version};
pub use registry::{ExportedPackage, PackageInfo, Packages};
pub use resolver::ResolveOutcome;
pub use version::{Version, VersionRange};
