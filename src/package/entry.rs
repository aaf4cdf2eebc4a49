//! A single bundle's declared relationship to a package.

use std::cmp::Ordering;
use std::fmt;

use crate::bundle::BundleId;

use super::{Version, VersionRange};

/// Direction of a package entry, with its version data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// The bundle provides the package at a concrete version.
    Export(Version),
    /// The bundle requires the package within a range.
    Import(VersionRange),
}

/// One export or import of one package by one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgEntry {
    pub name: String,
    pub kind: EntryKind,
    pub bundle: BundleId,
    /// Created at class-load time from a dynamic import pattern rather than
    /// declared up front.
    pub dynamic: bool,
}

impl PkgEntry {
    pub fn export(name: impl Into<String>, version: Version, bundle: BundleId) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Export(version),
            bundle,
            dynamic: false,
        }
    }

    pub fn import(name: impl Into<String>, range: VersionRange, bundle: BundleId) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Import(range),
            bundle,
            dynamic: false,
        }
    }

    pub fn dynamic_import(name: impl Into<String>, range: VersionRange, bundle: BundleId) -> Self {
        Self {
            dynamic: true,
            ..Self::import(name, range, bundle)
        }
    }

    pub fn is_export(&self) -> bool {
        matches!(self.kind, EntryKind::Export(_))
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, EntryKind::Import(_))
    }

    pub fn version(&self) -> Option<&Version> {
        match &self.kind {
            EntryKind::Export(version) => Some(version),
            EntryKind::Import(_) => None,
        }
    }

    pub fn range(&self) -> Option<&VersionRange> {
        match &self.kind {
            EntryKind::Export(_) => None,
            EntryKind::Import(range) => Some(range),
        }
    }

    /// Whether this export can serve `import`: same package name and a
    /// version inside the import's range.
    pub fn satisfies(&self, import: &PkgEntry) -> bool {
        match (&self.kind, &import.kind) {
            (EntryKind::Export(version), EntryKind::Import(range)) => {
                self.name == import.name && compare_version(version, range) == Ordering::Equal
            }
            _ => false,
        }
    }

    /// Diagnostic line for an import nobody could satisfy.
    pub fn missing_message(&self) -> String {
        match &self.kind {
            EntryKind::Import(range) => {
                format!("missing package {} version {}", self.name, range.describe())
            }
            EntryKind::Export(version) => {
                format!("missing package {} version {}", self.name, version)
            }
        }
    }
}

impl fmt::Display for PkgEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EntryKind::Export(version) => {
                write!(f, "{};{} exported by {}", self.name, version, self.bundle)
            }
            EntryKind::Import(range) => {
                write!(f, "{};{} imported by {}", self.name, range, self.bundle)?;
                if self.dynamic {
                    f.write_str(" (dynamic)")?;
                }
                Ok(())
            }
        }
    }
}

/// Compare a candidate export version against an import requirement.
///
/// `Equal` means the candidate is acceptable, `Less` that it is too old
/// and `Greater` that it is past the range's ceiling.
pub fn compare_version(candidate: &Version, requirement: &VersionRange) -> Ordering {
    requirement.compare(candidate)
}
