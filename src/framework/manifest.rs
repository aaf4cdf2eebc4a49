//! Bundle manifests.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bundle::BundleId;
use crate::package::{PkgEntry, Version, VersionRange};

/// A package a bundle provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDecl {
    pub name: String,
    #[serde(default)]
    pub version: Version,
}

/// A package a bundle requires. The range defaults to "any version".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDecl {
    pub name: String,
    #[serde(default)]
    pub range: VersionRange,
}

/// Static description of a bundle as it is installed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub exports: Vec<ExportDecl>,
    #[serde(default)]
    pub imports: Vec<ImportDecl>,
    /// Glob patterns of packages that may be imported at load time.
    #[serde(default)]
    pub dynamic_imports: Vec<String>,
}

impl BundleManifest {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            ..Default::default()
        }
    }

    pub fn export(mut self, name: impl Into<String>, version: Version) -> Self {
        self.exports.push(ExportDecl {
            name: name.into(),
            version,
        });
        self
    }

    pub fn import(mut self, name: impl Into<String>, range: VersionRange) -> Self {
        self.imports.push(ImportDecl {
            name: name.into(),
            range,
        });
        self
    }

    pub fn dynamic_import(mut self, pattern: impl Into<String>) -> Self {
        self.dynamic_imports.push(pattern.into());
        self
    }

    pub fn export_entries(&self, bundle: BundleId) -> Vec<PkgEntry> {
        self.exports
            .iter()
            .map(|e| PkgEntry::export(e.name.clone(), e.version.clone(), bundle))
            .collect()
    }

    pub fn import_entries(&self, bundle: BundleId) -> Vec<PkgEntry> {
        self.imports
            .iter()
            .map(|i| PkgEntry::import(i.name.clone(), i.range.clone(), bundle))
            .collect()
    }

    /// Check the manifest and compile its dynamic import patterns.
    pub fn validate(&self) -> Result<Vec<glob::Pattern>> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Bundle name must not be empty");
        }
        let mut exported = HashSet::new();
        for export in &self.exports {
            if export.name.is_empty() {
                anyhow::bail!("Bundle {} exports a package with an empty name", self.name);
            }
            if !exported.insert(export.name.as_str()) {
                anyhow::bail!("Bundle {} exports package {} more than once", self.name, export.name);
            }
        }
        let mut imported = HashSet::new();
        for import in &self.imports {
            if import.name.is_empty() {
                anyhow::bail!("Bundle {} imports a package with an empty name", self.name);
            }
            if !imported.insert(import.name.as_str()) {
                anyhow::bail!("Bundle {} imports package {} more than once", self.name, import.name);
            }
        }

        self.dynamic_imports
            .iter()
            .map(|p| {
                glob::Pattern::new(p).with_context(|| {
                    format!("Invalid dynamic import pattern {:?} in {}", p, self.name)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let manifest: BundleManifest = serde_json::from_str(
            r#"{
                "name": "com.acme.app",
                "version": "1.2",
                "exports": [{ "name": "com.acme.api", "version": "1.0.0" }],
                "imports": [
                    { "name": "com.acme.util", "range": "[1.0,2.0)" },
                    { "name": "org.log" }
                ],
                "dynamic_imports": ["com.acme.plugin.*"]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name, "com.acme.app");
        assert_eq!(manifest.version, Version::new(1, 2, 0));
        assert_eq!(manifest.imports[1].range, VersionRange::any());
        assert_eq!(
            manifest.imports[0].range,
            VersionRange::between(Version::new(1, 0, 0), Version::new(2, 0, 0))
        );
        assert_eq!(manifest.dynamic_imports, vec!["com.acme.plugin.*"]);
    }

    #[test]
    fn test_entries_carry_bundle_id() {
        let manifest = BundleManifest::new("b", Version::default())
            .export("com.x", Version::new(1, 0, 0))
            .import("com.y", VersionRange::any());

        let exports = manifest.export_entries(BundleId(4));
        let imports = manifest.import_entries(BundleId(4));
        assert_eq!(exports, vec![PkgEntry::export("com.x", Version::new(1, 0, 0), BundleId(4))]);
        assert_eq!(imports, vec![PkgEntry::import("com.y", VersionRange::any(), BundleId(4))]);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let manifest = BundleManifest::new("  ", Version::default());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_package_exported_twice() {
        let manifest = BundleManifest::new("b", Version::default())
            .export("com.x", Version::new(1, 0, 0))
            .export("com.y", Version::new(1, 0, 0))
            .export("com.x", Version::new(2, 0, 0));

        let err = manifest.validate().unwrap_err();
        assert_eq!(err.to_string(), "Bundle b exports package com.x more than once");
    }

    #[test]
    fn test_validate_rejects_package_imported_twice() {
        let manifest = BundleManifest::new("b", Version::default())
            .import("com.x", VersionRange::any())
            .import("com.x", "2.0".parse().unwrap());

        assert!(manifest.validate().is_err());
        // Exporting and importing the same package is fine
        let manifest = BundleManifest::new("b", Version::default())
            .export("com.x", Version::new(1, 0, 0))
            .import("com.x", VersionRange::any());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_compiles_patterns() {
        let manifest = BundleManifest::new("b", Version::default()).dynamic_import("com.acme.*");
        let patterns = manifest.validate().unwrap();
        assert!(patterns[0].matches("com.acme.plugin"));
        assert!(!patterns[0].matches("org.other"));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let manifest = BundleManifest::new("b", Version::default()).dynamic_import("com.[");
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid dynamic import pattern"));
    }
}
