//! File system operations.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn read_to_string_impl(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn exists_impl(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use tempfile::tempdir;

    #[test]
    fn test_real_runtime_reads_files() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("universe.json");

        assert!(!runtime.exists(&path));
        std::fs::write(&path, "{}").unwrap();
        assert!(runtime.exists(&path));
        assert_eq!(runtime.read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_real_runtime_missing_file_is_error() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let err = runtime
            .read_to_string(&dir.path().join("missing.json"))
            .unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
