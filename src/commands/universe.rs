use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::bundle::BundleId;
use crate::config::Config;
use crate::framework::{BundleManifest, Framework};
use crate::runtime::Runtime;

/// A set of bundles to install together, read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Universe {
    #[serde(default)]
    pub bundles: Vec<BundleManifest>,
}

impl Universe {
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        debug!("Loading universe from {:?}", path);
        let content = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read universe file {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse universe file {:?}", path))
    }
}

/// A framework with a universe installed into it.
pub struct Loaded {
    pub framework: Framework,
    /// Installed bundles in file order.
    pub installed: Vec<BundleId>,
}

impl Loaded {
    /// Installed bundle ids for `names`, in the order given.
    pub fn lookup(&self, names: &[String]) -> Result<Vec<BundleId>> {
        names
            .iter()
            .map(|name| {
                self.installed
                    .iter()
                    .copied()
                    .find(|id| self.framework.bundle_name(*id).as_deref() == Some(name.as_str()))
                    .with_context(|| format!("No bundle named {} in the universe", name))
            })
            .collect()
    }

    /// Resolve every installed bundle in file order.
    pub fn resolve_all(&self) -> Result<()> {
        for id in &self.installed {
            self.framework.resolve(*id)?;
        }
        Ok(())
    }

    pub fn name(&self, id: BundleId) -> String {
        self.framework
            .bundle_name(id)
            .unwrap_or_else(|| id.to_string())
    }
}

/// Load config and universe, start a framework and install every bundle.
#[tracing::instrument(skip(runtime))]
pub fn load<R: Runtime>(runtime: &R, config: Option<PathBuf>, file: &Path) -> Result<Loaded> {
    let config = Config::load(runtime, config)?;
    let universe = Universe::load(runtime, file)?;

    let framework = Framework::new(Arc::new(config));
    let installed = universe
        .bundles
        .into_iter()
        .map(|manifest| {
            let name = manifest.name.clone();
            framework
                .install(manifest)
                .with_context(|| format!("Failed to install {}", name))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!("Installed {} bundle(s)", installed.len());

    Ok(Loaded {
        framework,
        installed,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    pub(crate) const UNIVERSE: &str = r#"{
        "bundles": [
            { "name": "log", "version": "1.0", "exports": [{ "name": "org.log", "version": "1.2" }] },
            { "name": "app", "version": "2.0",
              "imports": [{ "name": "org.log", "range": "[1.0,2.0)" }, { "name": "org.db" }] },
            { "name": "web", "version": "1.0", "imports": [{ "name": "org.log" }] }
        ]
    }"#;

    /// Mock runtime serving `content` at `/u.json` and no config file.
    pub(crate) fn runtime_with(content: &'static str) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_config_dir().returning(|| None);
        runtime
            .expect_read_to_string()
            .with(eq(PathBuf::from("/u.json")))
            .returning(move |_| Ok(content.to_string()));
        runtime
    }

    #[test]
    fn test_load_installs_in_file_order() {
        let runtime = runtime_with(UNIVERSE);
        let loaded = load(&runtime, None, Path::new("/u.json")).unwrap();

        assert_eq!(loaded.installed, vec![BundleId(1), BundleId(2), BundleId(3)]);
        assert_eq!(loaded.name(BundleId(2)), "app");
        assert_eq!(
            loaded.lookup(&["web".to_string(), "log".to_string()]).unwrap(),
            vec![BundleId(3), BundleId(1)]
        );
    }

    #[test]
    fn test_lookup_unknown_name() {
        let runtime = runtime_with(UNIVERSE);
        let loaded = load(&runtime, None, Path::new("/u.json")).unwrap();
        let err = loaded.lookup(&["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("No bundle named nope"));
    }

    #[test]
    fn test_load_rejects_bad_universe() {
        let runtime = runtime_with(r#"{ "bundles": [{ "name": "" }] }"#);
        let err = load(&runtime, None, Path::new("/u.json")).err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to install"));
    }

    #[test]
    fn test_load_missing_file() {
        let mut runtime = MockRuntime::new();
        runtime.expect_config_dir().returning(|| None);
        runtime
            .expect_read_to_string()
            .returning(|p| anyhow::bail!("Failed to read {:?}", p));

        let err = load(&runtime, None, Path::new("/missing.json")).err().unwrap();
        assert!(err.to_string().contains("Failed to read universe file"));
    }
}
