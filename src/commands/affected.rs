use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::runtime::Runtime;

use super::universe::{self, Loaded};

/// Print the bundles a refresh would touch after uninstalling some
#[tracing::instrument(skip(runtime, config))]
pub fn affected<R: Runtime>(
    runtime: R,
    config: Option<PathBuf>,
    file: &Path,
    uninstall: &[String],
) -> Result<()> {
    let loaded = universe::load(&runtime, config, file)?;
    let names = run(&loaded, uninstall)?;
    if names.is_empty() {
        println!("No bundles affected.");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub(crate) fn run(loaded: &Loaded, uninstall: &[String]) -> Result<Vec<String>> {
    loaded.resolve_all()?;
    let mut seen = BTreeSet::new();
    for id in loaded.lookup(uninstall)? {
        if !seen.insert(id) {
            debug!("Bundle {} named more than once", id);
            continue;
        }
        debug!("Uninstalling {}", id);
        loaded.framework.uninstall(id)?;
    }

    let mut names: Vec<String> = loaded
        .framework
        .packages()
        .zombie_affected_set(None)
        .into_iter()
        .map(|id| loaded.name(id))
        .collect();
    names.sort();
    Ok(names)
}
