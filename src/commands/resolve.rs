use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::bundle::BundleId;
use crate::package::{PkgEntry, ResolveOutcome};
use crate::runtime::Runtime;

use super::universe::{self, Loaded};

/// Resolve a universe and print each bundle's state
#[tracing::instrument(skip(runtime, config))]
pub fn resolve<R: Runtime>(
    runtime: R,
    config: Option<PathBuf>,
    file: &Path,
    only: &[String],
) -> Result<()> {
    let loaded = universe::load(&runtime, config, file)?;
    for line in run(&loaded, only)? {
        println!("{}", line);
    }
    Ok(())
}

pub(crate) fn run(loaded: &Loaded, only: &[String]) -> Result<Vec<String>> {
    let targets = if only.is_empty() {
        loaded.installed.clone()
    } else {
        loaded.lookup(only)?
    };

    let mut missing: HashMap<BundleId, Vec<PkgEntry>> = HashMap::new();
    for id in &targets {
        if let ResolveOutcome::Unresolved(entries) = loaded.framework.resolve(*id)? {
            debug!("{} has {} missing import(s)", id, entries.len());
            missing.insert(*id, entries);
        }
    }

    let mut lines = Vec::new();
    for id in &loaded.installed {
        let version = loaded
            .framework
            .manifest(*id)
            .map(|m| m.version.to_string())
            .unwrap_or_default();
        lines.push(format!(
            "{} {} {}",
            loaded.name(*id),
            version,
            loaded.framework.state(*id)
        ));
        for entry in missing.get(id).into_iter().flatten() {
            lines.push(format!("    {}", entry.missing_message()));
        }
    }
    Ok(lines)
}
