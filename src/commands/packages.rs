use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::runtime::Runtime;

use super::universe::{self, Loaded};

/// Resolve a universe and print the package wiring
#[tracing::instrument(skip(runtime, config))]
pub fn packages<R: Runtime>(runtime: R, config: Option<PathBuf>, file: &Path) -> Result<()> {
    let loaded = universe::load(&runtime, config, file)?;
    loaded.resolve_all()?;
    for line in run(&loaded) {
        println!("{}", line);
    }
    Ok(())
}

pub(crate) fn run(loaded: &Loaded) -> Vec<String> {
    let registry = loaded.framework.packages();
    let mut lines = Vec::new();

    for name in registry.package_names() {
        let Some(info) = registry.package_info(&name) else {
            continue;
        };

        match &info.provider {
            Some(provider) => {
                let version = provider.version().map(|v| v.to_string()).unwrap_or_default();
                let mut line = format!(
                    "{} {} provided by {}",
                    name,
                    version,
                    loaded.name(provider.bundle)
                );
                if info.zombie {
                    line.push_str(" (zombie)");
                }
                lines.push(line);
            }
            None => lines.push(format!("{} (no provider)", name)),
        }

        for importer in registry.get_package_importers(&name) {
            lines.push(format!("    imported by {}", loaded.name(importer)));
        }
    }

    lines.push(format!("system packages: {}", registry.system_packages()));
    lines
}
