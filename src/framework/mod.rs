//! Bundle lifecycle on top of the package registry.
//!
//! [`Framework`] holds installed bundles and their manifests, moves them
//! through their lifecycle states, and drives [`Packages`] to register,
//! resolve and unregister their packages.

mod manifest;

pub use manifest::{BundleManifest, ExportDecl, ImportDecl};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::bundle::{BundleHost, BundleId, BundleState, BundleTable};
use crate::config::Config;
use crate::error::ResolveError;
use crate::package::{Packages, PkgEntry, ResolveOutcome, Version, VersionRange};

/// Name given to the bundle exporting the configured system packages.
pub const SYSTEM_BUNDLE_NAME: &str = "system.bundle";

struct Record {
    manifest: BundleManifest,
    dynamic: Vec<glob::Pattern>,
    /// Uninstalled while some of its exports were still in use.
    pending_removal: bool,
}

struct Bundles {
    records: BTreeMap<BundleId, Record>,
    next_id: u64,
}

/// In-memory bundle framework.
///
/// Lifecycle operations are serialized by the bundle lock, which is always
/// taken before the registry lock.
pub struct Framework {
    config: Arc<Config>,
    table: Arc<BundleTable>,
    packages: Packages<BundleTable>,
    bundles: Mutex<Bundles>,
}

impl Framework {
    /// Start a framework whose system bundle exports `config.system_packages`.
    #[tracing::instrument(skip(config))]
    pub fn new(config: Arc<Config>) -> Self {
        let table = Arc::new(BundleTable::new());
        let packages = Packages::new(config.clone(), table.clone());

        let system = config.system_bundle;
        let manifest = config.system_packages.iter().fold(
            BundleManifest::new(SYSTEM_BUNDLE_NAME, Version::default()),
            |manifest, package| manifest.export(package.name.clone(), package.version.clone()),
        );

        table.set_state(system, BundleState::Installed);
        packages.register_packages(manifest.export_entries(system), Vec::new());
        if let ResolveOutcome::Unresolved(missing) = packages.check_resolve(system) {
            warn!("System bundle left unresolved: {}", describe_missing(&missing));
        }
        table.set_state(system, BundleState::Active);
        debug!("System bundle {} exports {} package(s)", system, manifest.exports.len());

        let mut records = BTreeMap::new();
        records.insert(
            system,
            Record {
                manifest,
                dynamic: Vec::new(),
                pending_removal: false,
            },
        );

        Self {
            config,
            table,
            packages,
            bundles: Mutex::new(Bundles {
                records,
                next_id: system.0 + 1,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The package registry.
    pub fn packages(&self) -> &Packages<BundleTable> {
        &self.packages
    }

    /// Errors the registry reported through the host.
    pub fn errors(&self) -> Vec<(BundleId, String)> {
        self.table.errors()
    }

    #[tracing::instrument(skip(self, manifest))]
    pub fn install(&self, manifest: BundleManifest) -> Result<BundleId> {
        let dynamic = manifest.validate()?;
        let mut bundles = self.bundles.lock();

        let id = BundleId(bundles.next_id);
        bundles.next_id += 1;

        self.table.set_state(id, BundleState::Installed);
        self.packages
            .register_packages(manifest.export_entries(id), manifest.import_entries(id));
        info!("Installed {} {} as {}", manifest.name, manifest.version, id);

        bundles.records.insert(
            id,
            Record {
                manifest,
                dynamic,
                pending_removal: false,
            },
        );
        Ok(id)
    }

    /// Resolve an INSTALLED bundle and everything it pulls in.
    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, id: BundleId) -> Result<ResolveOutcome> {
        let bundles = self.bundles.lock();
        self.resolve_locked(&bundles, id)
    }

    #[tracing::instrument(skip(self))]
    pub fn start(&self, id: BundleId) -> Result<()> {
        let bundles = self.bundles.lock();
        self.start_locked(&bundles, id)
    }

    #[tracing::instrument(skip(self))]
    pub fn stop(&self, id: BundleId) -> Result<()> {
        let bundles = self.bundles.lock();
        self.stop_locked(&bundles, id)
    }

    /// Replace a bundle's manifest.
    ///
    /// Exports still in use stay behind as zombies until the next refresh.
    /// A bundle that was ACTIVE is started again on its new manifest.
    #[tracing::instrument(skip(self, manifest))]
    pub fn update(&self, id: BundleId, manifest: BundleManifest) -> Result<()> {
        let dynamic = manifest.validate()?;
        let mut bundles = self.bundles.lock();
        if id == self.config.system_bundle {
            anyhow::bail!("The system bundle cannot be updated");
        }
        self.live_record(&bundles, id)?;

        let was_active = self.table.state(id) == BundleState::Active;
        self.stop_locked(&bundles, id)?;

        if !self.packages.unregister_bundle(id, false) {
            warn!("Old exports of {} stay in use until the next refresh", id);
        }
        self.table.set_state(id, BundleState::Installed);
        self.packages
            .register_packages(manifest.export_entries(id), manifest.import_entries(id));
        info!("Updated {} to {} {}", id, manifest.name, manifest.version);

        if let Some(record) = bundles.records.get_mut(&id) {
            record.manifest = manifest;
            record.dynamic = dynamic;
        }

        if was_active {
            self.start_locked(&bundles, id)?;
        }
        Ok(())
    }

    /// Uninstall a bundle.
    ///
    /// A bundle whose exports are still in use is kept, UNINSTALLED and
    /// pending removal, until the next refresh.
    #[tracing::instrument(skip(self))]
    pub fn uninstall(&self, id: BundleId) -> Result<()> {
        let mut bundles = self.bundles.lock();
        if id == self.config.system_bundle {
            anyhow::bail!("The system bundle cannot be uninstalled");
        }
        self.live_record(&bundles, id)?;
        self.stop_locked(&bundles, id)?;

        let removed = self.packages.unregister_bundle(id, false);
        self.table.set_state(id, BundleState::Uninstalled);

        if removed {
            bundles.records.remove(&id);
            self.table.remove(id);
            info!("Uninstalled {}", id);
        } else if let Some(record) = bundles.records.get_mut(&id) {
            record.pending_removal = true;
            warn!("Uninstalled {}, pending removal until refresh", id);
        }
        Ok(())
    }

    /// Rewire every bundle affected by zombie exports.
    ///
    /// Without a seed, starts from the bundles providing zombie packages.
    /// Bundles pending removal are always included. Returns every bundle
    /// that was torn down, sorted by id.
    #[tracing::instrument(skip(self))]
    pub fn refresh(&self, seed: Option<Vec<BundleId>>) -> Result<Vec<BundleId>> {
        let mut bundles = self.bundles.lock();

        let mut start: BTreeSet<BundleId> = match seed {
            Some(seed) => seed.into_iter().collect(),
            None => self.packages.zombie_affected_set(None),
        };
        if let Some(id) = start.iter().find(|id| !bundles.records.contains_key(*id)) {
            return Err(ResolveError::UnknownBundle(*id).into());
        }
        start.extend(
            bundles
                .records
                .iter()
                .filter(|(_, record)| record.pending_removal)
                .map(|(id, _)| *id),
        );

        let seed: Vec<BundleId> = start.into_iter().collect();
        let affected: Vec<BundleId> = self
            .packages
            .zombie_affected_set(Some(&seed))
            .into_iter()
            .filter(|id| bundles.records.contains_key(id))
            .collect();
        if affected.is_empty() {
            debug!("Nothing to refresh");
            return Ok(affected);
        }
        info!("Refreshing {:?}", affected);

        let previous: Vec<(BundleId, BundleState)> = affected
            .iter()
            .map(|id| (*id, self.table.state(*id)))
            .collect();

        for (id, state) in &previous {
            if *state == BundleState::Active {
                self.stop_locked(&bundles, *id)?;
            }
        }

        for id in &affected {
            self.packages.unregister_bundle(*id, true);
        }

        for id in &affected {
            let Some(record) = bundles.records.get(id) else {
                continue;
            };
            if record.pending_removal {
                bundles.records.remove(id);
                self.table.remove(*id);
                info!("Removed {}", id);
                continue;
            }
            self.table.set_state(*id, BundleState::Installed);
            self.packages.register_packages(
                record.manifest.export_entries(*id),
                record.manifest.import_entries(*id),
            );
        }

        for (id, state) in &previous {
            if !state.is_resolved() || !bundles.records.contains_key(id) {
                continue;
            }
            if let ResolveOutcome::Unresolved(missing) = self.resolve_locked(&bundles, *id)? {
                warn!("{} is no longer resolvable: {}", id, describe_missing(&missing));
            }
        }

        for (id, state) in &previous {
            if *state == BundleState::Active
                && bundles.records.contains_key(id)
                && let Err(e) = self.start_locked(&bundles, *id)
            {
                warn!("Failed to restart {}: {:#}", id, e);
            }
        }

        Ok(affected)
    }

    /// Find the provider a resolved bundle sees for `package` at load time.
    ///
    /// Static imports answer with their committed provider. Otherwise a
    /// matching dynamic import pattern binds a new import to whatever
    /// provider is already committed.
    #[tracing::instrument(skip(self))]
    pub fn load_package(&self, id: BundleId, package: &str) -> Option<PkgEntry> {
        let bundles = self.bundles.lock();
        let record = self.live_record(&bundles, id).ok()?;
        if !self.table.state(id).is_resolved() {
            debug!("{} is not resolved, cannot load {}", id, package);
            return None;
        }

        if self
            .packages
            .imports_of(id)
            .iter()
            .any(|entry| entry.name == package)
        {
            return self.packages.get_provider(package);
        }

        if record.dynamic.iter().any(|pattern| pattern.matches(package)) {
            debug!("{} matches a dynamic import of {}", package, id);
            return self
                .packages
                .register_dynamic_import(PkgEntry::dynamic_import(package, VersionRange::any(), id));
        }

        None
    }

    pub fn state(&self, id: BundleId) -> BundleState {
        self.table.state(id)
    }

    /// Every bundle the framework holds, pending removal included.
    pub fn bundles(&self) -> Vec<BundleId> {
        self.bundles.lock().records.keys().copied().collect()
    }

    pub fn bundle_name(&self, id: BundleId) -> Option<String> {
        self.bundles
            .lock()
            .records
            .get(&id)
            .map(|record| record.manifest.name.clone())
    }

    pub fn manifest(&self, id: BundleId) -> Option<BundleManifest> {
        self.bundles
            .lock()
            .records
            .get(&id)
            .map(|record| record.manifest.clone())
    }

    /// First installed bundle with the given name.
    pub fn find(&self, name: &str) -> Option<BundleId> {
        self.bundles
            .lock()
            .records
            .iter()
            .find(|(_, record)| !record.pending_removal && record.manifest.name == name)
            .map(|(id, _)| *id)
    }

    pub fn is_pending_removal(&self, id: BundleId) -> bool {
        self.bundles
            .lock()
            .records
            .get(&id)
            .is_some_and(|record| record.pending_removal)
    }

    fn live_record<'a>(&self, bundles: &'a Bundles, id: BundleId) -> Result<&'a Record> {
        let record = bundles
            .records
            .get(&id)
            .ok_or(ResolveError::UnknownBundle(id))?;
        if record.pending_removal || self.table.state(id) == BundleState::Uninstalled {
            return Err(ResolveError::Uninstalled(id).into());
        }
        Ok(record)
    }

    fn resolve_locked(&self, bundles: &Bundles, id: BundleId) -> Result<ResolveOutcome> {
        self.live_record(bundles, id)?;

        let outcome = self.packages.check_resolve(id);
        if let ResolveOutcome::Resolved { co_resolved } = &outcome {
            for bundle in std::iter::once(&id).chain(co_resolved) {
                if self.table.state(*bundle) == BundleState::Installed {
                    self.table.set_state(*bundle, BundleState::Resolved);
                }
            }
        }
        Ok(outcome)
    }

    fn start_locked(&self, bundles: &Bundles, id: BundleId) -> Result<()> {
        let record = self.live_record(bundles, id)?;
        match self.table.state(id) {
            BundleState::Active => return Ok(()),
            BundleState::Installed => {
                if let ResolveOutcome::Unresolved(missing) = self.resolve_locked(bundles, id)? {
                    anyhow::bail!(
                        "Cannot start {}: {}",
                        record.manifest.name,
                        describe_missing(&missing)
                    );
                }
            }
            _ => {}
        }

        self.table.set_state(id, BundleState::Starting);
        self.table.set_state(id, BundleState::Active);
        info!("Started {}", record.manifest.name);
        Ok(())
    }

    fn stop_locked(&self, bundles: &Bundles, id: BundleId) -> Result<()> {
        let record = self.live_record(bundles, id)?;
        if self.table.state(id) != BundleState::Active {
            debug!("{} is not active", id);
            return Ok(());
        }

        self.table.set_state(id, BundleState::Stopping);
        self.table.set_state(id, BundleState::Resolved);
        info!("Stopped {}", record.manifest.name);
        Ok(())
    }
}

/// Join the diagnostics of unsatisfied imports.
pub fn describe_missing(missing: &[PkgEntry]) -> String {
    missing
        .iter()
        .map(PkgEntry::missing_message)
        .collect::<Vec<_>>()
        .join(", ")
}
