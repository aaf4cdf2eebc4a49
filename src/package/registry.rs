//! The package registry.
//!
//! Maps package names to [`Pkg`] records. Entries live in an arena keyed by
//! [`EntryId`]; packages and bundles hold ids, never references, so a
//! provider pointer is just an id that must also appear in the package's
//! exporter list.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::ReentrantMutex;

use crate::bundle::{BundleHost, BundleId, BundleState};
use crate::config::Config;
use crate::error::ResolveError;

use super::PkgEntry;

/// Arena handle of a registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryId(pub(crate) u64);

/// Registry bookkeeping for one package name.
#[derive(Debug, Default)]
pub(crate) struct Pkg {
    pub(crate) name: String,
    /// Registration order is the resolver's tie-break.
    pub(crate) exporters: Vec<EntryId>,
    pub(crate) importers: Vec<EntryId>,
    pub(crate) provider: Option<EntryId>,
    /// The provider could not be removed because it is still in use.
    pub(crate) zombie: bool,
}

impl Pkg {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.exporters.is_empty() && self.importers.is_empty()
    }
}

/// Entries registered on behalf of one bundle.
#[derive(Debug, Default)]
pub(crate) struct BundleEntries {
    pub(crate) exports: Vec<EntryId>,
    pub(crate) imports: Vec<EntryId>,
    /// Exports whose removal was blocked; kept until a forced removal.
    pub(crate) zombies: Vec<EntryId>,
    /// Imports held back alongside blocked exports. They still wire the
    /// bundle to its providers but take no part in its next resolution.
    pub(crate) retired: Vec<EntryId>,
}

impl BundleEntries {
    fn is_empty(&self) -> bool {
        self.exports.is_empty()
            && self.imports.is_empty()
            && self.zombies.is_empty()
            && self.retired.is_empty()
    }

    fn forget(&mut self, id: EntryId) {
        self.exports.retain(|e| *e != id);
        self.imports.retain(|e| *e != id);
        self.zombies.retain(|e| *e != id);
        self.retired.retain(|e| *e != id);
    }
}

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) packages: HashMap<String, Pkg>,
    pub(crate) entries: HashMap<EntryId, PkgEntry>,
    pub(crate) bundles: HashMap<BundleId, BundleEntries>,
    next_entry: u64,
}

impl Inner {
    pub(crate) fn entry(&self, id: EntryId) -> Option<&PkgEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn provider_of(&self, name: &str) -> Option<&PkgEntry> {
        self.packages
            .get(name)
            .and_then(|pkg| pkg.provider)
            .and_then(|id| self.entry(id))
    }

    /// Add an entry to the arena, its package and its bundle's index.
    pub(crate) fn insert(&mut self, entry: PkgEntry) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;

        let pkg = self
            .packages
            .entry(entry.name.clone())
            .or_insert_with(|| Pkg::new(&entry.name));
        let bundle = self.bundles.entry(entry.bundle).or_default();
        if entry.is_export() {
            pkg.exporters.push(id);
            bundle.exports.push(id);
        } else {
            pkg.importers.push(id);
            bundle.imports.push(id);
        }

        self.entries.insert(id, entry);
        id
    }

    /// Drop an entry everywhere, pruning records that became empty.
    fn remove(&mut self, id: EntryId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };

        if let Some(pkg) = self.packages.get_mut(&entry.name) {
            pkg.exporters.retain(|e| *e != id);
            pkg.importers.retain(|e| *e != id);
            if pkg.provider == Some(id) {
                pkg.provider = None;
                pkg.zombie = false;
            }
            if pkg.is_empty() {
                debug!("Pruning empty package {}", entry.name);
                self.packages.remove(&entry.name);
            }
        }

        if let Some(bundle) = self.bundles.get_mut(&entry.bundle) {
            bundle.forget(id);
            if bundle.is_empty() {
                self.bundles.remove(&entry.bundle);
            }
        }
    }

    /// Find the registered id of an entry value owned by its bundle.
    fn find(&self, entry: &PkgEntry) -> Option<EntryId> {
        let bundle = self.bundles.get(&entry.bundle)?;
        bundle
            .exports
            .iter()
            .chain(&bundle.zombies)
            .chain(&bundle.imports)
            .chain(&bundle.retired)
            .copied()
            .find(|id| self.entry(*id) == Some(entry))
    }

    /// The live entry of `entry`'s bundle with the same name and direction.
    fn live_twin(&self, entry: &PkgEntry) -> Option<&PkgEntry> {
        let bundle = self.bundles.get(&entry.bundle)?;
        let ids = if entry.is_export() {
            &bundle.exports
        } else {
            &bundle.imports
        };
        ids.iter()
            .filter_map(|id| self.entry(*id))
            .find(|e| e.name == entry.name)
    }

    /// Bundles wired to the package's provider, ignoring INSTALLED ones.
    pub(crate) fn importer_bundles<H: BundleHost + ?Sized>(
        &self,
        pkg: &Pkg,
        host: &H,
    ) -> BTreeSet<BundleId> {
        if pkg.provider.is_none() {
            return BTreeSet::new();
        }
        pkg.importers
            .iter()
            .filter_map(|id| self.entry(*id))
            .map(|e| e.bundle)
            .filter(|b| host.state(*b) != BundleState::Installed)
            .collect()
    }
}

/// Read-only view of one package record.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageInfo {
    pub name: String,
    pub exporters: Vec<PkgEntry>,
    pub importers: Vec<PkgEntry>,
    pub provider: Option<PkgEntry>,
    pub zombie: bool,
}

/// One export of a bundle together with its wiring.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedPackage {
    pub entry: PkgEntry,
    pub is_provider: bool,
    pub zombie: bool,
    pub importers: BTreeSet<BundleId>,
}

/// Registry state together with what is needed to notice re-entry.
#[derive(Debug, Default)]
struct Guarded {
    inner: RefCell<Inner>,
    /// Bundle the operation currently holding the registry acts on.
    holder: Cell<Option<BundleId>>,
    reporting: Cell<bool>,
}

/// The package registry and resolver.
///
/// Every operation takes the single registry lock for its whole duration,
/// including the provider search in
/// [`check_resolve`](Packages::check_resolve). Host callbacks that call
/// back into the registry from the locking thread are refused and
/// reported, see [`ResolveError::Reentrant`].
pub struct Packages<H: BundleHost> {
    pub(crate) config: Arc<Config>,
    pub(crate) host: Arc<H>,
    guarded: ReentrantMutex<Guarded>,
}

impl<H: BundleHost> Packages<H> {
    pub fn new(config: Arc<Config>, host: Arc<H>) -> Self {
        Self {
            config,
            host,
            guarded: ReentrantMutex::new(Guarded::default()),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Run `op` with exclusive access to the registry.
    ///
    /// Other threads wait for the lock. A call from the thread that already
    /// holds it can only come from a host callback: `op` is not run, the
    /// call is reported against the bundle being worked on and `fallback`
    /// is returned.
    pub(crate) fn with_inner<T>(
        &self,
        operation: &'static str,
        subject: Option<BundleId>,
        fallback: T,
        op: impl FnOnce(&mut Inner) -> T,
    ) -> T {
        let guarded = self.guarded.lock();
        let Ok(mut inner) = guarded.inner.try_borrow_mut() else {
            let bundle = guarded
                .holder
                .get()
                .or(subject)
                .unwrap_or(self.config.system_bundle);
            warn!("Refusing re-entrant {} while bundle {} holds the registry", operation, bundle);
            // A sink that calls back as well is not told twice.
            if !guarded.reporting.replace(true) {
                self.host
                    .framework_error(bundle, &ResolveError::Reentrant { operation });
                guarded.reporting.set(false);
            }
            return fallback;
        };

        guarded.holder.set(subject);
        let result = op(&mut inner);
        guarded.holder.set(None);
        result
    }

    /// Register a bundle's declared exports and imports.
    ///
    /// Entries the bundle already has live (same name and direction) are
    /// skipped, so repeating a registration is harmless. A second export or
    /// import of a name with different attributes is skipped with a warning.
    #[tracing::instrument(skip(self, exports, imports))]
    pub fn register_packages(
        &self,
        exports: impl IntoIterator<Item = PkgEntry>,
        imports: impl IntoIterator<Item = PkgEntry>,
    ) {
        let entries: Vec<PkgEntry> = exports.into_iter().chain(imports).collect();
        let subject = entries.first().map(|e| e.bundle);

        self.with_inner("register_packages", subject, (), |inner| {
            for entry in entries {
                match inner.live_twin(&entry) {
                    Some(live) if *live == entry => {
                        debug!("Skipping duplicate registration of {}", entry);
                    }
                    Some(live) => {
                        warn!("Ignoring {}: bundle {} already registers {}", entry, entry.bundle, live);
                    }
                    None => {
                        debug!("Registering {}", entry);
                        inner.insert(entry);
                    }
                }
            }
        })
    }

    /// Remove a bundle's entries.
    ///
    /// An export that is the provider of a package still imported by some
    /// other resolved bundle is not removed unless `force` is set: its
    /// package is flagged zombie and the bundle's imports stay registered
    /// but are retired from its next resolution.
    /// Returns `false` if any export stayed behind. Entries that were never
    /// registered are ignored.
    #[tracing::instrument(skip(self, exports, imports))]
    pub fn unregister_packages(
        &self,
        exports: impl IntoIterator<Item = PkgEntry>,
        imports: impl IntoIterator<Item = PkgEntry>,
        force: bool,
    ) -> bool {
        let exports: Vec<PkgEntry> = exports.into_iter().collect();
        let imports: Vec<PkgEntry> = imports.into_iter().collect();
        let subject = exports.iter().chain(&imports).next().map(|e| e.bundle);

        self.with_inner("unregister_packages", subject, false, |inner| {
            let exports: Vec<EntryId> = exports.iter().filter_map(|e| inner.find(e)).collect();
            let imports: Vec<EntryId> = imports.iter().filter_map(|e| inner.find(e)).collect();
            self.unregister_ids(inner, exports, imports, force)
        })
    }

    /// Remove everything `bundle` registered, zombie exports included.
    #[tracing::instrument(skip(self))]
    pub fn unregister_bundle(&self, bundle: BundleId, force: bool) -> bool {
        self.with_inner("unregister_bundle", Some(bundle), false, |inner| {
            let Some(entries) = inner.bundles.get(&bundle) else {
                return true;
            };
            let exports: Vec<EntryId> = entries.exports.iter().chain(&entries.zombies).copied().collect();
            let imports: Vec<EntryId> = entries.imports.iter().chain(&entries.retired).copied().collect();
            self.unregister_ids(inner, exports, imports, force)
        })
    }

    fn unregister_ids(
        &self,
        inner: &mut Inner,
        exports: Vec<EntryId>,
        imports: Vec<EntryId>,
        force: bool,
    ) -> bool {
        let mut all_removed = true;

        for id in exports {
            let Some(entry) = inner.entry(id).cloned() else {
                continue;
            };

            if let Some(pkg) = inner.packages.get(&entry.name)
                && pkg.provider == Some(id)
                && !force
            {
                let in_use = pkg
                    .importers
                    .iter()
                    .filter_map(|i| inner.entry(*i))
                    .any(|i| i.bundle != entry.bundle && self.host.state(i.bundle).is_resolved());

                if in_use {
                    warn!("{} is still in use, keeping it as a zombie", entry);
                    all_removed = false;
                    if let Some(pkg) = inner.packages.get_mut(&entry.name) {
                        pkg.zombie = true;
                    }
                    if let Some(bundle) = inner.bundles.get_mut(&entry.bundle) {
                        bundle.exports.retain(|e| *e != id);
                        if !bundle.zombies.contains(&id) {
                            bundle.zombies.push(id);
                        }
                    }
                    continue;
                }
            }

            debug!("Unregistering {}", entry);
            inner.remove(id);
        }

        if !all_removed {
            for id in imports {
                let Some(bundle) = inner.entry(id).map(|e| e.bundle) else {
                    continue;
                };
                if let Some(entries) = inner.bundles.get_mut(&bundle) {
                    entries.imports.retain(|e| *e != id);
                    if !entries.retired.contains(&id) {
                        entries.retired.push(id);
                    }
                }
            }
            return false;
        }

        for id in imports {
            if let Some(entry) = inner.entry(id) {
                debug!("Unregistering {}", entry);
            }
            inner.remove(id);
        }

        true
    }

    /// The committed provider of a package.
    pub fn get_provider(&self, name: &str) -> Option<PkgEntry> {
        self.with_inner("get_provider", None, None, |inner| inner.provider_of(name).cloned())
    }

    pub fn is_provider(&self, entry: &PkgEntry) -> bool {
        self.with_inner("is_provider", Some(entry.bundle), false, |inner| {
            inner.provider_of(&entry.name) == Some(entry)
        })
    }

    /// Whether `entry` is the provider of a package that has turned zombie.
    pub fn is_zombie_package(&self, entry: &PkgEntry) -> bool {
        self.with_inner("is_zombie_package", Some(entry.bundle), false, |inner| {
            inner.packages.get(&entry.name).is_some_and(|pkg| pkg.zombie)
                && inner.provider_of(&entry.name) == Some(entry)
        })
    }

    /// Bundles, other than INSTALLED ones, importing the resolved package.
    pub fn get_package_importers(&self, name: &str) -> BTreeSet<BundleId> {
        self.with_inner("get_package_importers", None, BTreeSet::new(), |inner| {
            match inner.packages.get(name) {
                Some(pkg) => inner.importer_bundles(pkg, self.host.as_ref()),
                None => BTreeSet::new(),
            }
        })
    }

    /// Packages provided by the system bundle, as `name;version` pairs.
    pub fn system_packages(&self) -> String {
        let system = self.config.system_bundle;
        self.with_inner("system_packages", Some(system), String::new(), |inner| {
            let mut provided: Vec<&PkgEntry> = inner
                .packages
                .values()
                .filter_map(|pkg| pkg.provider.and_then(|id| inner.entry(id)))
                .filter(|e| e.bundle == system)
                .collect();
            provided.sort_by(|a, b| a.name.cmp(&b.name));

            provided
                .iter()
                .filter_map(|e| e.version().map(|v| format!("{};{}", e.name, v)))
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    /// Names of every registered package, sorted.
    pub fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.with_inner("package_names", None, Vec::new(), |inner| {
            inner.packages.keys().cloned().collect()
        });
        names.sort();
        names
    }

    pub fn package_info(&self, name: &str) -> Option<PackageInfo> {
        self.with_inner("package_info", None, None, |inner| {
            let pkg = inner.packages.get(name)?;
            let collect = |ids: &[EntryId]| -> Vec<PkgEntry> {
                ids.iter().filter_map(|id| inner.entry(*id)).cloned().collect()
            };

            Some(PackageInfo {
                name: pkg.name.clone(),
                exporters: collect(&pkg.exporters),
                importers: collect(&pkg.importers),
                provider: pkg.provider.and_then(|id| inner.entry(id)).cloned(),
                zombie: pkg.zombie,
            })
        })
    }

    /// Live and zombie exports of `bundle` with their wiring.
    pub fn exported_packages(&self, bundle: BundleId) -> Vec<ExportedPackage> {
        self.with_inner("exported_packages", Some(bundle), Vec::new(), |inner| {
            let Some(entries) = inner.bundles.get(&bundle) else {
                return Vec::new();
            };

            entries
                .exports
                .iter()
                .chain(&entries.zombies)
                .filter_map(|id| {
                    let entry = inner.entry(*id)?;
                    let pkg = inner.packages.get(&entry.name)?;
                    let is_provider = pkg.provider == Some(*id);
                    Some(ExportedPackage {
                        entry: entry.clone(),
                        is_provider,
                        zombie: is_provider && pkg.zombie,
                        importers: if is_provider {
                            inner.importer_bundles(pkg, self.host.as_ref())
                        } else {
                            BTreeSet::new()
                        },
                    })
                })
                .collect()
        })
    }

    /// Live export entries of `bundle`, in registration order.
    pub fn exports_of(&self, bundle: BundleId) -> Vec<PkgEntry> {
        self.with_inner("exports_of", Some(bundle), Vec::new(), |inner| {
            inner
                .bundles
                .get(&bundle)
                .map(|b| b.exports.iter().filter_map(|id| inner.entry(*id)).cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Live import entries of `bundle`, dynamic ones included.
    pub fn imports_of(&self, bundle: BundleId) -> Vec<PkgEntry> {
        self.with_inner("imports_of", Some(bundle), Vec::new(), |inner| {
            inner
                .bundles
                .get(&bundle)
                .map(|b| b.imports.iter().filter_map(|id| inner.entry(*id)).cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn is_registered(&self, bundle: BundleId) -> bool {
        self.with_inner("is_registered", Some(bundle), false, |inner| {
            inner.bundles.contains_key(&bundle)
        })
    }
}
