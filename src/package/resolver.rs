//! Import resolution.
//!
//! [`Packages::check_resolve`] searches for a provider for every import of a
//! bundle, pulling in INSTALLED exporters and resolving their own imports in
//! turn. The search runs on an explicit stack of [`Frame`]s, so the depth of
//! a dependency chain is bounded by memory only. Choices are made in a
//! [`Workspace`] that is only written back to the registry when the whole
//! closure resolves.

use std::collections::{HashMap, HashSet};

use log::{debug, info, trace};

use crate::bundle::{BundleHost, BundleId, BundleState};
use crate::error::ResolveError;

use super::registry::{EntryId, Inner, Pkg};
use super::{Packages, PkgEntry};

/// Result of a resolution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// Every import is wired. `co_resolved` lists the INSTALLED bundles that
    /// were resolved along the way and should move to RESOLVED too.
    Resolved { co_resolved: Vec<BundleId> },
    /// The imports of the requested bundle that could not be satisfied.
    /// Nothing was committed.
    Unresolved(Vec<PkgEntry>),
}

impl ResolveOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolveOutcome::Resolved { .. })
    }

    /// The unsatisfied imports, or `None` on success.
    pub fn unresolved(&self) -> Option<&[PkgEntry]> {
        match self {
            ResolveOutcome::Resolved { .. } => None,
            ResolveOutcome::Unresolved(entries) => Some(entries),
        }
    }
}

/// Scratch state of one resolution attempt.
///
/// It only grows while the search goes deeper, so a [`Mark`] taken before
/// a speculative choice is enough to undo it.
#[derive(Debug, Default)]
struct Workspace {
    providers: HashMap<String, EntryId>,
    /// Package names in the order their provider was chosen.
    chosen: Vec<String>,
    /// Bundles taken along in this attempt, in the order they were added.
    tentative: Vec<BundleId>,
    taken: HashSet<BundleId>,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    chosen: usize,
    tentative: usize,
}

impl Workspace {
    fn new(target: BundleId) -> Self {
        let mut workspace = Self::default();
        workspace.take(target);
        workspace
    }

    fn provider(&self, name: &str) -> Option<EntryId> {
        self.providers.get(name).copied()
    }

    fn choose(&mut self, name: &str, id: EntryId) {
        if self.providers.insert(name.to_string(), id).is_none() {
            self.chosen.push(name.to_string());
        }
    }

    fn take(&mut self, bundle: BundleId) {
        if self.taken.insert(bundle) {
            self.tentative.push(bundle);
        }
    }

    fn is_taken(&self, bundle: BundleId) -> bool {
        self.taken.contains(&bundle)
    }

    fn mark(&self) -> Mark {
        Mark {
            chosen: self.chosen.len(),
            tentative: self.tentative.len(),
        }
    }

    fn rollback(&mut self, mark: Mark) {
        for name in self.chosen.drain(mark.chosen..) {
            self.providers.remove(&name);
        }
        for bundle in self.tentative.drain(mark.tentative..) {
            self.taken.remove(&bundle);
        }
    }
}

/// One level of the provider search.
#[derive(Debug)]
enum Frame<'a> {
    /// Looking for a provider of `import` among its package's exporters,
    /// `cursor` being the next one to look at. `trial` is set while the
    /// bundle of a candidate is being wired, with the mark to return to if
    /// it fails.
    Choose {
        import: EntryId,
        cursor: usize,
        trial: Option<(EntryId, Mark)>,
    },
    /// Wiring the imports of a bundle pulled in by a candidate.
    Wire { imports: &'a [EntryId], next: usize },
}

/// What the exporter scan of a [`Frame::Choose`] came up with.
enum Candidate {
    /// Usable as is.
    Accept(EntryId),
    /// Usable once its INSTALLED owner resolves.
    Try(EntryId, BundleId),
    Exhausted,
}

impl<H: BundleHost> Packages<H> {
    /// Resolve the imports of `bundle`, committing providers for the whole
    /// dependency closure on success and changing nothing on failure.
    #[tracing::instrument(skip(self))]
    pub fn check_resolve(&self, bundle: BundleId) -> ResolveOutcome {
        let refused = ResolveOutcome::Unresolved(Vec::new());
        self.with_inner("check_resolve", Some(bundle), refused, |inner| {
            let imports: Vec<EntryId> = inner
                .bundles
                .get(&bundle)
                .map(|b| b.imports.clone())
                .unwrap_or_default();

            match self.host.state(bundle) {
                BundleState::Installed => {}
                BundleState::Uninstalled => {
                    self.host
                        .framework_error(bundle, &ResolveError::Uninstalled(bundle));
                    return ResolveOutcome::Unresolved(
                        imports.iter().filter_map(|id| inner.entry(*id)).cloned().collect(),
                    );
                }
                state => {
                    debug!("Bundle {} is already {}", bundle, state);
                    return ResolveOutcome::Resolved {
                        co_resolved: Vec::new(),
                    };
                }
            }

            let mut workspace = Workspace::new(bundle);
            let unresolved = self.resolve_packages(inner, &imports, &mut workspace);

            if !unresolved.is_empty() {
                debug!(
                    "Bundle {} has {} unresolved import(s)",
                    bundle,
                    unresolved.len()
                );
                return ResolveOutcome::Unresolved(
                    unresolved
                        .iter()
                        .filter_map(|id| inner.entry(*id))
                        .cloned()
                        .collect(),
                );
            }

            let co_resolved = Self::commit(inner, workspace, bundle);
            info!("Resolved bundle {} together with {:?}", bundle, co_resolved);
            ResolveOutcome::Resolved { co_resolved }
        })
    }

    /// Find a provider for each import, returning the ones left unsatisfied.
    ///
    /// A failed import leaves the workspace as it found it.
    fn resolve_packages(
        &self,
        inner: &Inner,
        imports: &[EntryId],
        workspace: &mut Workspace,
    ) -> Vec<EntryId> {
        imports
            .iter()
            .copied()
            .filter(|id| !self.wire_import(inner, *id, workspace))
            .collect()
    }

    /// Settle one import without searching, if that is possible.
    ///
    /// `Some` when the import is broken or already has a provider, committed
    /// or chosen in this attempt. A provider chosen for an earlier, looser
    /// import must still satisfy this one.
    fn settled(&self, inner: &Inner, id: EntryId, workspace: &Workspace) -> Option<bool> {
        let Some(import) = inner.entry(id) else {
            self.report_dangling(inner, id, "<unknown>");
            return Some(false);
        };
        let Some(pkg) = inner.packages.get(&import.name) else {
            self.host.framework_error(
                import.bundle,
                &ResolveError::MissingPackage {
                    package: import.name.clone(),
                    bundle: import.bundle,
                },
            );
            return Some(false);
        };

        let provider = pkg.provider.or_else(|| workspace.provider(&import.name))?;
        let satisfied = inner.entry(provider).is_some_and(|p| p.satisfies(import));
        if !satisfied {
            trace!("No acceptable provider for {}", import);
        }
        Some(satisfied)
    }

    /// Wire one import, pulling in and wiring INSTALLED exporters as
    /// needed. Candidates are tried in registration order and a candidate
    /// whose bundle fails is rolled back before the next one is tried.
    fn wire_import(&self, inner: &Inner, import: EntryId, workspace: &mut Workspace) -> bool {
        if let Some(done) = self.settled(inner, import, workspace) {
            return done;
        }

        let mut stack = vec![Frame::Choose {
            import,
            cursor: 0,
            trial: None,
        }];
        // Result of the frame popped last, for its parent.
        let mut returned = None;

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Choose {
                    import,
                    mut cursor,
                    trial,
                } => {
                    let Some((entry, pkg)) = inner
                        .entry(import)
                        .and_then(|e| inner.packages.get(&e.name).map(|pkg| (e, pkg)))
                    else {
                        returned = Some(false);
                        continue;
                    };

                    if let Some((candidate, mark)) = trial {
                        if returned.take() == Some(true) {
                            workspace.choose(&pkg.name, candidate);
                            returned = Some(true);
                            continue;
                        }
                        if let Some(export) = inner.entry(candidate) {
                            debug!("Backtracking: bundle {} does not resolve", export.bundle);
                        }
                        workspace.rollback(mark);
                    }

                    match self.next_candidate(inner, pkg, entry, &mut cursor, workspace) {
                        Candidate::Accept(candidate) => {
                            workspace.choose(&pkg.name, candidate);
                            returned = Some(true);
                        }
                        Candidate::Try(candidate, owner) => {
                            let mark = workspace.mark();
                            workspace.take(owner);
                            workspace.choose(&pkg.name, candidate);
                            let imports = inner
                                .bundles
                                .get(&owner)
                                .map(|b| b.imports.as_slice())
                                .unwrap_or_default();
                            stack.push(Frame::Choose {
                                import,
                                cursor,
                                trial: Some((candidate, mark)),
                            });
                            stack.push(Frame::Wire { imports, next: 0 });
                        }
                        Candidate::Exhausted => returned = Some(false),
                    }
                }
                Frame::Wire { imports, mut next } => {
                    match returned.take() {
                        Some(false) => {
                            returned = Some(false);
                            continue;
                        }
                        Some(true) => next += 1,
                        None => {}
                    }

                    let mut search = None;
                    let mut failed = false;
                    while let Some(&id) = imports.get(next) {
                        match self.settled(inner, id, workspace) {
                            Some(true) => next += 1,
                            Some(false) => {
                                failed = true;
                                break;
                            }
                            None => {
                                search = Some(id);
                                break;
                            }
                        }
                    }

                    match search {
                        Some(id) => {
                            stack.push(Frame::Wire { imports, next });
                            stack.push(Frame::Choose {
                                import: id,
                                cursor: 0,
                                trial: None,
                            });
                        }
                        None => returned = Some(!failed),
                    }
                }
            }
        }

        returned.unwrap_or(false)
    }

    /// Scan the exporters of `pkg` from `cursor` for the next one that may
    /// provide `import`.
    fn next_candidate(
        &self,
        inner: &Inner,
        pkg: &Pkg,
        import: &PkgEntry,
        cursor: &mut usize,
        workspace: &Workspace,
    ) -> Candidate {
        while let Some(&candidate) = pkg.exporters.get(*cursor) {
            *cursor += 1;
            let Some(export) = inner.entry(candidate) else {
                self.report_dangling(inner, candidate, &pkg.name);
                continue;
            };
            if !export.satisfies(import) {
                trace!("Skipping {}: outside the range of {}", export, import);
                continue;
            }

            let owner = export.bundle;
            match self.host.state(owner) {
                state if state.is_resolved() => return Candidate::Accept(candidate),
                BundleState::Installed if workspace.is_taken(owner) => {
                    debug!("Accepting {} from bundle already being resolved", export);
                    return Candidate::Accept(candidate);
                }
                BundleState::Installed => {
                    debug!("Trying {} by resolving bundle {}", export, owner);
                    return Candidate::Try(candidate, owner);
                }
                _ => {}
            }
        }

        Candidate::Exhausted
    }

    /// Write the workspace into the registry. Returns the bundles resolved
    /// besides `target`.
    fn commit(inner: &mut Inner, workspace: Workspace, target: BundleId) -> Vec<BundleId> {
        for (name, id) in workspace.providers {
            if let Some(pkg) = inner.packages.get_mut(&name)
                && pkg.provider.is_none()
            {
                debug!("Committing provider of {}", name);
                pkg.provider = Some(id);
            }
        }

        // Exports of newly resolved bundles provide packages nobody else
        // provides yet.
        for bundle in &workspace.tentative {
            let exports = inner
                .bundles
                .get(bundle)
                .map(|b| b.exports.clone())
                .unwrap_or_default();
            for id in exports {
                let Some(name) = inner.entry(id).map(|e| e.name.clone()) else {
                    continue;
                };
                if let Some(pkg) = inner.packages.get_mut(&name)
                    && pkg.provider.is_none()
                {
                    debug!("Bundle {} now provides {}", bundle, name);
                    pkg.provider = Some(id);
                }
            }
        }

        workspace
            .tentative
            .into_iter()
            .filter(|b| *b != target)
            .collect()
    }

    /// Bind a dynamic import to an already committed provider.
    ///
    /// Never resolves other bundles. On success the import is registered
    /// for the rest of the bundle's resolved lifetime and the provider is
    /// returned.
    #[tracing::instrument(skip(self))]
    pub fn register_dynamic_import(&self, entry: PkgEntry) -> Option<PkgEntry> {
        if !entry.is_import() {
            return None;
        }

        let bundle = entry.bundle;
        self.with_inner("register_dynamic_import", Some(bundle), None, |inner| {
            let provider = inner.provider_of(&entry.name)?.clone();
            if !provider.satisfies(&entry) {
                debug!("{} does not satisfy {}", provider, entry);
                return None;
            }

            let already_imported = inner
                .bundles
                .get(&bundle)
                .map(|b| {
                    b.imports
                        .iter()
                        .filter_map(|id| inner.entry(*id))
                        .any(|e| e.name == entry.name)
                })
                .unwrap_or(false);
            if !already_imported {
                debug!("Registering dynamic import {}", entry);
                inner.insert(PkgEntry {
                    dynamic: true,
                    ..entry
                });
            }

            Some(provider)
        })
    }

    fn report_dangling(&self, inner: &Inner, id: EntryId, package: &str) {
        let bundle = inner
            .bundles
            .iter()
            .find(|(_, b)| {
                b.imports.contains(&id)
                    || b.exports.contains(&id)
                    || b.zombies.contains(&id)
                    || b.retired.contains(&id)
            })
            .map(|(bundle, _)| *bundle)
            .unwrap_or_default();
        self.host.framework_error(
            bundle,
            &ResolveError::DanglingEntry {
                package: package.to_string(),
                entry: id.0,
            },
        );
    }
}
