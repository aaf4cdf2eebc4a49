//! Bundles affected by zombie exports.

use std::collections::BTreeSet;

use log::debug;

use crate::bundle::{BundleHost, BundleId};

use super::Packages;

impl<H: BundleHost> Packages<H> {
    /// Close `seed` over the "exports used by" relation.
    ///
    /// Without a seed, starts from every bundle still providing a zombie
    /// package. Then repeatedly adds the importers of every package a member
    /// provides until nothing new is found.
    #[tracing::instrument(skip(self))]
    pub fn zombie_affected_set(&self, seed: Option<&[BundleId]>) -> BTreeSet<BundleId> {
        self.with_inner("zombie_affected_set", None, BTreeSet::new(), |inner| {
            let mut affected: BTreeSet<BundleId> = match seed {
                Some(bundles) => bundles.iter().copied().collect(),
                None => inner
                    .packages
                    .values()
                    .filter(|pkg| pkg.zombie)
                    .filter_map(|pkg| pkg.provider.and_then(|id| inner.entry(id)))
                    .map(|e| e.bundle)
                    .collect(),
            };
            debug!("Zombie seed: {:?}", affected);

            let mut frontier: Vec<BundleId> = affected.iter().copied().collect();
            while let Some(bundle) = frontier.pop() {
                let Some(entries) = inner.bundles.get(&bundle) else {
                    continue;
                };

                for id in entries.exports.iter().chain(&entries.zombies) {
                    let Some(pkg) = inner
                        .entry(*id)
                        .and_then(|e| inner.packages.get(&e.name))
                        .filter(|pkg| pkg.provider == Some(*id))
                    else {
                        continue;
                    };

                    for importer in inner.importer_bundles(pkg, self.host.as_ref()) {
                        if affected.insert(importer) {
                            debug!("{} is affected through {}", importer, pkg.name);
                            frontier.push(importer);
                        }
                    }
                }
            }

            affected
        })
    }
}
