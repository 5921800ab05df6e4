//! Whiteout resolution across layers.
//!
//! Layers are folded from newest to oldest. Each layer is filtered against
//! what the newer layers have already claimed or hidden, and its survivors
//! then extend that state for the layers below it. No file content is read.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::archive::EntryKind;
use crate::catalog::{CatalogEntry, LayerCatalog, Whiteout};

/// Outcome of filtering one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerDigest {
    /// Entries left for extraction.
    pub survivors: usize,
    /// Entries hidden or shadowed by newer layers.
    pub rejected: usize,
    /// Whiteout markers that took effect.
    pub whiteouts: usize,
}

/// Occlusion state accumulated while walking layers newest to oldest.
///
/// Paths are only ever added, never removed.
#[derive(Debug, Default)]
pub struct WhiteoutDigest {
    occluded_dirs: HashSet<PathBuf>,
    claimed: HashSet<PathBuf>,
    deleted: HashSet<PathBuf>,
}

impl WhiteoutDigest {
    /// Creates an empty digest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `entry` is still visible given every newer layer folded so far.
    ///
    /// Only regular files are deduplicated against claimed paths; directories
    /// and symlinks are rejected by occlusion or deletion only. Anything
    /// beneath a newer file or symlink is rejected whatever its kind.
    pub fn is_allowed(&self, entry: &CatalogEntry) -> bool {
        if self.is_occluded(&entry.parent)
            || self.is_deleted(&entry.path)
            || self.is_under_claimed(&entry.parent)
        {
            return false;
        }
        !(entry.kind == EntryKind::File && self.claimed.contains(&entry.path))
    }

    /// Folds a surviving entry into the occlusion state.
    pub fn record_survivor(&mut self, entry: &CatalogEntry) {
        match &entry.whiteout {
            Some(Whiteout::Opaque(dir)) => {
                let _ = self.occluded_dirs.insert(dir.clone());
            }
            Some(Whiteout::Path(target)) => {
                let _ = self.deleted.insert(target.clone());
            }
            None if matches!(entry.kind, EntryKind::File | EntryKind::Symlink) => {
                let _ = self.claimed.insert(entry.path.clone());
            }
            None => {}
        }
    }

    /// Narrows `catalog` to its survivors and records them.
    ///
    /// Must be called once per layer, strictly from newest to oldest.
    /// Whiteout markers drive the state but are removed from the catalog.
    pub fn apply(&mut self, catalog: &mut LayerCatalog) -> LayerDigest {
        let declared = catalog.entries.len();
        catalog.entries.retain(|entry| {
            let allowed = self.is_allowed(entry);
            if !allowed {
                tracing::debug!(
                    layer = %catalog.name,
                    path = %entry.path.display(),
                    "entry hidden by newer layer"
                );
            }
            allowed
        });

        for entry in &catalog.entries {
            self.record_survivor(entry);
        }

        let allowed = catalog.entries.len();
        catalog.entries.retain(|entry| !entry.is_whiteout());

        LayerDigest {
            survivors: catalog.entries.len(),
            rejected: declared - allowed,
            whiteouts: allowed - catalog.entries.len(),
        }
    }

    /// Whether `dir` is an opaque directory or lies beneath one.
    fn is_occluded(&self, dir: &Path) -> bool {
        !self.occluded_dirs.is_empty() && dir.ancestors().any(|a| self.occluded_dirs.contains(a))
    }

    /// Whether `dir` or one of its ancestors is a file or symlink from a newer layer.
    fn is_under_claimed(&self, dir: &Path) -> bool {
        !self.claimed.is_empty() && dir.ancestors().any(|a| self.claimed.contains(a))
    }

    /// Whether `path` or one of its ancestors was whited out.
    fn is_deleted(&self, path: &Path) -> bool {
        !self.deleted.is_empty() && path.ancestors().any(|a| self.deleted.contains(a))
    }
}

/// Filters every catalog, newest layer first.
///
/// `catalogs` is in manifest order (oldest first). Returns the per-layer
/// results in the same order.
pub fn digest_layers(catalogs: &mut [LayerCatalog]) -> Vec<LayerDigest> {
    let mut digest = WhiteoutDigest::new();
    let mut results = vec![LayerDigest::default(); catalogs.len()];

    for (index, catalog) in catalogs.iter_mut().enumerate().rev() {
        results[index] = digest.apply(catalog);
        tracing::debug!(
            layer = %catalog.name,
            survivors = results[index].survivors,
            rejected = results[index].rejected,
            "digested layer"
        );
    }

    let survivors: usize = results.iter().map(|r| r.survivors).sum();
    tracing::info!(layers = catalogs.len(), survivors, "whiteouts resolved");
    results
}
