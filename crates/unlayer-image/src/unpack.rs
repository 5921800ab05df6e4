//! The unpack pipeline: manifest, catalogs, digest, extraction.

use std::path::Path;

use unlayer_common::config::UnlayerConfig;
use unlayer_common::error::Result;
use unlayer_common::types::ImageReference;

use crate::catalog;
use crate::digest::{self, LayerDigest};
use crate::extract::{self, ExtractSummary};
use crate::manifest::{self, ManifestRecord};

/// Per-layer figures reported by [`inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    /// Layer archive name.
    pub name: String,
    /// Entries the layer declares, whiteout markers included.
    pub declared: usize,
    /// Declared bytes of regular files.
    pub declared_bytes: u64,
    /// Digest outcome for the layer.
    pub digest: LayerDigest,
}

/// What an image would unpack to, without writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
    /// Selected manifest record.
    pub record: ManifestRecord,
    /// One report per layer, oldest first.
    pub layers: Vec<LayerReport>,
}

impl ImageReport {
    /// Total surviving entries across layers.
    pub fn survivors(&self) -> usize {
        self.layers.iter().map(|layer| layer.digest.survivors).sum()
    }
}

/// Unpacks the image tagged `reference` from `archive` into `destination`.
///
/// # Errors
///
/// Fails on the first error of any stage; files already written stay.
pub fn unpack(
    archive: &Path,
    reference: &ImageReference,
    destination: &Path,
    config: &UnlayerConfig,
) -> Result<ExtractSummary> {
    let record = manifest::find_record(archive, reference)?;
    let mut catalogs = catalog::parse_layers(archive, &record.layers, config.verify_digests)?;
    let _ = digest::digest_layers(&mut catalogs);
    extract::extract(archive, &catalogs, destination)
}

/// Resolves the merged view of `reference` and reports it per layer.
///
/// # Errors
///
/// Returns the manifest and catalog errors of the unpack pipeline.
pub fn inspect(
    archive: &Path,
    reference: &ImageReference,
    config: &UnlayerConfig,
) -> Result<ImageReport> {
    let record = manifest::find_record(archive, reference)?;
    let mut catalogs = catalog::parse_layers(archive, &record.layers, config.verify_digests)?;
    let declared: Vec<(usize, u64)> = catalogs
        .iter()
        .map(|catalog| (catalog.entries.len(), catalog.file_bytes()))
        .collect();
    let digests = digest::digest_layers(&mut catalogs);

    let layers = catalogs
        .iter()
        .zip(declared)
        .zip(digests)
        .map(|((catalog, (declared, declared_bytes)), digest)| LayerReport {
            name: catalog.name.clone(),
            declared,
            declared_bytes,
            digest,
        })
        .collect();
    Ok(ImageReport { record, layers })
}
