//! Reading `manifest.json` from a saved-image archive.
//!
//! The manifest lists every image in the archive together with its tags
//! and its layer archives, oldest layer first.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use unlayer_common::constants::MANIFEST_ENTRY;
use unlayer_common::error::{Result, UnlayerError};
use unlayer_common::types::ImageReference;

use crate::archive::{self, EntryStream};

/// One image described by the archive manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Archive entry holding the image configuration.
    #[serde(rename = "Config")]
    pub config: String,
    /// Tags the image was saved under, if any.
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    /// Layer archive names, oldest first.
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

impl ManifestRecord {
    /// Whether any of this record's tags names `reference`.
    pub fn is_tagged(&self, reference: &ImageReference) -> bool {
        self.repo_tags
            .iter()
            .flatten()
            .any(|tag| reference.matches_tag(tag))
    }
}

/// Scans the archive for the manifest entry and decodes it.
///
/// # Errors
///
/// Returns `UnlayerError::NotFound` if the archive has no manifest entry,
/// `UnlayerError::Format` if the manifest is not a JSON array of records.
pub fn read_manifest(archive_path: &Path) -> Result<Vec<ManifestRecord>> {
    let mut outer = archive::open_archive(archive_path)?;
    let mut entries = EntryStream::new(&mut outer, archive_path.display().to_string())?;

    while let Some(mut entry) = entries.next_entry()? {
        if entry.path().as_deref() != Some(Path::new(MANIFEST_ENTRY)) {
            continue;
        }
        let mut raw = String::new();
        let _ = entry
            .read_to_string(&mut raw)
            .map_err(|e| UnlayerError::io(archive_path.join(MANIFEST_ENTRY), e))?;
        return decode_manifest(&raw);
    }

    Err(UnlayerError::NotFound {
        kind: "manifest entry",
        id: format!("{MANIFEST_ENTRY} in {}", archive_path.display()),
    })
}

/// Decodes manifest text into its records.
///
/// # Errors
///
/// Returns `UnlayerError::Serialization` for invalid JSON and
/// `UnlayerError::Format` if the value is not an array of records.
pub fn decode_manifest(raw: &str) -> Result<Vec<ManifestRecord>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_array() {
        return Err(UnlayerError::format(format!(
            "{MANIFEST_ENTRY} is not a list of image records"
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| UnlayerError::format(format!("invalid record in {MANIFEST_ENTRY}: {e}")))
}

/// Picks the record tagged with `reference`.
///
/// # Errors
///
/// Returns `UnlayerError::NotFound` if no record carries the tag.
pub fn select_record(
    records: Vec<ManifestRecord>,
    reference: &ImageReference,
) -> Result<ManifestRecord> {
    records
        .into_iter()
        .find(|record| record.is_tagged(reference))
        .ok_or_else(|| UnlayerError::NotFound {
            kind: "image record",
            id: reference.to_string(),
        })
}

/// Reads the manifest and selects the record for `reference`.
///
/// # Errors
///
/// Propagates the errors of [`read_manifest`] and [`select_record`].
pub fn find_record(archive_path: &Path, reference: &ImageReference) -> Result<ManifestRecord> {
    let records = read_manifest(archive_path)?;
    tracing::debug!(records = records.len(), "decoded archive manifest");
    let record = select_record(records, reference)?;
    tracing::info!(
        image = %reference,
        config = %record.config,
        layers = record.layers.len(),
        "selected image record"
    );
    Ok(record)
}
