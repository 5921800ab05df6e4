//! Per-layer metadata catalogs.
//!
//! The first pass over the archive lists what every layer declares without
//! reading any file content. Whiteout markers are recognised here so the
//! digest can work purely on catalog entries.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use unlayer_common::constants::{OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
use unlayer_common::error::{Result, UnlayerError};

use crate::archive::{self, EntryKind, EntryStream};
use crate::hash::{self, DigestReader};

/// What a whiteout marker hides in older layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Whiteout {
    /// A single path is deleted.
    Path(PathBuf),
    /// Everything inside a directory is hidden.
    Opaque(PathBuf),
}

impl Whiteout {
    /// The path or directory being hidden.
    pub fn target(&self) -> &Path {
        match self {
            Self::Path(target) | Self::Opaque(target) => target,
        }
    }
}

/// Metadata of one path declared by a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Layer archive that declares the entry.
    pub layer: String,
    /// Entry type.
    pub kind: EntryKind,
    /// Archive-relative path.
    pub path: PathBuf,
    /// Declared content size.
    pub size: u64,
    /// Directory containing the entry; empty for top-level entries.
    pub parent: PathBuf,
    /// Final path component.
    pub base_name: String,
    /// Set when the entry is a whiteout marker.
    pub whiteout: Option<Whiteout>,
}

impl CatalogEntry {
    /// Builds an entry and classifies whiteout markers from its base name.
    pub fn new(layer: impl Into<String>, kind: EntryKind, path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let base_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let whiteout = if base_name == OPAQUE_WHITEOUT {
            Some(Whiteout::Opaque(parent.clone()))
        } else {
            base_name
                .strip_prefix(WHITEOUT_PREFIX)
                .filter(|hidden| !hidden.is_empty())
                .map(|hidden| Whiteout::Path(parent.join(hidden)))
        };

        Self {
            layer: layer.into(),
            kind,
            path,
            size,
            parent,
            base_name,
            whiteout,
        }
    }

    /// Target of the whiteout marker, if this is one.
    pub fn whiteout_target(&self) -> Option<&Path> {
        self.whiteout.as_ref().map(Whiteout::target)
    }

    /// Whether this entry marks its directory opaque.
    pub const fn is_opaque_whiteout(&self) -> bool {
        matches!(self.whiteout, Some(Whiteout::Opaque(_)))
    }

    /// Whether this entry is any kind of whiteout marker.
    pub const fn is_whiteout(&self) -> bool {
        self.whiteout.is_some()
    }
}

/// All entries declared by one layer, in archive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerCatalog {
    /// Layer archive name as listed in the manifest.
    pub name: String,
    /// Catalog entries; narrowed to survivors by the digest.
    pub entries: Vec<CatalogEntry>,
    /// Whether the layer archive was found in the outer archive.
    pub loaded: bool,
}

impl LayerCatalog {
    /// Creates an empty, not yet loaded catalog.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            loaded: false,
        }
    }

    /// Sum of the declared sizes of regular files.
    pub fn file_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::File && !entry.is_whiteout())
            .map(|entry| entry.size)
            .sum()
    }
}

/// Builds one catalog per layer name, in manifest order.
///
/// Layer names listed more than once share the contents of the single
/// archive entry. Entries other than files, directories, and symlinks are
/// dropped.
///
/// # Errors
///
/// Returns `UnlayerError::NotFound` if a layer never appears in the archive,
/// `UnlayerError::HashMismatch` if a content-addressed layer fails
/// verification, or an archive read error.
pub fn parse_layers(
    archive_path: &Path,
    layer_names: &[String],
    verify_digests: bool,
) -> Result<Vec<LayerCatalog>> {
    let mut catalogs: Vec<LayerCatalog> = layer_names.iter().map(LayerCatalog::new).collect();
    let mut wanted: HashMap<PathBuf, Vec<usize>> = HashMap::new();
    for (index, name) in layer_names.iter().enumerate() {
        if let Some(path) = archive::clean_path(Path::new(name)) {
            wanted.entry(path).or_default().push(index);
        }
    }

    let mut outer = archive::open_archive(archive_path)?;
    let mut entries = EntryStream::new(&mut outer, archive_path.display().to_string())?;

    while let Some(mut entry) = entries.next_entry()? {
        let Some(indices) = entry.path().and_then(|path| wanted.get(&path)) else {
            continue;
        };
        let Some(&first) = indices.first() else {
            continue;
        };
        if catalogs[first].loaded {
            continue;
        }

        let name = catalogs[first].name.clone();
        let layer_entries = read_layer(&mut entry, &name, verify_digests)?;
        tracing::info!(layer = %name, entries = layer_entries.len(), "parsed layer");

        for &index in indices {
            catalogs[index].entries.clone_from(&layer_entries);
            catalogs[index].loaded = true;
        }
    }

    if let Some(missing) = catalogs.iter().find(|catalog| !catalog.loaded) {
        return Err(UnlayerError::NotFound {
            kind: "layer archive",
            id: missing.name.clone(),
        });
    }
    Ok(catalogs)
}

/// Lists the entries of one nested layer archive.
fn read_layer<R: Read>(reader: R, layer: &str, verify_digests: bool) -> Result<Vec<CatalogEntry>> {
    let expected = if verify_digests {
        hash::expected_digest(layer)
    } else {
        None
    };
    let mut hashed = DigestReader::new(reader, expected.is_some());

    let entries = {
        let mut nested = archive::open_layer(&mut hashed, layer)?;
        let entries = collect_entries(&mut nested, layer)?;
        if expected.is_some() {
            let _ = io::copy(&mut nested.into_inner(), &mut io::sink())
                .map_err(|e| UnlayerError::io(layer, e))?;
        }
        entries
    };

    if let Some(expected) = expected {
        let _ = hashed.drain().map_err(|e| UnlayerError::io(layer, e))?;
        if let Some(actual) = hashed.finish()? {
            hash::validate_digest(layer, &expected, &actual)?;
        }
    }
    Ok(entries)
}

fn collect_entries<R: Read>(nested: &mut tar::Archive<R>, layer: &str) -> Result<Vec<CatalogEntry>> {
    let mut stream = EntryStream::new(nested, layer)?;
    let mut entries = Vec::new();

    while let Some(entry) = stream.next_entry()? {
        let Some(path) = entry.path() else {
            continue;
        };
        match entry.kind() {
            EntryKind::File | EntryKind::Directory | EntryKind::Symlink => {
                let catalog_entry = CatalogEntry::new(layer, entry.kind(), path, entry.size());
                if catalog_entry.base_name == WHITEOUT_PREFIX {
                    tracing::warn!(
                        layer,
                        path = %catalog_entry.path.display(),
                        "skipping whiteout marker without a target"
                    );
                    continue;
                }
                entries.push(catalog_entry);
            }
            EntryKind::Other => {
                tracing::warn!(layer, path = %path.display(), "skipping unsupported entry type");
            }
        }
    }
    Ok(entries)
}
