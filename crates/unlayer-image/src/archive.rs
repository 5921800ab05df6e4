//! Tar entry source over a saved-image archive and its nested layers.
//!
//! The same reader serves the top-level archive file and every layer
//! archive embedded in it: a nested layer is decoded from the byte stream
//! of its outer entry. Each pass opens its own handle, and the handle is
//! released when the archive value goes out of scope.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;
use unlayer_common::error::{Result, UnlayerError};

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Filesystem object type of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard links, device nodes, fifos, and metadata records.
    Other,
}

impl EntryKind {
    fn from_entry_type(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => Self::File,
            EntryType::Directory => Self::Directory,
            EntryType::Symlink => Self::Symlink,
            _ => Self::Other,
        }
    }
}

/// Opens the top-level archive at `path` for one forward pass.
///
/// # Errors
///
/// Returns `UnlayerError::Io` if the file cannot be opened.
pub fn open_archive(path: &Path) -> Result<tar::Archive<BufReader<File>>> {
    let file = File::open(path).map_err(|e| UnlayerError::io(path, e))?;
    Ok(tar::Archive::new(BufReader::new(file)))
}

/// Wraps the content of a layer entry as a nested archive.
///
/// Layers that start with the gzip magic bytes are decompressed on the fly.
///
/// # Errors
///
/// Returns `UnlayerError::Io` if the first bytes of the stream cannot be read.
pub fn open_layer<'r, R: Read + 'r>(
    reader: R,
    layer: &str,
) -> Result<tar::Archive<Box<dyn Read + 'r>>> {
    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf().map_err(|e| UnlayerError::io(layer, e))?;
    let stream: Box<dyn Read + 'r> = if head.starts_with(&GZIP_MAGIC) {
        tracing::debug!(layer, "layer is gzip-compressed");
        Box::new(GzDecoder::new(buffered))
    } else {
        Box::new(buffered)
    };
    Ok(tar::Archive::new(stream))
}

/// Forward-only sequence of entries from one archive.
pub struct EntryStream<'a, R: 'a + Read> {
    entries: tar::Entries<'a, R>,
    source: String,
}

impl<'a, R: 'a + Read> EntryStream<'a, R> {
    /// Starts reading entries from `archive`.
    ///
    /// `source` names the archive in error messages.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::Io` if the archive cannot be read.
    pub fn new(archive: &'a mut tar::Archive<R>, source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let entries = archive
            .entries()
            .map_err(|e| UnlayerError::io(&source, e))?;
        Ok(Self { entries, source })
    }

    /// Produces the next entry, or `None` at the end of the archive.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::Format` if an entry header is corrupt.
    pub fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'a, R>>> {
        let Some(next) = self.entries.next() else {
            return Ok(None);
        };
        let inner = next.map_err(|e| {
            UnlayerError::format(format!("unreadable entry in {}: {e}", self.source))
        })?;
        let name = inner
            .path()
            .map_err(|e| UnlayerError::format(format!("bad entry name in {}: {e}", self.source)))?
            .into_owned();
        let kind = EntryKind::from_entry_type(inner.header().entry_type());
        Ok(Some(ArchiveEntry { inner, name, kind }))
    }
}

/// One entry of an archive with its metadata and readable content.
pub struct ArchiveEntry<'a, R: 'a + Read> {
    inner: tar::Entry<'a, R>,
    name: PathBuf,
    kind: EntryKind,
}

impl<R: Read> ArchiveEntry<'_, R> {
    /// Entry name exactly as stored.
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Archive-relative path, or `None` for the archive root itself.
    pub fn path(&self) -> Option<PathBuf> {
        clean_path(&self.name)
    }

    /// Entry type.
    pub const fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Declared content size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.size()
    }

    /// Mode bits, when the header carries a readable value.
    pub fn mode(&self) -> Option<u32> {
        self.inner.header().mode().ok()
    }

    /// Target of a link entry.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::Format` if the link name cannot be decoded.
    pub fn link_target(&self) -> Result<Option<PathBuf>> {
        self.inner
            .link_name()
            .map(|target| target.map(Cow::into_owned))
            .map_err(|e| {
                UnlayerError::format(format!(
                    "bad link target for {}: {e}",
                    self.name.display()
                ))
            })
    }
}

impl<R: Read> Read for ArchiveEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Makes an entry name archive-relative.
///
/// Drops root and `.` components and trailing separators. `..` components
/// are kept so that confinement checks can reject them later.
pub fn clean_path(name: &Path) -> Option<PathBuf> {
    let cleaned: PathBuf = name
        .components()
        .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
        .collect();
    if cleaned.as_os_str().is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Canonical form of a layer archive name, shared by both archive passes.
///
/// Manifests may list `./l1/layer.tar` or `/l1/layer.tar` for the entry
/// stored as `l1/layer.tar`.
pub fn layer_key(name: &str) -> String {
    clean_path(Path::new(name)).map_or_else(
        || name.to_string(),
        |path| path.to_string_lossy().into_owned(),
    )
}
