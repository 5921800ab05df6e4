//! Second archive pass: writing surviving entries to the destination.
//!
//! Every output path and symlink target is confined to the destination
//! root. Nothing written before a failure is rolled back.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use unlayer_common::error::{Result, UnlayerError};

use crate::archive::{self, ArchiveEntry, EntryKind, EntryStream};
use crate::catalog::LayerCatalog;
use crate::confine;

/// Counts of what an extraction wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Directories created or updated.
    pub directories: u64,
    /// Regular files written.
    pub files: u64,
    /// Symbolic links created.
    pub symlinks: u64,
    /// Bytes of file content written.
    pub bytes: u64,
}

/// Layer and kind of the entry that wins a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Survivor {
    /// Layer archive that provides the entry, in [`archive::layer_key`] form.
    pub layer: String,
    /// Entry type.
    pub kind: EntryKind,
}

/// Path to winning entry, across all digested catalogs.
#[derive(Debug, Default)]
pub struct SurvivorMap {
    winners: HashMap<PathBuf, Survivor>,
    layers: HashSet<String>,
}

impl SurvivorMap {
    /// Builds the map from digested catalogs in manifest order.
    ///
    /// When several layers still declare a path, the newest one wins.
    pub fn from_catalogs(catalogs: &[LayerCatalog]) -> Self {
        let mut winners: HashMap<PathBuf, Survivor> = HashMap::new();
        for catalog in catalogs.iter().rev() {
            let layer = archive::layer_key(&catalog.name);
            for entry in &catalog.entries {
                let _ = winners.entry(entry.path.clone()).or_insert_with(|| Survivor {
                    layer: layer.clone(),
                    kind: entry.kind,
                });
            }
        }
        let layers = winners.values().map(|survivor| survivor.layer.clone()).collect();
        Self { winners, layers }
    }

    /// Winning entry for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<&Survivor> {
        self.winners.get(path)
    }

    /// Whether `layer` provides the winning entry of `kind` at `path`.
    pub fn is_winner(&self, path: &Path, layer: &str, kind: EntryKind) -> bool {
        self.get(path)
            .is_some_and(|survivor| survivor.layer == layer && survivor.kind == kind)
    }

    /// Number of surviving paths.
    pub fn len(&self) -> usize {
        self.winners.len()
    }

    /// Whether no path survived.
    pub fn is_empty(&self) -> bool {
        self.winners.is_empty()
    }

    /// Whether any surviving entry comes from `layer`.
    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.contains(layer)
    }
}

/// Writes surviving entries of one image into a destination directory.
#[derive(Debug)]
pub struct Extractor {
    root: PathBuf,
    survivors: SurvivorMap,
    pending_modes: Vec<(PathBuf, u32)>,
    summary: ExtractSummary,
}

impl Extractor {
    /// Prepares extraction into `destination`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::Io` if the destination cannot be created or resolved.
    pub fn new(destination: &Path, survivors: SurvivorMap) -> Result<Self> {
        fs::create_dir_all(destination).map_err(|e| UnlayerError::io(destination, e))?;
        let root = fs::canonicalize(destination).map_err(|e| UnlayerError::io(destination, e))?;
        Ok(Self {
            root,
            survivors,
            pending_modes: Vec::new(),
            summary: ExtractSummary::default(),
        })
    }

    /// Absolute destination root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the outer archive and writes every winning nested entry.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::PathEscape` on the first entry that would leave
    /// the destination, or any archive or filesystem error.
    pub fn run(mut self, archive_path: &Path) -> Result<ExtractSummary> {
        let mut outer = archive::open_archive(archive_path)?;
        let mut entries = EntryStream::new(&mut outer, archive_path.display().to_string())?;

        while let Some(mut entry) = entries.next_entry()? {
            let layer = archive::layer_key(&entry.name().to_string_lossy());
            if !self.survivors.has_layer(&layer) {
                continue;
            }
            tracing::debug!(layer = %layer, "extracting layer");
            let mut nested = archive::open_layer(&mut entry, &layer)?;
            let mut stream = EntryStream::new(&mut nested, layer.as_str())?;
            while let Some(mut nested_entry) = stream.next_entry()? {
                self.write_entry(&layer, &mut nested_entry)?;
            }
        }

        self.apply_directory_modes()?;
        tracing::info!(
            root = %self.root.display(),
            directories = self.summary.directories,
            files = self.summary.files,
            symlinks = self.summary.symlinks,
            bytes = self.summary.bytes,
            "extraction complete"
        );
        Ok(self.summary)
    }

    /// Writes one nested entry if its layer wins that path.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::PathEscape` or a filesystem error.
    pub fn write_entry<R: Read>(
        &mut self,
        layer: &str,
        entry: &mut ArchiveEntry<'_, R>,
    ) -> Result<()> {
        let Some(path) = entry.path() else {
            return Ok(());
        };
        let kind = entry.kind();
        if !self.survivors.is_winner(&path, layer, kind) {
            return Ok(());
        }

        let output = confine::confine(&self.root, &self.root.join(&path))?;
        match kind {
            EntryKind::Directory => self.write_directory(&output, entry.mode()),
            EntryKind::File => self.write_file(&output, entry),
            EntryKind::Symlink => {
                let target = entry.link_target()?.ok_or_else(|| {
                    UnlayerError::format(format!("symlink {} has no target", path.display()))
                })?;
                self.write_symlink(&output, &target)
            }
            EntryKind::Other => Ok(()),
        }
    }

    fn write_directory(&mut self, output: &Path, mode: Option<u32>) -> Result<()> {
        fs::create_dir_all(output).map_err(|e| UnlayerError::io(output, e))?;
        if let Some(mode) = mode {
            self.pending_modes.push((output.to_path_buf(), mode));
        }
        self.summary.directories += 1;
        Ok(())
    }

    fn write_file<R: Read>(
        &mut self,
        output: &Path,
        entry: &mut ArchiveEntry<'_, R>,
    ) -> Result<()> {
        ensure_parent(output)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .map_err(|e| UnlayerError::io(output, e))?;
        let written = io::copy(entry, &mut file).map_err(|e| UnlayerError::io(output, e))?;
        drop(file);

        if let Some(mode) = entry.mode() {
            set_mode(output, mode)?;
        }
        tracing::debug!(path = %output.display(), bytes = written, "wrote file");
        self.summary.files += 1;
        self.summary.bytes += written;
        Ok(())
    }

    fn write_symlink(&mut self, output: &Path, target: &Path) -> Result<()> {
        let resolved = confine::resolve_link_target(&self.root, output, target)?;
        ensure_parent(output)?;
        match fs::remove_file(output) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(UnlayerError::io(output, e)),
        }
        create_symlink(&resolved, output)?;
        tracing::debug!(link = %output.display(), target = %resolved.display(), "created symlink");
        self.summary.symlinks += 1;
        Ok(())
    }

    /// Applies directory modes deepest first, once their contents exist.
    fn apply_directory_modes(&mut self) -> Result<()> {
        let mut pending = std::mem::take(&mut self.pending_modes);
        pending.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, mode) in pending {
            set_mode(&path, mode)?;
        }
        Ok(())
    }
}

/// Writes the survivors of digested `catalogs` from `archive_path` into `destination`.
///
/// # Errors
///
/// See [`Extractor::run`].
pub fn extract(
    archive_path: &Path,
    catalogs: &[LayerCatalog],
    destination: &Path,
) -> Result<ExtractSummary> {
    let survivors = SurvivorMap::from_catalogs(catalogs);
    tracing::info!(
        paths = survivors.len(),
        destination = %destination.display(),
        "extracting survivors"
    );
    Extractor::new(destination, survivors)?.run(archive_path)
}

fn ensure_parent(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| UnlayerError::io(parent, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| UnlayerError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| UnlayerError::io(link, e))
}

/// Stub for non-Unix platforms.
///
/// # Errors
///
/// Always returns an error: symlink extraction requires a Unix host.
#[cfg(not(unix))]
fn create_symlink(_target: &Path, link: &Path) -> Result<()> {
    Err(UnlayerError::Config {
        message: format!("cannot create symlink {}: Unix required", link.display()),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::testutil::{ImageFixture, LayerFixture};

    fn catalog(name: &str, entries: &[(EntryKind, &str)]) -> LayerCatalog {
        LayerCatalog {
            name: name.to_string(),
            entries: entries
                .iter()
                .map(|(kind, path)| CatalogEntry::new(name, *kind, *path, 0))
                .collect(),
            loaded: true,
        }
    }

    #[test]
    fn survivor_map_prefers_newest_layer() {
        let catalogs = vec![
            catalog("l1", &[(EntryKind::Symlink, "bin/sh"), (EntryKind::Directory, "bin")]),
            catalog("l2", &[(EntryKind::File, "bin/sh"), (EntryKind::Directory, "bin")]),
        ];
        let map = SurvivorMap::from_catalogs(&catalogs);
        assert_eq!(map.len(), 2);
        assert!(map.is_winner(Path::new("bin/sh"), "l2", EntryKind::File));
        assert!(!map.is_winner(Path::new("bin/sh"), "l1", EntryKind::Symlink));
        assert!(map.is_winner(Path::new("bin"), "l2", EntryKind::Directory));
        assert!(!map.has_layer("l1"));
    }

    #[test]
    fn extract_writes_files_directories_and_modes() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(
                LayerFixture::new("l1/layer.tar")
                    .dir_with_mode("etc", 0o750)
                    .file_with_mode("etc/motd", b"welcome", 0o600),
            )
            .write(dir.path());
        let catalogs = vec![catalog(
            "l1/layer.tar",
            &[(EntryKind::Directory, "etc"), (EntryKind::File, "etc/motd")],
        )];

        let out = dir.path().join("rootfs");
        let summary = extract(&image, &catalogs, &out).expect("extract");

        assert_eq!(summary.files, 1);
        assert_eq!(summary.directories, 1);
        assert_eq!(summary.bytes, 7);
        assert_eq!(fs::read_to_string(out.join("etc/motd")).expect("read"), "welcome");
        let file_mode = fs::metadata(out.join("etc/motd")).expect("meta").permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = fs::metadata(out.join("etc")).expect("meta").permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o750);
    }

    #[test]
    fn extract_skips_entries_missing_from_survivors() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(LayerFixture::new("l1/layer.tar").file("a.txt", b"a").file("b.txt", b"b"))
            .write(dir.path());
        let catalogs = vec![catalog("l1/layer.tar", &[(EntryKind::File, "a.txt")])];

        let out = dir.path().join("rootfs");
        let _ = extract(&image, &catalogs, &out).expect("extract");
        assert!(out.join("a.txt").exists());
        assert!(!out.join("b.txt").exists());
    }

    #[test]
    fn extract_creates_missing_ancestors() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(LayerFixture::new("l1/layer.tar").file("deep/nested/file", b"x"))
            .write(dir.path());
        let catalogs = vec![catalog("l1/layer.tar", &[(EntryKind::File, "deep/nested/file")])];

        let out = dir.path().join("rootfs");
        let _ = extract(&image, &catalogs, &out).expect("extract");
        assert!(out.join("deep/nested/file").is_file());
    }

    #[test]
    fn extract_rejects_file_path_traversal() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(LayerFixture::new("l1/layer.tar").file("../escape.txt", b"x"))
            .write(dir.path());
        let catalogs = vec![catalog("l1/layer.tar", &[(EntryKind::File, "../escape.txt")])];

        let out = dir.path().join("rootfs");
        let err = extract(&image, &catalogs, &out).expect_err("escape");
        assert!(matches!(err, UnlayerError::PathEscape { .. }));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn extract_creates_confined_symlinks() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(
                LayerFixture::new("l1/layer.tar")
                    .file("bin/busybox", b"elf")
                    .symlink("bin/sh", "busybox")
                    .symlink("usr/bin/env", "/bin/busybox"),
            )
            .write(dir.path());
        let catalogs = vec![catalog(
            "l1/layer.tar",
            &[
                (EntryKind::File, "bin/busybox"),
                (EntryKind::Symlink, "bin/sh"),
                (EntryKind::Symlink, "usr/bin/env"),
            ],
        )];

        let out = dir.path().join("rootfs");
        let summary = extract(&image, &catalogs, &out).expect("extract");
        let root = fs::canonicalize(&out).expect("canonical root");

        assert_eq!(summary.symlinks, 2);
        assert_eq!(fs::read_link(out.join("bin/sh")).expect("link"), root.join("bin/busybox"));
        assert_eq!(
            fs::read_link(out.join("usr/bin/env")).expect("link"),
            root.join("bin/busybox")
        );
        assert_eq!(fs::read_to_string(out.join("bin/sh")).expect("follow"), "elf");
    }

    #[test]
    fn extract_replaces_existing_symlink() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(LayerFixture::new("l1/layer.tar").symlink("current", "releases/v2"))
            .write(dir.path());
        let catalogs = vec![catalog("l1/layer.tar", &[(EntryKind::Symlink, "current")])];

        let out = dir.path().join("rootfs");
        fs::create_dir_all(&out).expect("mkdir");
        std::os::unix::fs::symlink("releases/v1", out.join("current")).expect("seed link");

        let _ = extract(&image, &catalogs, &out).expect("extract");
        let root = fs::canonicalize(&out).expect("canonical root");
        assert_eq!(fs::read_link(out.join("current")).expect("link"), root.join("releases/v2"));
    }

    #[test]
    fn extract_rejects_escaping_symlink_target() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(LayerFixture::new("l1/layer.tar").symlink("a/b/link", "../../../etc/passwd"))
            .write(dir.path());
        let catalogs = vec![catalog("l1/layer.tar", &[(EntryKind::Symlink, "a/b/link")])];

        let out = dir.path().join("rootfs");
        let err = extract(&image, &catalogs, &out).expect_err("escape");
        assert!(matches!(err, UnlayerError::PathEscape { .. }));
        assert!(fs::symlink_metadata(out.join("a/b/link")).is_err());
    }

    #[test]
    fn read_only_directory_mode_is_applied_after_children() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let image = ImageFixture::new("app:1")
            .layer(
                LayerFixture::new("l1/layer.tar")
                    .dir_with_mode("ro", 0o555)
                    .file("ro/inside", b"x"),
            )
            .write(dir.path());
        let catalogs = vec![catalog(
            "l1/layer.tar",
            &[(EntryKind::Directory, "ro"), (EntryKind::File, "ro/inside")],
        )];

        let out = dir.path().join("rootfs");
        let _ = extract(&image, &catalogs, &out).expect("extract");
        assert!(out.join("ro/inside").is_file());
        let mode = fs::metadata(out.join("ro")).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o555);

        fs::set_permissions(out.join("ro"), fs::Permissions::from_mode(0o755)).expect("restore");
    }
}
