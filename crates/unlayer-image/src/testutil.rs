//! Builders for saved-image archives used by unit tests.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tar::{EntryType, Header};

enum FixtureEntry {
    Dir(String, u32),
    File(String, Vec<u8>, u32),
    Symlink(String, String),
    Hardlink(String, String),
    Fifo(String),
}

/// One layer archive inside an [`ImageFixture`].
pub struct LayerFixture {
    name: Option<String>,
    entries: Vec<FixtureEntry>,
    gzip: bool,
}

impl LayerFixture {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            entries: Vec::new(),
            gzip: false,
        }
    }

    /// Layer named `blobs/sha256/<digest of its bytes>`.
    pub fn content_addressed() -> Self {
        Self {
            name: None,
            entries: Vec::new(),
            gzip: false,
        }
    }

    pub fn dir(self, path: &str) -> Self {
        self.dir_with_mode(path, 0o755)
    }

    pub fn dir_with_mode(mut self, path: &str, mode: u32) -> Self {
        self.entries.push(FixtureEntry::Dir(path.to_string(), mode));
        self
    }

    pub fn file(self, path: &str, data: &[u8]) -> Self {
        self.file_with_mode(path, data, 0o644)
    }

    pub fn file_with_mode(mut self, path: &str, data: &[u8], mode: u32) -> Self {
        self.entries
            .push(FixtureEntry::File(path.to_string(), data.to_vec(), mode));
        self
    }

    pub fn whiteout(self, path: &str) -> Self {
        self.file(path, b"")
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.entries
            .push(FixtureEntry::Symlink(path.to_string(), target.to_string()));
        self
    }

    pub fn hardlink(mut self, path: &str, target: &str) -> Self {
        self.entries
            .push(FixtureEntry::Hardlink(path.to_string(), target.to_string()));
        self
    }

    pub fn fifo(mut self, path: &str) -> Self {
        self.entries.push(FixtureEntry::Fifo(path.to_string()));
        self
    }

    pub fn gzip(mut self) -> Self {
        self.gzip = true;
        self
    }

    fn build(&self) -> (String, Vec<u8>) {
        let mut builder = tar::Builder::new(Vec::new());
        for entry in &self.entries {
            let empty: &[u8] = &[];
            let (path, entry_type, mode, data, link) = match entry {
                FixtureEntry::Dir(path, mode) => (path.as_str(), EntryType::Directory, *mode, empty, None),
                FixtureEntry::File(path, data, mode) => {
                    (path.as_str(), EntryType::Regular, *mode, data.as_slice(), None)
                }
                FixtureEntry::Symlink(path, target) => {
                    (path.as_str(), EntryType::Symlink, 0o777, empty, Some(target.as_str()))
                }
                FixtureEntry::Hardlink(path, target) => {
                    (path.as_str(), EntryType::Link, 0o644, empty, Some(target.as_str()))
                }
                FixtureEntry::Fifo(path) => (path.as_str(), EntryType::Fifo, 0o644, empty, None),
            };
            append_raw(&mut builder, path, entry_type, mode, data, link);
        }
        let mut bytes = builder.into_inner().expect("failed to finish layer tar");

        if self.gzip {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&bytes).expect("failed to compress layer");
            bytes = encoder.finish().expect("failed to finish gzip");
        }

        let name = self.name.clone().unwrap_or_else(|| {
            format!("blobs/sha256/{:x}", Sha256::digest(&bytes))
        });
        (name, bytes)
    }
}

/// Writes a header with the name copied verbatim, so `..` survives.
fn append_raw<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    entry_type: EntryType,
    mode: u32,
    data: &[u8],
    link: Option<&str>,
) {
    let mut header = Header::new_gnu();
    let name = header.as_gnu_mut().expect("gnu header").name.as_mut_slice();
    name[..path.len()].copy_from_slice(path.as_bytes());
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(data.len() as u64);
    if let Some(link) = link {
        header.set_link_name(link).expect("failed to set link name");
    }
    header.set_cksum();
    builder.append(&header, data).expect("failed to append entry");
}

/// A `docker save` style archive with one tagged image.
pub struct ImageFixture {
    tag: String,
    layers: Vec<LayerFixture>,
}

impl ImageFixture {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            layers: Vec::new(),
        }
    }

    /// Appends a layer; later layers are newer.
    pub fn layer(mut self, layer: LayerFixture) -> Self {
        self.layers.push(layer);
        self
    }

    /// Writes `image.tar` under `dir` and returns its path.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let built: Vec<(String, Vec<u8>)> = self.layers.iter().map(LayerFixture::build).collect();
        let manifest = serde_json::json!([{
            "Config": "config.json",
            "RepoTags": [self.tag],
            "Layers": built.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
        }]);
        let manifest = serde_json::to_vec(&manifest).expect("failed to encode manifest");

        let path = dir.join("image.tar");
        let file = std::fs::File::create(&path).expect("failed to create image tar");
        let mut builder = tar::Builder::new(file);
        for (name, bytes) in &built {
            append_raw(&mut builder, name, EntryType::Regular, 0o644, bytes, None);
        }
        append_raw(&mut builder, "config.json", EntryType::Regular, 0o644, b"{}", None);
        append_raw(&mut builder, "manifest.json", EntryType::Regular, 0o644, &manifest, None);
        builder.finish().expect("failed to finish image tar");
        path
    }

    /// Layer names recorded in a written archive's manifest.
    pub fn layer_names_in(archive: &Path) -> Vec<String> {
        let records = crate::manifest::read_manifest(archive).expect("read manifest");
        records
            .into_iter()
            .next()
            .expect("one record")
            .layers
    }
}
