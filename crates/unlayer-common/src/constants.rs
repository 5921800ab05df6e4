//! Archive layout names, whiteout markers, and CLI defaults.

/// Name of the top-level entry listing the images in a saved archive.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Base-name prefix of a whiteout marker.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Base name of the marker that makes its directory opaque.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Prefix of content-addressed layer names in OCI-layout saves.
pub const SHA256_BLOB_PREFIX: &str = "blobs/sha256/";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Registry prefixes that are implied when absent from an image reference.
///
/// Ordered longest first so the most specific prefix is stripped.
pub const DEFAULT_REGISTRY_PREFIXES: &[&str] = &[
    "index.docker.io/library/",
    "docker.io/library/",
    "index.docker.io/",
    "docker.io/",
];

/// Tag assumed when a reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Container CLI used to save and pull images.
pub const DEFAULT_RUNTIME: &str = "docker";

/// Environment variable overriding the container CLI.
pub const RUNTIME_ENV: &str = "UNLAYER_RUNTIME";

/// Application name used in CLI output.
pub const APP_NAME: &str = "unlayer";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "unlayer";
