//! Domain primitive types used across the unlayer workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_REGISTRY_PREFIXES, DEFAULT_TAG, SHA256_HEX_LENGTH};
use crate::error::{Result, UnlayerError};

/// An image reference as typed by the user, e.g. `alpine` or `docker.io/library/nginx:1.27`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference(String);

impl ImageReference {
    /// Creates a reference from user input.
    ///
    /// # Errors
    ///
    /// Returns `UnlayerError::Config` if the reference is empty.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(UnlayerError::Config {
                message: "image reference is empty".into(),
            });
        }
        Ok(Self(raw.trim().to_string()))
    }

    /// Returns the reference exactly as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the form used to compare against archive `RepoTags`.
    #[must_use]
    pub fn normalized(&self) -> String {
        normalize_reference(&self.0)
    }

    /// Whether a `RepoTags` entry names this image.
    #[must_use]
    pub fn matches_tag(&self, repo_tag: &str) -> bool {
        normalize_reference(repo_tag) == self.normalized()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strips the implied default registry and appends the default tag when absent.
#[must_use]
pub fn normalize_reference(raw: &str) -> String {
    let mut reference = raw.trim();
    if let Some(rest) = DEFAULT_REGISTRY_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
    {
        reference = rest;
    }

    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    if reference.contains('@') || last_segment.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:{DEFAULT_TAG}")
    }
}

/// SHA-256 hash digest used for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != SHA256_HEX_LENGTH || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UnlayerError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}
