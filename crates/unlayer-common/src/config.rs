//! Configuration model for an unpack run.

use serde::{Deserialize, Serialize};

/// Options shared by image acquisition and extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlayerConfig {
    /// Container CLI used to pull and save images.
    pub runtime: String,
    /// Pull the image before saving it.
    pub pull: bool,
    /// Emit per-entry progress.
    pub verbose: bool,
    /// Verify content-addressed layers against their SHA-256 names.
    pub verify_digests: bool,
}

impl Default for UnlayerConfig {
    fn default() -> Self {
        Self {
            runtime: crate::constants::DEFAULT_RUNTIME.to_string(),
            pull: false,
            verbose: false,
            verify_digests: true,
        }
    }
}
