//! SHA-256 verification of content-addressed layers.
//!
//! OCI-layout saves name each layer after the digest of its raw bytes
//! (`blobs/sha256/<hex>`). The catalog pass hashes those bytes while the
//! nested archive is being decoded, so no extra read of the layer is needed.

use std::io::{self, Read};

use sha2::{Digest, Sha256};
use unlayer_common::constants::SHA256_BLOB_PREFIX;
use unlayer_common::error::{Result, UnlayerError};
use unlayer_common::types::Sha256Hash;

/// Returns the digest a layer name commits to, if it is content-addressed.
pub fn expected_digest(layer_name: &str) -> Option<Sha256Hash> {
    layer_name
        .strip_prefix(SHA256_BLOB_PREFIX)
        .and_then(|hex| Sha256Hash::from_hex(hex).ok())
}

/// Reader that hashes every byte passing through it.
pub struct DigestReader<R> {
    inner: R,
    hasher: Option<Sha256>,
}

impl<R: Read> DigestReader<R> {
    /// Wraps `inner`; hashing is skipped entirely when `enabled` is false.
    pub fn new(inner: R, enabled: bool) -> Self {
        Self {
            inner,
            hasher: enabled.then(Sha256::new),
        }
    }

    /// Consumes the rest of the stream so the digest covers all of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reader fails.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    /// Finishes hashing and returns the digest, if hashing was enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the digest cannot be represented.
    pub fn finish(self) -> Result<Option<Sha256Hash>> {
        self.hasher
            .map(|hasher| Sha256Hash::from_hex(format!("{:x}", hasher.finalize())))
            .transpose()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Compares a computed layer digest with the one its name commits to.
///
/// # Errors
///
/// Returns `UnlayerError::HashMismatch` if the hashes do not match.
pub fn validate_digest(layer_name: &str, expected: &Sha256Hash, actual: &Sha256Hash) -> Result<()> {
    tracing::debug!(layer = layer_name, digest = %actual, "validating layer digest");
    if expected == actual {
        Ok(())
    } else {
        Err(UnlayerError::HashMismatch {
            resource: layer_name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}
