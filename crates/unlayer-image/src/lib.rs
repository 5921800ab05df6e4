//! # unlayer-image
//!
//! Reconstructs the merged filesystem of a saved multi-layer container
//! image and writes it to a directory, without running the image.
//!
//! Handles:
//! - **Archive**: Forward-only entry source over the outer archive and nested layers.
//! - **Manifest**: Selecting the image record by tag from `manifest.json`.
//! - **Catalog**: Metadata-only listing of each layer, whiteouts classified.
//! - **Digest**: Union-filesystem whiteout resolution, newest layer first.
//! - **Extract**: Confined writing of surviving files, directories, and symlinks.
//! - **Source**: Saving images through a container CLI into a temporary archive.
//! - **Hashing**: SHA-256 verification of content-addressed layers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod catalog;
pub mod confine;
pub mod digest;
pub mod extract;
pub mod hash;
pub mod manifest;
pub mod source;
pub mod unpack;

#[cfg(test)]
mod testutil;

pub use extract::ExtractSummary;
pub use unpack::{ImageReport, LayerReport, inspect, unpack};
