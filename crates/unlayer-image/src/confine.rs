//! Lexical path normalization and destination-root confinement.

use std::path::{Component, Path, PathBuf};

use unlayer_common::error::{Result, UnlayerError};

/// Resolves `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above a root; on relative paths a leading `..` that
/// cannot be resolved is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = out.has_root() && out.parent().is_none();
                let unresolved = out
                    .components()
                    .next_back()
                    .is_none_or(|last| last == Component::ParentDir);
                if at_root {
                    continue;
                }
                if unresolved {
                    out.push("..");
                } else {
                    let _ = out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Normalizes `candidate` and requires it to stay under `root`.
///
/// `root` must already be normalized.
///
/// # Errors
///
/// Returns `UnlayerError::PathEscape` if the normalized path leaves `root`.
pub fn confine(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let normalized = normalize(candidate);
    if normalized.starts_with(root) {
        Ok(normalized)
    } else {
        Err(UnlayerError::PathEscape {
            path: normalized,
            root: root.to_path_buf(),
        })
    }
}

/// Resolves where a symlink at `link_path` should point on disk.
///
/// Absolute targets are re-rooted at `root`; relative targets are taken
/// relative to the link's directory.
///
/// # Errors
///
/// Returns `UnlayerError::PathEscape` if the target leaves `root`.
pub fn resolve_link_target(root: &Path, link_path: &Path, target: &Path) -> Result<PathBuf> {
    let resolved = if target.has_root() {
        root.join(strip_root(target))
    } else {
        link_path.parent().unwrap_or(root).join(target)
    };
    confine(root, &resolved)
}

fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect()
}
