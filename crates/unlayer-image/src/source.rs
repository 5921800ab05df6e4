//! Obtaining a saved-image archive to unpack.
//!
//! An image is either an archive already on disk or a reference that a
//! container CLI (`docker`, `podman`) saves into a temporary directory.
//! The temporary directory lives as long as the [`AcquiredArchive`] and is
//! removed when it is dropped, on success and failure alike.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use unlayer_common::error::{Result, UnlayerError};
use unlayer_common::types::ImageReference;

/// Where the image archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A saved-image archive already on disk.
    Archive(PathBuf),
    /// Save the image through a container CLI.
    Runtime {
        /// CLI binary name or path.
        program: String,
        /// Pull the image before saving it.
        pull: bool,
    },
}

/// A local archive path, plus the temporary directory backing it if any.
#[derive(Debug)]
pub struct AcquiredArchive {
    path: PathBuf,
    _workdir: Option<TempDir>,
}

impl AcquiredArchive {
    /// Path of the saved-image archive.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves `source` into a local archive for `reference`.
///
/// # Errors
///
/// Returns `UnlayerError::NotFound` if the archive or runtime binary does not
/// exist, and `UnlayerError::Process` if pulling or saving fails.
pub fn acquire(source: &ImageSource, reference: &ImageReference) -> Result<AcquiredArchive> {
    match source {
        ImageSource::Archive(path) => {
            if !path.is_file() {
                return Err(UnlayerError::NotFound {
                    kind: "image archive",
                    id: path.display().to_string(),
                });
            }
            tracing::info!(path = %path.display(), "using saved image archive");
            Ok(AcquiredArchive {
                path: path.clone(),
                _workdir: None,
            })
        }
        ImageSource::Runtime { program, pull } => save_with_runtime(program, *pull, reference),
    }
}

fn save_with_runtime(program: &str, pull: bool, reference: &ImageReference) -> Result<AcquiredArchive> {
    let binary = which::which(program).map_err(|_| UnlayerError::NotFound {
        kind: "container runtime",
        id: program.to_string(),
    })?;

    if pull {
        tracing::info!(image = %reference, runtime = program, "pulling image");
        let _ = run_command(&binary, &["pull".to_string(), reference.to_string()])?;
    }

    let workdir = tempfile::Builder::new()
        .prefix("unlayer-")
        .tempdir()
        .map_err(|e| UnlayerError::io(std::env::temp_dir(), e))?;
    let path = workdir.path().join("image.tar");

    tracing::info!(image = %reference, runtime = program, "saving image");
    let _ = run_command(
        &binary,
        &[
            "save".to_string(),
            "-o".to_string(),
            path.display().to_string(),
            reference.to_string(),
        ],
    )?;

    Ok(AcquiredArchive {
        path,
        _workdir: Some(workdir),
    })
}

/// Runs `program` to completion, capturing its output.
///
/// # Errors
///
/// Returns `UnlayerError::Io` if the program cannot be spawned and
/// `UnlayerError::Process` if it exits unsuccessfully.
pub fn run_command(program: &Path, args: &[String]) -> Result<String> {
    tracing::debug!(program = %program.display(), ?args, "running command");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| UnlayerError::io(program, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }
    Err(UnlayerError::Process {
        program: program.display().to_string(),
        args: args.to_vec(),
        status: output.status.to_string(),
        stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
