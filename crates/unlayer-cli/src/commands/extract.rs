//! `unlayer extract`: Write the merged filesystem of an image into a directory.

use std::path::PathBuf;

use clap::Args;
use unlayer_common::config::UnlayerConfig;

use super::ImageArgs;
use crate::output;

/// Arguments for the `extract` command.
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Image to unpack.
    #[command(flatten)]
    pub image: ImageArgs,

    /// Destination directory; created if missing.
    pub destination: PathBuf,
}

/// Executes the `extract` command.
///
/// # Errors
///
/// Returns an error if acquisition, whiteout resolution, or extraction fails.
pub fn execute(args: &ExtractArgs, config: &UnlayerConfig) -> anyhow::Result<()> {
    tracing::info!(
        image = %args.image.image,
        destination = %args.destination.display(),
        "extracting image"
    );
    let (reference, archive) = args.image.acquire(config)?;
    let summary = unlayer_image::unpack(archive.path(), &reference, &args.destination, config)
        .map_err(output::surface)?;

    output::print_summary(&reference, &args.destination, &summary);
    Ok(())
}
