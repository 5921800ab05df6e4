//! `unlayer inspect`: Show the layers of an image and their surviving entries.

use clap::Args;
use unlayer_common::config::UnlayerConfig;

use super::ImageArgs;
use crate::output;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image to inspect.
    #[command(flatten)]
    pub image: ImageArgs,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the archive cannot be obtained or read.
pub fn execute(args: &InspectArgs, config: &UnlayerConfig) -> anyhow::Result<()> {
    let (reference, archive) = args.image.acquire(config)?;
    let report =
        unlayer_image::inspect(archive.path(), &reference, config).map_err(output::surface)?;
    output::print_report(&report);
    Ok(())
}
