//! CLI command definitions and dispatch.

pub mod extract;
pub mod inspect;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use unlayer_common::config::UnlayerConfig;
use unlayer_common::constants::{DEFAULT_RUNTIME, RUNTIME_ENV};
use unlayer_common::types::ImageReference;
use unlayer_image::source::{self, AcquiredArchive, ImageSource};

use crate::output;

/// unlayer: unpack saved container images into a plain directory.
#[derive(Parser, Debug)]
#[command(name = "unlayer", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Emit per-entry progress on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Container CLI used to pull and save images.
    #[arg(long, global = true, env = RUNTIME_ENV, default_value = DEFAULT_RUNTIME)]
    pub runtime: String,
}

impl Cli {
    /// Builds the run configuration from global flags and the subcommand's image flags.
    pub fn config(&self) -> UnlayerConfig {
        let image = match &self.command {
            Command::Extract(args) => &args.image,
            Command::Inspect(args) => &args.image,
        };
        UnlayerConfig {
            runtime: self.runtime.clone(),
            pull: image.pull,
            verbose: self.verbose,
            verify_digests: !image.no_verify,
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the merged filesystem of an image into a directory.
    Extract(extract::ExtractArgs),
    /// Show the layers of an image and what survives whiteout resolution.
    Inspect(inspect::InspectArgs),
}

/// Image selection flags shared by every subcommand.
#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Image reference, e.g. `alpine:3.20`.
    pub image: String,

    /// Read an existing `docker save` archive instead of invoking the runtime.
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// Pull the image before saving it.
    #[arg(long, conflicts_with = "archive")]
    pub pull: bool,

    /// Skip SHA-256 verification of content-addressed layers.
    #[arg(long)]
    pub no_verify: bool,
}

impl ImageArgs {
    /// Parses the reference and obtains a local archive for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is empty or the archive cannot be obtained.
    pub fn acquire(
        &self,
        config: &UnlayerConfig,
    ) -> anyhow::Result<(ImageReference, AcquiredArchive)> {
        let reference = ImageReference::parse(&self.image).map_err(output::surface)?;
        let source = self.archive.clone().map_or_else(
            || ImageSource::Runtime {
                program: config.runtime.clone(),
                pull: config.pull,
            },
            ImageSource::Archive,
        );
        let archive = source::acquire(&source, &reference).map_err(output::surface)?;
        Ok((reference, archive))
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(command: Command, config: &UnlayerConfig) -> anyhow::Result<()> {
    match command {
        Command::Extract(args) => extract::execute(&args, config),
        Command::Inspect(args) => inspect::execute(&args, config),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn extract_flags_map_to_config() {
        let cli = Cli::try_parse_from([
            "unlayer", "extract", "alpine", "/tmp/out", "--pull", "--runtime", "podman", "-v",
        ])
        .expect("parse");
        let config = cli.config();
        assert_eq!(config.runtime, "podman");
        assert!(config.pull);
        assert!(config.verbose);
        assert!(config.verify_digests);
    }

    #[test]
    fn archive_conflicts_with_pull() {
        let result = Cli::try_parse_from([
            "unlayer", "inspect", "alpine", "--archive", "img.tar", "--pull",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn inspect_no_verify_disables_digest_checks() {
        let cli = Cli::try_parse_from(["unlayer", "inspect", "alpine", "--no-verify"])
            .expect("parse");
        assert!(!cli.config().verify_digests);
    }
}
