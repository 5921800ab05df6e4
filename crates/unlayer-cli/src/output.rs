//! Formatted output helpers for CLI commands.
//!
//! Provides the layer table, the extraction summary, human-readable
//! byte formatting, and verbatim reporting of failed runtime commands.

use std::path::Path;

use unlayer_common::error::UnlayerError;
use unlayer_common::types::ImageReference;
use unlayer_image::{ExtractSummary, ImageReport};

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Converts a library error for `main`, echoing captured command output first.
#[allow(clippy::print_stderr)]
pub fn surface(err: UnlayerError) -> anyhow::Error {
    if let UnlayerError::Process {
        program,
        args,
        stdout,
        stderr,
        ..
    } = &err
    {
        eprintln!("command: {program} {}", args.join(" "));
        if !stdout.trim().is_empty() {
            eprintln!("--- stdout ---\n{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            eprintln!("--- stderr ---\n{}", stderr.trim_end());
        }
    }
    anyhow::Error::new(err)
}

/// Prints what an extraction wrote.
#[allow(clippy::print_stdout)]
pub fn print_summary(reference: &ImageReference, destination: &Path, summary: &ExtractSummary) {
    println!("Unpacked {reference} into {}", destination.display());
    println!(
        "  {} directories, {} files ({}), {} symlinks",
        summary.directories,
        summary.files,
        format_bytes(summary.bytes),
        summary.symlinks
    );
}

/// Prints one row per layer, oldest first.
#[allow(clippy::print_stdout)]
pub fn print_report(report: &ImageReport) {
    let tags = report
        .record
        .repo_tags
        .as_deref()
        .map_or_else(|| "<none>".to_string(), |tags| tags.join(", "));
    println!("CONFIG\t{}", report.record.config);
    println!("TAGS\t{tags}");
    println!();
    println!("LAYER\tDECLARED\tSIZE\tWHITEOUTS\tHIDDEN\tSURVIVING");
    for layer in &report.layers {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            layer.name,
            layer.declared,
            format_bytes(layer.declared_bytes),
            layer.digest.whiteouts,
            layer.digest.rejected,
            layer.digest.survivors
        );
    }
    println!();
    println!(
        "{} entries survive across {} layers",
        report.survivors(),
        report.layers.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_displays_bytes() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn format_bytes_displays_kib() {
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }

    #[test]
    fn format_bytes_displays_mib() {
        assert_eq!(format_bytes(134_217_728), "128.0 MiB");
    }

    #[test]
    fn format_bytes_displays_gib() {
        assert_eq!(format_bytes(2_147_483_648), "2.0 GiB");
    }

    #[test]
    fn surface_keeps_error_message() {
        let err = surface(UnlayerError::NotFound {
            kind: "image record",
            id: "alpine:latest".into(),
        });
        assert_eq!(err.to_string(), "image record not found: alpine:latest");
    }
}
