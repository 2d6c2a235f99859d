use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use facerec_core::{recognize_face, Config, Report};
use tracing_subscriber::EnvFilter;

/// Print the embedding of the first face found in an image.
///
/// Stdout is `success` followed by a JSON array of floats, or `fail` when
/// no face is detected. Logs go to stderr (`RUST_LOG`).
///
/// `--help` is the only flag; it prints usage to stdout and exits 0.
#[derive(Parser)]
#[command(name = "facerec")]
struct Cli {
    /// Path to the image file
    image: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(
        image = %cli.image.display(),
        model_dir = %config.model_dir.display(),
        "starting"
    );

    let embedding = recognize_face(&cli.image, &config)
        .with_context(|| format!("face recognition failed for {}", cli.image.display()))?;

    let report = Report::from(embedding);
    tracing::info!(success = report.is_success(), "done");

    report
        .write_to(&mut io::stdout().lock())
        .context("failed to write result to stdout")?;

    Ok(())
}
