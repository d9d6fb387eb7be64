use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use vigil::{
    measure_image, AstromaticSuite, JsonlRecorder, LogOptions, MeasureOptions, TelescopeConfig,
};

/// Measure the quality of one astronomical image.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// FITS image to measure.
    filename: PathBuf,

    /// Telescope configuration YAML. Falls back to the VIGIL_TELESCOPE
    /// environment variable when omitted.
    #[arg(short, long)]
    telescope: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    /// Skip previews and diagnostic plots.
    #[arg(long)]
    no_graphics: bool,

    /// Measure the photometric zero point.
    #[arg(short = 'z', long = "zp")]
    zero_point: bool,

    /// Do not write a record of the measurement.
    #[arg(short = 'n', long = "norecord")]
    no_record: bool,

    /// Truncate the per-image log file instead of appending to it.
    #[arg(long)]
    clobber_logs: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = telescope_config_path(cli.telescope.as_deref())?;
    let config = TelescopeConfig::load(&config_path)
        .with_context(|| format!("Failed to load telescope config: {}", config_path.display()))?;

    // Artifacts land next to the image being measured.
    let output_dir = output_dir_for(&cli.filename);

    let options = MeasureOptions {
        analyze: true,
        zero_point: cli.zero_point,
        graphics: !cli.no_graphics,
        record: !cli.no_record,
        logging: Some(LogOptions {
            verbose: cli.verbose,
            clobber: cli.clobber_logs,
        }),
    };

    let mut tools = AstromaticSuite::from_config(&config);
    let mut recorder = JsonlRecorder::new(&output_dir);

    measure_image(
        &cli.filename,
        &output_dir,
        &config,
        &mut tools,
        &mut recorder,
        &options,
    )?;

    Ok(())
}

fn telescope_config_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    std::env::var_os("VIGIL_TELESCOPE")
        .map(PathBuf::from)
        .context("No telescope configuration: pass --telescope or set VIGIL_TELESCOPE")
}

fn output_dir_for(image: &Path) -> PathBuf {
    match image.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
