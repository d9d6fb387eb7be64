//! End-to-end measurement of a single image.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::pipeline::{self, AnalysisTools, PipelineOptions};
use crate::preview;
use crate::record::{Recorder, RunSummary};
use crate::session::ImageSession;
use crate::telescope::TelescopeConfig;

/// Per-image log file handling.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub verbose: bool,
    pub clobber: bool,
}

/// Flags of one measurement run.
#[derive(Debug, Clone, Copy)]
pub struct MeasureOptions {
    pub analyze: bool,
    pub zero_point: bool,
    pub graphics: bool,
    pub record: bool,
    /// `None` leaves the global subscriber untouched (library callers
    /// and tests bring their own).
    pub logging: Option<LogOptions>,
}

impl Default for MeasureOptions {
    fn default() -> Self {
        Self {
            analyze: true,
            zero_point: false,
            graphics: true,
            record: true,
            logging: None,
        }
    }
}

/// Measures one image: analysis pipeline, previews, cleanup, record.
pub fn measure_image(
    path: &Path,
    output_dir: &Path,
    config: &TelescopeConfig,
    tools: &mut dyn AnalysisTools,
    recorder: &mut dyn Recorder,
    options: &MeasureOptions,
) -> Result<RunSummary> {
    let mut session = ImageSession::open(path, output_dir)
        .with_context(|| format!("Failed to open image: {}", path.display()))?;

    if let Some(log_options) = options.logging {
        session.attach_logging(log_options.verbose, log_options.clobber);
    }

    let pipeline_options = PipelineOptions {
        analyze: options.analyze,
        zero_point: options.zero_point,
        graphics: options.graphics,
    };
    pipeline::run(&mut session, config, tools, &pipeline_options)?;

    if options.record && options.graphics {
        preview::render_previews(&session)?;
    }

    session
        .clean_up()
        .context("Failed to release scratch directory")?;
    let elapsed = session.finalize_timing();

    let summary = RunSummary::from_session(&session, config);
    if options.record {
        recorder.record(&summary)?;
    }

    info!(process_time_s = elapsed.as_secs_f64(), "Done.");
    Ok(summary)
}
