//! Persistent summary records, one JSON line per measured image.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline;
use crate::session::ImageSession;
use crate::telescope::TelescopeConfig;

pub const RECORDS_FILE: &str = "vigil_records.jsonl";

/// Everything worth keeping from one measurement run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub measured_at: DateTime<Utc>,
    pub telescope: String,
    pub image: String,
    pub object: Option<String>,
    pub date_obs: Option<String>,
    pub filter: Option<String>,
    pub exposure_s: Option<f64>,
    pub airmass: Option<f64>,
    pub n_stars: usize,
    pub is_blank: bool,
    pub has_wcs: bool,
    pub fwhm_px: Option<f32>,
    pub fwhm_arcsec: Option<f32>,
    pub ellipticity: Option<f32>,
    pub pointing_error_arcmin: Option<f64>,
    pub zero_point_mag: Option<f32>,
    pub zero_point_err_mag: Option<f32>,
    pub process_time_s: f64,
}

impl RunSummary {
    /// Snapshot of a finished session. Call after the timing has been
    /// finalized so `process_time_s` carries the full run.
    pub fn from_session(session: &ImageSession, config: &TelescopeConfig) -> Self {
        Self {
            measured_at: Utc::now(),
            telescope: config.name.clone(),
            image: session.base_name().to_string(),
            object: session.header.object.clone(),
            date_obs: session.header.date_obs.clone(),
            filter: session.header.filter.clone(),
            exposure_s: session.header.exposure_s,
            airmass: session.header.airmass,
            n_stars: session.n_stars(),
            is_blank: pipeline::is_blank(session),
            has_wcs: session.wcs.is_some(),
            fwhm_px: session.fwhm.map(|stats| stats.median_px),
            fwhm_arcsec: session.fwhm.map(|stats| stats.arcsec),
            ellipticity: session.fwhm.map(|stats| stats.ellipticity),
            pointing_error_arcmin: session.pointing_error_arcmin,
            zero_point_mag: session.zero_point.map(|zp| zp.zp_mag),
            zero_point_err_mag: session.zero_point.map(|zp| zp.mad_mag),
            process_time_s: session
                .process_time()
                .map(|elapsed| elapsed.as_secs_f64())
                .unwrap_or(0.0),
        }
    }
}

/// Sink for run summaries.
pub trait Recorder {
    fn record(&mut self, summary: &RunSummary) -> Result<()>;
}

/// Appends summaries to `vigil_records.jsonl` in the output directory.
/// Re-measuring an image appends a second line; readers keep the latest.
#[derive(Debug)]
pub struct JsonlRecorder {
    path: PathBuf,
}

impl JsonlRecorder {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(RECORDS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for JsonlRecorder {
    fn record(&mut self, summary: &RunSummary) -> Result<()> {
        let line = serde_json::to_string(summary).context("Failed to serialize run summary")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open records file: {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to append run summary")?;

        info!(records = %self.path.display(), image = summary.image, "run summary recorded");
        Ok(())
    }
}
