//! Photometric calibration through SCAMP.
//!
//! SCAMP reads the LDAC catalog of an extraction run, matches it against
//! an astrometric reference catalog and leaves a .head file with refined
//! WCS and zero-point keywords next to the catalog. The .head file is
//! what SWarp picks up when resampling.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::photometry::PhotometryOutcome;

#[derive(Debug)]
pub struct Scamp {
    binary: PathBuf,
    astref_catalog: String,
}

impl Scamp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            astref_catalog: "UCAC-4".to_string(),
        }
    }

    /// Reference catalog name in SCAMP's own spelling (e.g. "UCAC-4").
    pub fn with_astref_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.astref_catalog = catalog.into();
        self
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-v")
            .output()
            .map(|_| true)
            .unwrap_or(false)
    }

    /// The header file SCAMP writes for `catalog`, extension swapped for
    /// the configured HEADER_SUFFIX.
    pub fn head_path(catalog: &Path) -> PathBuf {
        catalog.with_extension("head")
    }

    /// Runs SCAMP over an extraction catalog. A run that produces no
    /// .head file is reported as `Failed`, not as an error: reference
    /// servers go down and sparse fields do not match.
    pub fn solve(&self, catalog: &Path, work_dir: &Path) -> Result<PhotometryOutcome> {
        let config_path = work_dir.join("vigil.scamp");
        std::fs::write(&config_path, self.config_file())
            .context("Failed to write SCAMP configuration")?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(catalog).arg("-c").arg(&config_path);

        info!("Running SCAMP on {}", catalog.display());
        debug!("Command: {:?}", cmd);

        let output = cmd.output().context("Failed to execute SCAMP")?;

        let head = Self::head_path(catalog);
        if !head.exists() {
            info!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "SCAMP produced no header file"
            );
            return Ok(PhotometryOutcome::Failed);
        }

        info!(head = %head.display(), "SCAMP solution written");
        Ok(PhotometryOutcome::Solved)
    }

    fn config_file(&self) -> String {
        let mut cfg = String::new();
        let _ = writeln!(cfg, "ASTREF_CATALOG   {}", self.astref_catalog);
        let _ = writeln!(cfg, "SOLVE_PHOTOM     Y");
        let _ = writeln!(cfg, "CHECKPLOT_TYPE   NONE");
        let _ = writeln!(cfg, "HEADER_SUFFIX    .head");
        let _ = writeln!(cfg, "WRITE_XML        N");
        cfg
    }
}
