//! Image resampling through SWarp.
//!
//! After SCAMP refines the astrometry, SWarp rewrites the image onto the
//! solved projection. SWarp finds the refined solution by looking for a
//! .head file next to its input, so both the image and the header are
//! staged into the scratch directory first.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Swarp {
    binary: PathBuf,
}

impl Swarp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-v")
            .output()
            .map(|_| true)
            .unwrap_or(false)
    }

    /// Resamples `image` onto the projection in `head` (when given) and
    /// returns the path of the resampled frame inside `work_dir`.
    pub fn resample(
        &self,
        image: &Path,
        head: Option<&Path>,
        work_dir: &Path,
    ) -> Result<PathBuf> {
        let staged = stage_into(image, work_dir)?;
        let stem = staged
            .file_stem()
            .context("image path has no file stem")?
            .to_string_lossy()
            .into_owned();

        if let Some(head) = head {
            let target = work_dir.join(format!("{stem}.head"));
            if head != target {
                std::fs::copy(head, &target).with_context(|| {
                    format!("Failed to stage header file {}", head.display())
                })?;
            }
        }

        let output_path = work_dir.join(format!("{stem}_swarp.fits"));
        let config_path = work_dir.join("vigil.swarp");
        std::fs::write(&config_path, config_file(&output_path, work_dir))
            .context("Failed to write SWarp configuration")?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(&staged).arg("-c").arg(&config_path);

        info!("Running SWarp on {}", staged.display());
        debug!("Command: {:?}", cmd);

        let output = cmd.output().context("Failed to execute SWarp")?;

        if !output_path.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "SWarp produced no resampled image. Status: {}, stderr: {}",
                output.status,
                stderr
            );
        }

        info!(output = %output_path.display(), "resampling complete");
        Ok(output_path)
    }
}

/// Copies `image` into `work_dir` unless it already lives there.
fn stage_into(image: &Path, work_dir: &Path) -> Result<PathBuf> {
    if image.parent() == Some(work_dir) {
        return Ok(image.to_path_buf());
    }
    let file_name = image.file_name().context("image path has no file name")?;
    let staged = work_dir.join(file_name);
    std::fs::copy(image, &staged)
        .with_context(|| format!("Failed to stage image {}", image.display()))?;
    Ok(staged)
}

// COMBINE must stay Y: with COMBINE N SWarp ignores IMAGEOUT_NAME and
// scatters per-input resamplings into RESAMPLE_DIR instead.
fn config_file(output: &Path, work_dir: &Path) -> String {
    let mut cfg = String::new();
    let _ = writeln!(cfg, "IMAGEOUT_NAME    {}", output.display());
    let _ = writeln!(
        cfg,
        "WEIGHTOUT_NAME   {}",
        work_dir.join("coadd.weight.fits").display()
    );
    let _ = writeln!(cfg, "WEIGHT_TYPE      NONE");
    let _ = writeln!(cfg, "COMBINE          Y");
    let _ = writeln!(cfg, "RESAMPLE         Y");
    let _ = writeln!(cfg, "RESAMPLE_DIR     {}", work_dir.display());
    let _ = writeln!(cfg, "SUBTRACT_BACK    N");
    let _ = writeln!(cfg, "HEADER_SUFFIX    .head");
    let _ = writeln!(cfg, "WRITE_XML        N");
    cfg
}
