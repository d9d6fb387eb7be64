//! Plate solving through astrometry.net's solve-field command.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use fitsio::FitsFile;
use tracing::{debug, info};

use crate::wcs::WCS;

/// Pointing and scale hints passed to the solver. A good scale hint cuts
/// solve time by an order of magnitude, a position hint by another.
#[derive(Debug, Clone)]
pub struct SolveHints {
    pub pixel_scale_arcsec: f64,
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,
}

#[derive(Debug)]
pub struct SolveField {
    binary: PathBuf,
    search_radius_deg: f64,
    downsample: u32,
    cpu_limit_s: u32,
    /// Fractional width of the scale window around the hint.
    scale_tolerance: f64,
}

impl SolveField {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            search_radius_deg: 15.0,
            downsample: 2,
            cpu_limit_s: 120,
            scale_tolerance: 0.1,
        }
    }

    pub fn with_search_radius(mut self, radius_deg: f64) -> Self {
        self.search_radius_deg = radius_deg;
        self
    }

    pub fn with_downsample(mut self, factor: u32) -> Self {
        self.downsample = factor;
        self
    }

    pub fn with_cpu_limit(mut self, seconds: u32) -> Self {
        self.cpu_limit_s = seconds;
        self
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--help")
            .output()
            .map(|_| true)
            .unwrap_or(false)
    }

    /// Attempts to solve `image`, leaving solver artifacts in `work_dir`.
    ///
    /// An unsolved field is a normal outcome, reported as `Ok(None)`.
    /// `Err` means the solver itself could not run or its solution could
    /// not be read back.
    pub fn solve(
        &self,
        image: &Path,
        work_dir: &Path,
        hints: &SolveHints,
    ) -> Result<Option<WCS>> {
        let image = image
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize path: {}", image.display()))?;

        let mut cmd = self.command(&image, work_dir, hints);

        info!("Running solve-field on {}", image.display());
        debug!("Command: {:?}", cmd);

        let output = cmd.output().context("Failed to execute solve-field")?;

        // solve-field exits zero even when the field does not solve; the
        // .solved marker is the real verdict.
        let stem = image
            .file_stem()
            .context("image path has no file stem")?
            .to_string_lossy();
        let solved_marker = work_dir.join(format!("{stem}.solved"));
        let wcs_path = work_dir.join(format!("{stem}.wcs"));

        if !solved_marker.exists() || !wcs_path.exists() {
            debug!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "field did not solve"
            );
            return Ok(None);
        }

        let wcs = read_wcs_file(&wcs_path)?;
        info!(ra = wcs.crval1, dec = wcs.crval2, "field solved");
        Ok(Some(wcs))
    }

    fn command(&self, image: &Path, work_dir: &Path, hints: &SolveHints) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-plots")
            .arg("--overwrite")
            .arg("--dir")
            .arg(work_dir)
            .arg("--downsample")
            .arg(self.downsample.to_string())
            .arg("--cpulimit")
            .arg(self.cpu_limit_s.to_string())
            .arg("--scale-units")
            .arg("arcsecperpix")
            .arg("--scale-low")
            .arg(format!(
                "{:.4}",
                hints.pixel_scale_arcsec * (1.0 - self.scale_tolerance)
            ))
            .arg("--scale-high")
            .arg(format!(
                "{:.4}",
                hints.pixel_scale_arcsec * (1.0 + self.scale_tolerance)
            ));
        if let (Some(ra), Some(dec)) = (hints.ra_deg, hints.dec_deg) {
            cmd.arg("--ra")
                .arg(format!("{:.6}", ra))
                .arg("--dec")
                .arg(format!("{:.6}", dec))
                .arg("--radius")
                .arg(self.search_radius_deg.to_string());
        }
        cmd.arg(image);
        cmd
    }
}

/// Reads the header-only .wcs file solve-field writes next to its marker.
fn read_wcs_file(path: &Path) -> Result<WCS> {
    let mut fptr = FitsFile::open(path).context("Failed to open .wcs file")?;
    let hdu = fptr.primary_hdu().context("No primary HDU in .wcs file")?;

    WCS::from_header(|key| hdu.read_key::<f64>(&mut fptr, key).ok())
        .context(".wcs file is missing projection keywords")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_includes_scale_window_from_hint() {
        let solver = SolveField::new("solve-field");
        let hints = SolveHints {
            pixel_scale_arcsec: 2.0,
            ra_deg: None,
            dec_deg: None,
        };
        let cmd = solver.command(Path::new("/tmp/img.fits"), Path::new("/tmp/work"), &hints);
        let args = args_of(&cmd);

        assert!(args.contains(&"--no-plots".to_string()));
        assert!(args.contains(&"arcsecperpix".to_string()));
        assert!(args.contains(&"1.8000".to_string()));
        assert!(args.contains(&"2.2000".to_string()));
        assert!(!args.contains(&"--ra".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/img.fits");
    }

    #[test]
    fn command_adds_position_hint_when_coordinates_known() {
        let solver = SolveField::new("solve-field").with_search_radius(10.0);
        let hints = SolveHints {
            pixel_scale_arcsec: 1.0,
            ra_deg: Some(210.5),
            dec_deg: Some(-12.25),
        };
        let cmd = solver.command(Path::new("img.fits"), Path::new("work"), &hints);
        let args = args_of(&cmd);

        let ra_pos = args.iter().position(|a| a == "--ra").unwrap();
        assert_eq!(args[ra_pos + 1], "210.500000");
        let dec_pos = args.iter().position(|a| a == "--dec").unwrap();
        assert_eq!(args[dec_pos + 1], "-12.250000");
        let radius_pos = args.iter().position(|a| a == "--radius").unwrap();
        assert_eq!(args[radius_pos + 1], "10");
    }

    #[test]
    fn missing_marker_reports_unsolved() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("field.fits");
        std::fs::write(&image, b"not really fits").unwrap();

        // `true` exits zero and writes nothing, so no .solved appears.
        let solver = SolveField::new("true");
        let hints = SolveHints {
            pixel_scale_arcsec: 2.0,
            ra_deg: None,
            dec_deg: None,
        };
        let result = solver.solve(&image, dir.path(), &hints).unwrap();
        assert!(result.is_none());
    }
}
