//! SExtractor invocation and FITS_LDAC catalog parsing.
//!
//! One extraction run writes three small control files into the scratch
//! directory (configuration, output parameters and, in associated mode,
//! the reference star list), invokes the binary and parses the LDAC
//! catalog it leaves behind.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use fitsio::FitsFile;
use tracing::{debug, info};

use crate::sources::{ExtractedSource, SourceCatalog};

/// Measurements requested from every run.
const OUTPUT_PARAMS: &[&str] = &[
    "NUMBER",
    "X_IMAGE",
    "Y_IMAGE",
    "FLUX_AUTO",
    "MAG_AUTO",
    "A_IMAGE",
    "B_IMAGE",
    "FWHM_IMAGE",
    "FLAGS",
];

/// A reference star projected into pixel space for an associated run.
#[derive(Debug, Clone)]
pub struct AssocEntry {
    /// 0-indexed pixel position.
    pub x: f64,
    pub y: f64,
    pub mag: f32,
}

/// Per-run inputs derived from the telescope and session state.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub pixel_scale_arcsec: f64,
    pub saturation_adu: f32,
    pub gain_e_adu: f32,
    /// Projected reference stars; their presence switches the run into
    /// associated mode, where each detection carries the magnitude of
    /// its nearest reference star.
    pub assoc: Option<Vec<AssocEntry>>,
}

#[derive(Debug)]
pub struct SExtractor {
    binary: PathBuf,
    detect_threshold: f32,
    min_area: u32,
    assoc_radius_px: f32,
}

impl SExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            detect_threshold: 5.0,
            min_area: 5,
            assoc_radius_px: 3.0,
        }
    }

    /// Detection threshold in background sigmas.
    pub fn with_detect_threshold(mut self, threshold: f32) -> Self {
        self.detect_threshold = threshold;
        self
    }

    /// Minimum connected pixels above threshold per detection.
    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = min_area;
        self
    }

    /// Match radius for associated runs, pixels.
    pub fn with_assoc_radius(mut self, radius_px: f32) -> Self {
        self.assoc_radius_px = radius_px;
        self
    }

    /// Check whether the binary can be spawned at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|_| true)
            .unwrap_or(false)
    }

    /// Runs extraction over `image`, writing the LDAC catalog to
    /// `catalog_path` (its parent doubles as the control-file directory).
    pub fn extract(
        &self,
        image: &Path,
        catalog_path: &Path,
        ctx: &ExtractionContext,
    ) -> Result<SourceCatalog> {
        let work_dir = catalog_path
            .parent()
            .context("catalog path has no parent directory")?;

        let param_path = work_dir.join("vigil.param");
        let config_path = work_dir.join("vigil.sex");

        std::fs::write(&param_path, parameter_file(ctx.assoc.is_some()))
            .context("Failed to write SExtractor parameter file")?;

        let assoc_path = match &ctx.assoc {
            Some(entries) => {
                let path = work_dir.join("vigil.assoc");
                std::fs::write(&path, assoc_file(entries))
                    .context("Failed to write association list")?;
                Some(path)
            }
            None => None,
        };

        let config = self.config_file(catalog_path, &param_path, ctx, assoc_path.as_deref());
        std::fs::write(&config_path, config)
            .context("Failed to write SExtractor configuration")?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(image).arg("-c").arg(&config_path);

        info!(
            image = %image.display(),
            associated = ctx.assoc.is_some(),
            "running SExtractor"
        );
        debug!("Command: {:?}", cmd);

        let output = cmd.output().context("Failed to execute SExtractor")?;

        // The catalog file is the success predicate, not the exit code.
        if !catalog_path.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "SExtractor produced no catalog. Status: {}, stderr: {}",
                output.status,
                stderr
            );
        }
        debug!(stderr = %String::from_utf8_lossy(&output.stderr), "SExtractor finished");

        let catalog = parse_ldac(catalog_path, ctx.assoc.is_some())?;
        info!(n_sources = catalog.len(), "extraction complete");
        Ok(catalog)
    }

    fn config_file(
        &self,
        catalog: &Path,
        params: &Path,
        ctx: &ExtractionContext,
        assoc: Option<&Path>,
    ) -> String {
        let mut cfg = String::new();
        let _ = writeln!(cfg, "CATALOG_NAME     {}", catalog.display());
        let _ = writeln!(cfg, "CATALOG_TYPE     FITS_LDAC");
        let _ = writeln!(cfg, "PARAMETERS_NAME  {}", params.display());
        let _ = writeln!(cfg, "DETECT_THRESH    {}", self.detect_threshold);
        let _ = writeln!(cfg, "ANALYSIS_THRESH  {}", self.detect_threshold);
        let _ = writeln!(cfg, "DETECT_MINAREA   {}", self.min_area);
        let _ = writeln!(cfg, "FILTER           N");
        let _ = writeln!(cfg, "SATUR_LEVEL      {}", ctx.saturation_adu);
        let _ = writeln!(cfg, "GAIN             {}", ctx.gain_e_adu);
        let _ = writeln!(cfg, "PIXEL_SCALE      {:.4}", ctx.pixel_scale_arcsec);
        if let Some(assoc) = assoc {
            let _ = writeln!(cfg, "ASSOC_NAME       {}", assoc.display());
            let _ = writeln!(cfg, "ASSOC_PARAMS     1,2");
            let _ = writeln!(cfg, "ASSOC_DATA       3");
            let _ = writeln!(cfg, "ASSOC_RADIUS     {}", self.assoc_radius_px);
            let _ = writeln!(cfg, "ASSOC_TYPE       NEAREST");
            let _ = writeln!(cfg, "ASSOCSELEC_TYPE  MATCHED");
        }
        cfg
    }
}

fn parameter_file(associated: bool) -> String {
    let mut text = OUTPUT_PARAMS.join("\n");
    text.push('\n');
    if associated {
        text.push_str("VECTOR_ASSOC(1)\n");
    }
    text
}

/// Association list rows: x y mag, in SExtractor's 1-indexed convention.
fn assoc_file(entries: &[AssocEntry]) -> String {
    let mut text = String::new();
    for entry in entries {
        let _ = writeln!(text, "{:.3} {:.3} {:.3}", entry.x + 1.0, entry.y + 1.0, entry.mag);
    }
    text
}

/// Parses a FITS_LDAC catalog. The objects table is looked up by its
/// conventional name with positional fallbacks for non-LDAC layouts.
fn parse_ldac(path: &Path, associated: bool) -> Result<SourceCatalog> {
    let mut fptr = FitsFile::open(path).context("Failed to open extraction catalog")?;

    let hdu = fptr
        .hdu("LDAC_OBJECTS")
        .or_else(|_| fptr.hdu(2))
        .or_else(|_| fptr.hdu(1))
        .context("No objects table in extraction catalog")?;

    let x: Vec<f32> = hdu
        .read_col(&mut fptr, "X_IMAGE")
        .context("Failed to read X_IMAGE")?;
    let y: Vec<f32> = hdu
        .read_col(&mut fptr, "Y_IMAGE")
        .context("Failed to read Y_IMAGE")?;
    let flux: Vec<f32> = hdu
        .read_col(&mut fptr, "FLUX_AUTO")
        .context("Failed to read FLUX_AUTO")?;
    let mag: Vec<f32> = hdu
        .read_col(&mut fptr, "MAG_AUTO")
        .context("Failed to read MAG_AUTO")?;
    let a: Vec<f32> = hdu
        .read_col(&mut fptr, "A_IMAGE")
        .context("Failed to read A_IMAGE")?;
    let b: Vec<f32> = hdu
        .read_col(&mut fptr, "B_IMAGE")
        .context("Failed to read B_IMAGE")?;
    let fwhm: Vec<f32> = hdu
        .read_col(&mut fptr, "FWHM_IMAGE")
        .context("Failed to read FWHM_IMAGE")?;
    let flags: Vec<i32> = hdu
        .read_col(&mut fptr, "FLAGS")
        .context("Failed to read FLAGS")?;

    let assoc_mag: Option<Vec<f32>> = if associated {
        Some(
            hdu.read_col(&mut fptr, "VECTOR_ASSOC")
                .context("Failed to read VECTOR_ASSOC")?,
        )
    } else {
        None
    };

    let sources: Vec<ExtractedSource> = (0..x.len())
        .map(|i| ExtractedSource {
            // Convert from 1-indexed FITS to 0-indexed
            x: x[i] - 1.0,
            y: y[i] - 1.0,
            flux: flux[i],
            mag: mag[i],
            fwhm: fwhm[i],
            a: a[i],
            b: b[i],
            flags: flags[i],
            catalog_mag: assoc_mag.as_ref().map(|m| m[i]),
        })
        .collect();

    Ok(SourceCatalog::new(sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitsio::tables::{ColumnDataType, ColumnDescription};

    #[test]
    fn parameter_file_lists_the_measured_columns() {
        let plain = parameter_file(false);
        assert!(plain.contains("FWHM_IMAGE"));
        assert!(plain.contains("MAG_AUTO"));
        assert!(!plain.contains("VECTOR_ASSOC"));

        let associated = parameter_file(true);
        assert!(associated.contains("VECTOR_ASSOC(1)"));
    }

    #[test]
    fn assoc_file_uses_one_indexed_positions() {
        let entries = vec![AssocEntry {
            x: 10.0,
            y: 20.5,
            mag: 12.25,
        }];
        assert_eq!(assoc_file(&entries), "11.000 21.500 12.250\n");
    }

    #[test]
    fn config_file_carries_detector_settings() {
        let sex = SExtractor::new("sex")
            .with_detect_threshold(4.0)
            .with_min_area(6);
        let ctx = ExtractionContext {
            pixel_scale_arcsec: 2.1,
            saturation_adu: 58000.0,
            gain_e_adu: 1.6,
            assoc: None,
        };

        let cfg = sex.config_file(
            Path::new("/scratch/img.ldac"),
            Path::new("/scratch/vigil.param"),
            &ctx,
            None,
        );
        assert!(cfg.contains("CATALOG_NAME     /scratch/img.ldac"));
        assert!(cfg.contains("CATALOG_TYPE     FITS_LDAC"));
        assert!(cfg.contains("DETECT_THRESH    4"));
        assert!(cfg.contains("DETECT_MINAREA   6"));
        assert!(cfg.contains("SATUR_LEVEL      58000"));
        assert!(cfg.contains("GAIN             1.6"));
        assert!(cfg.contains("PIXEL_SCALE      2.1000"));
        assert!(!cfg.contains("ASSOC_NAME"));
    }

    #[test]
    fn config_file_enables_association_when_given_a_list() {
        let sex = SExtractor::new("sex");
        let ctx = ExtractionContext {
            pixel_scale_arcsec: 1.0,
            saturation_adu: 65535.0,
            gain_e_adu: 1.0,
            assoc: Some(Vec::new()),
        };

        let cfg = sex.config_file(
            Path::new("/scratch/img.ldac"),
            Path::new("/scratch/vigil.param"),
            &ctx,
            Some(Path::new("/scratch/vigil.assoc")),
        );
        assert!(cfg.contains("ASSOC_NAME       /scratch/vigil.assoc"));
        assert!(cfg.contains("ASSOCSELEC_TYPE  MATCHED"));
    }

    #[test]
    fn unavailable_binary_is_reported() {
        let sex = SExtractor::new("/nonexistent/path/to/sex");
        assert!(!sex.is_available());
    }

    fn write_test_catalog(path: &Path, associated: bool) {
        let mut fptr = FitsFile::create(path).open().unwrap();

        let mut columns = vec![
            ("X_IMAGE", ColumnDataType::Float),
            ("Y_IMAGE", ColumnDataType::Float),
            ("FLUX_AUTO", ColumnDataType::Float),
            ("MAG_AUTO", ColumnDataType::Float),
            ("A_IMAGE", ColumnDataType::Float),
            ("B_IMAGE", ColumnDataType::Float),
            ("FWHM_IMAGE", ColumnDataType::Float),
            ("FLAGS", ColumnDataType::Int),
        ];
        if associated {
            columns.push(("VECTOR_ASSOC", ColumnDataType::Float));
        }
        let descriptions: Vec<_> = columns
            .iter()
            .map(|(name, data_type)| {
                ColumnDescription::new(*name)
                    .with_type(*data_type)
                    .create()
                    .unwrap()
            })
            .collect();

        let hdu = fptr
            .create_table("LDAC_OBJECTS".to_string(), &descriptions)
            .unwrap();

        // write_col consumes the hdu and hands back a fresh one
        let hdu = hdu.write_col(&mut fptr, "X_IMAGE", &[101.5_f32, 201.0]).unwrap();
        let hdu = hdu.write_col(&mut fptr, "Y_IMAGE", &[51.5_f32, 61.0]).unwrap();
        let hdu = hdu.write_col(&mut fptr, "FLUX_AUTO", &[5000.0_f32, 800.0]).unwrap();
        let hdu = hdu.write_col(&mut fptr, "MAG_AUTO", &[-9.2_f32, -7.5]).unwrap();
        let hdu = hdu.write_col(&mut fptr, "A_IMAGE", &[2.0_f32, 2.2]).unwrap();
        let hdu = hdu.write_col(&mut fptr, "B_IMAGE", &[1.8_f32, 2.0]).unwrap();
        let hdu = hdu.write_col(&mut fptr, "FWHM_IMAGE", &[3.4_f32, 3.6]).unwrap();
        let _hdu = hdu.write_col(&mut fptr, "FLAGS", &[0_i32, 2]).unwrap();
        if associated {
            _hdu.write_col(&mut fptr, "VECTOR_ASSOC", &[12.5_f32, 14.0])
                .unwrap();
        }
    }

    #[test]
    fn parses_an_ldac_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.ldac");
        write_test_catalog(&path, false);

        let catalog = parse_ldac(&path, false).unwrap();
        assert_eq!(catalog.len(), 2);

        let first = &catalog.sources[0];
        // Converted to 0-indexed positions.
        assert_eq!(first.x, 100.5);
        assert_eq!(first.y, 50.5);
        assert_eq!(first.fwhm, 3.4);
        assert!(first.is_clean());
        assert!(first.catalog_mag.is_none());

        assert_eq!(catalog.sources[1].flags, 2);
    }

    #[test]
    fn parses_associated_magnitudes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assoc.ldac");
        write_test_catalog(&path, true);

        let catalog = parse_ldac(&path, true).unwrap();
        assert_eq!(catalog.sources[0].catalog_mag, Some(12.5));
        assert_eq!(catalog.sources[1].catalog_mag, Some(14.0));
    }
}
