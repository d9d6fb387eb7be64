//! Telescope configuration, loaded once per run from a YAML file named on
//! the command line (or `VIGIL_TELESCOPE`). Never compiled in.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const ARCSEC_PER_RADIAN: f64 = 206_264.806;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelescopeConfig {
    pub name: String,
    pub site: Site,
    pub optics: Optics,
    /// Detector gain in electrons per ADU.
    #[serde(default = "default_gain")]
    pub gain_e_adu: f32,
    /// Pixel value where the detector saturates.
    #[serde(default = "default_saturation")]
    pub saturation_adu: f32,
    /// Optional detector region the analysis is restricted to.
    #[serde(default)]
    pub roi: Option<Roi>,
    #[serde(default)]
    pub limits: QualityLimits,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub catalog: CatalogSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub elevation_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optics {
    pub focal_length_mm: f64,
    pub aperture_mm: f64,
    pub pixel_size_um: f64,
}

/// Detector subregion, 0-indexed pixel units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Quality thresholds the nightly summary flags against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityLimits {
    pub max_fwhm_arcsec: f64,
    pub max_ellipticity: f64,
    pub max_pointing_error_arcmin: f64,
}

impl Default for QualityLimits {
    fn default() -> Self {
        Self {
            max_fwhm_arcsec: 5.0,
            max_ellipticity: 0.3,
            max_pointing_error_arcmin: 6.0,
        }
    }
}

/// Paths (or bare names resolved via PATH) of the external binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_sex")]
    pub sex: PathBuf,
    #[serde(default = "default_solve_field")]
    pub solve_field: PathBuf,
    #[serde(default = "default_scamp")]
    pub scamp: PathBuf,
    #[serde(default = "default_swarp")]
    pub swarp: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            sex: default_sex(),
            solve_field: default_solve_field(),
            scamp: default_scamp(),
            swarp: default_swarp(),
        }
    }
}

/// Reference catalog used for the photometric zero point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub name: String,
    /// Faint cutoff for the catalog query.
    pub mag_limit: f32,
    /// Photometric band whose magnitudes are compared against.
    pub filter_band: String,
}

impl Default for CatalogSpec {
    fn default() -> Self {
        Self {
            name: "UCAC4".to_string(),
            mag_limit: 16.0,
            filter_band: "r".to_string(),
        }
    }
}

fn default_gain() -> f32 {
    1.0
}

fn default_saturation() -> f32 {
    65_535.0
}

fn default_sex() -> PathBuf {
    PathBuf::from("sex")
}

fn default_solve_field() -> PathBuf {
    PathBuf::from("solve-field")
}

fn default_scamp() -> PathBuf {
    PathBuf::from("scamp")
}

fn default_swarp() -> PathBuf {
    PathBuf::from("swarp")
}

impl TelescopeConfig {
    /// Loads and validates a telescope description.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading telescope config {}", path.display()))?;
        let config: Self = serde_yml::from_str(&text)
            .with_context(|| format!("parsing telescope config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Unbinned pixel scale in arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        ARCSEC_PER_RADIAN * (self.optics.pixel_size_um * 1e-6) / (self.optics.focal_length_mm * 1e-3)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("telescope name must not be empty");
        }
        if self.optics.focal_length_mm <= 0.0 {
            bail!("focal_length_mm must be positive");
        }
        if self.optics.pixel_size_um <= 0.0 {
            bail!("pixel_size_um must be positive");
        }
        if self.optics.aperture_mm <= 0.0 {
            bail!("aperture_mm must be positive");
        }
        if self.saturation_adu <= 0.0 {
            bail!("saturation_adu must be positive");
        }
        if let Some(roi) = &self.roi {
            if roi.width == 0 || roi.height == 0 {
                bail!("roi must have non-zero width and height");
            }
        }
        if !self.catalog.mag_limit.is_finite() {
            bail!("catalog mag_limit must be finite");
        }
        Ok(())
    }
}
