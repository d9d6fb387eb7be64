//! Per-image measurement session.
//!
//! One session per input file. It owns the scratch directory, the
//! per-image log guard and every result the pipeline stages accumulate.
//! Both are released by drop on every exit path.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use tempfile::TempDir;
use tracing::{debug, info};

use common::log_setup::LogGuard;

use crate::catalog::CatalogStar;
use crate::frame::FrameBuffer;
use crate::fwhm::FwhmStats;
use crate::photometry::ZeroPoint;
use crate::sources::SourceCatalog;
use crate::telescope::Roi;
use crate::wcs::WCS;

#[derive(Debug, thiserror::Error)]
pub enum ImageLoadError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to create scratch directory")]
    Scratch(#[source] std::io::Error),
}

/// Header values the pipeline consumes.
#[derive(Debug, Clone, Default)]
pub struct ImageHeader {
    pub object: Option<String>,
    pub date_obs: Option<String>,
    pub filter: Option<String>,
    pub exposure_s: Option<f64>,
    pub airmass: Option<f64>,
    /// Commanded target position, degrees.
    pub target_ra_deg: Option<f64>,
    pub target_dec_deg: Option<f64>,
}

/// Mutable state of one measurement run.
///
/// Stage functions in `pipeline` document which of these fields they
/// require and produce.
#[derive(Debug)]
pub struct ImageSession {
    path: PathBuf,
    base_name: String,
    output_dir: PathBuf,
    work_dir: Option<TempDir>,
    working_path: PathBuf,
    log_guard: Option<LogGuard>,
    started: Instant,
    process_time: Option<Duration>,

    pub header: ImageHeader,
    pub frame: Option<FrameBuffer>,
    pub wcs: Option<WCS>,
    pub sources: Option<SourceCatalog>,
    pub fwhm: Option<FwhmStats>,
    pub pointing_error_arcmin: Option<f64>,
    pub zero_point: Option<ZeroPoint>,
    pub catalog_stars: Vec<CatalogStar>,
}

impl ImageSession {
    /// Opens a session for one image file. Pixels are not read yet; that
    /// happens in the load stage.
    pub fn open(path: &Path, output_dir: &Path) -> Result<Self, ImageLoadError> {
        if !common::file_utils::is_fits_file(path) {
            return Err(ImageLoadError::UnsupportedFormat(
                path.display().to_string(),
            ));
        }

        let base_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let work_dir = tempfile::Builder::new()
            .prefix("vigil_")
            .tempdir()
            .map_err(ImageLoadError::Scratch)?;

        Ok(Self {
            path: path.to_path_buf(),
            base_name,
            output_dir: output_dir.to_path_buf(),
            work_dir: Some(work_dir),
            working_path: path.to_path_buf(),
            log_guard: None,
            started: Instant::now(),
            process_time: None,
            header: ImageHeader::default(),
            frame: None,
            wcs: None,
            sources: None,
            fwhm: None,
            pointing_error_arcmin: None,
            zero_point: None,
            catalog_stars: Vec::new(),
        })
    }

    /// Attaches the per-image log file. Call at most once per process.
    pub fn attach_logging(&mut self, verbose: bool, clobber: bool) {
        let log_path = self.log_path();
        self.log_guard = Some(common::log_setup::setup_logging(
            &log_path, verbose, clobber,
        ));
        info!(image = %self.path.display(), "session started");
    }

    /// Reads pixels, header and any existing WCS from the working file.
    pub fn load(&mut self) -> Result<()> {
        let (frame, header, wcs) = open_fits(&self.working_path)?;

        info!(
            width = frame.width(),
            height = frame.height(),
            exposure_s = header.exposure_s,
            has_wcs = wcs.is_some(),
            "image loaded"
        );

        self.frame = Some(frame);
        self.header = header;
        self.wcs = wcs;
        Ok(())
    }

    /// Restricts the working frame to the detector ROI and writes the
    /// cropped FITS that external tools operate on from here on. The ROI
    /// is clamped to the frame. An existing WCS is shifted to the new
    /// pixel origin.
    pub fn crop_to_roi(&mut self, roi: &Roi) -> Result<()> {
        let frame = self.frame.as_ref().context("image not loaded")?;

        let x = roi.x.min(frame.width().saturating_sub(1));
        let y = roi.y.min(frame.height().saturating_sub(1));
        let width = roi.width.min(frame.width() - x);
        let height = roi.height.min(frame.height() - y);

        let cropped = frame.crop(x, y, width, height);
        let path = self.work_path(&format!("{}_roi.fits", self.base_name));
        write_fits_image(&path, &cropped, self.header.exposure_s)?;

        if let Some(wcs) = &mut self.wcs {
            wcs.crpix1 -= x as f64;
            wcs.crpix2 -= y as f64;
        }

        info!(x, y, width, height, "cropped to detector ROI");
        self.frame = Some(cropped);
        self.working_path = path;
        Ok(())
    }

    /// Swaps the working image (e.g. for a resampled frame) and reloads
    /// pixels and WCS from it. Header values from the original file are
    /// kept.
    pub fn set_working_image(&mut self, path: PathBuf) -> Result<()> {
        let (frame, _header, wcs) = open_fits(&path)?;
        debug!(image = %path.display(), "working image replaced");

        self.frame = Some(frame);
        if wcs.is_some() {
            self.wcs = wcs;
        }
        self.working_path = path;
        Ok(())
    }

    /// Removes the scratch directory and everything in it. Artifacts in
    /// the output directory are kept.
    pub fn clean_up(&mut self) -> Result<()> {
        if let Some(dir) = self.work_dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()
                .with_context(|| format!("removing scratch directory {}", path.display()))?;
            debug!(dir = %path.display(), "scratch directory removed");
        }
        Ok(())
    }

    /// Stops the run clock and stores the elapsed wall time.
    pub fn finalize_timing(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        self.process_time = Some(elapsed);
        elapsed
    }

    pub fn process_time(&self) -> Option<Duration> {
        self.process_time
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Current FITS file external tools should run against.
    pub fn working_path(&self) -> &Path {
        &self.working_path
    }

    /// Scratch directory external tools write into.
    pub fn work_dir(&self) -> &Path {
        self.work_dir
            .as_ref()
            .expect("scratch directory already released")
            .path()
    }

    /// Path inside the scratch directory.
    pub fn work_path(&self, file_name: &str) -> PathBuf {
        self.work_dir().join(file_name)
    }

    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.frame.as_ref().map(|f| (f.width(), f.height()))
    }

    pub fn n_stars(&self) -> usize {
        self.sources.as_ref().map_or(0, |catalog| catalog.len())
    }

    pub fn fullframe_preview_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_fullframe.jpg", self.base_name))
    }

    pub fn crop_preview_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_crop.jpg", self.base_name))
    }

    pub fn psf_plot_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_PSF.png", self.base_name))
    }

    pub fn zp_plot_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_ZP.png", self.base_name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_vigil.log", self.base_name))
    }
}

fn open_fits(path: &Path) -> Result<(FrameBuffer, ImageHeader, Option<WCS>)> {
    let mut fptr = FitsFile::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

    let hdu = fptr.primary_hdu().context("Failed to access primary HDU")?;

    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        HduInfo::TableInfo { .. } => {
            anyhow::bail!("Primary HDU is a table, not an image");
        }
        HduInfo::AnyInfo => {
            anyhow::bail!("Unknown HDU type");
        }
    };

    // Shape comes back in reverse NAXIS order: [height, width].
    let (width, height) = match shape.len() {
        2 => (shape[1], shape[0]),
        n => anyhow::bail!("Unsupported number of image dimensions: {}", n),
    };

    let pixels: Vec<f32> = hdu
        .read_image(&mut fptr)
        .context("Failed to read image data")?;
    let frame = FrameBuffer::new(width, height, pixels);

    let header = read_header(&hdu, &mut fptr);

    // A real solution carries CTYPE; bare pointing keywords do not.
    let wcs = if read_key_optional::<String>(&hdu, &mut fptr, "CTYPE1").is_some() {
        WCS::from_header(|key| read_key_optional::<f64>(&hdu, &mut fptr, key))
    } else {
        None
    };

    Ok((frame, header, wcs))
}

fn read_header(hdu: &fitsio::hdu::FitsHdu, fptr: &mut FitsFile) -> ImageHeader {
    ImageHeader {
        object: read_key_optional(hdu, fptr, "OBJECT"),
        date_obs: read_key_optional(hdu, fptr, "DATE-OBS"),
        filter: read_key_optional(hdu, fptr, "FILTER"),
        exposure_s: read_key_optional::<f64>(hdu, fptr, "EXPTIME")
            .or_else(|| read_key_optional(hdu, fptr, "EXPOSURE")),
        airmass: read_key_optional(hdu, fptr, "AIRMASS"),
        target_ra_deg: read_target_ra_deg(hdu, fptr),
        target_dec_deg: read_target_dec_deg(hdu, fptr),
    }
}

/// Read the commanded RA in degrees.
///
/// Tries `RA` as degrees, `RA` as a sexagesimal hour string, then
/// `OBJCTRA` (HMS string).
fn read_target_ra_deg(hdu: &fitsio::hdu::FitsHdu, fptr: &mut FitsFile) -> Option<f64> {
    if let Some(ra) = read_key_optional::<f64>(hdu, fptr, "RA") {
        return Some(ra);
    }
    if let Some(s) = read_key_optional::<String>(hdu, fptr, "RA") {
        if let Some(deg) = parse_hms_to_deg(&s) {
            return Some(deg);
        }
    }
    read_key_optional::<String>(hdu, fptr, "OBJCTRA").and_then(|s| parse_hms_to_deg(&s))
}

/// Read the commanded Dec in degrees.
///
/// Tries `DEC` as degrees, `DEC` as a sexagesimal string, then
/// `OBJCTDEC` (DMS string).
fn read_target_dec_deg(hdu: &fitsio::hdu::FitsHdu, fptr: &mut FitsFile) -> Option<f64> {
    if let Some(dec) = read_key_optional::<f64>(hdu, fptr, "DEC") {
        return Some(dec);
    }
    if let Some(s) = read_key_optional::<String>(hdu, fptr, "DEC") {
        if let Some(deg) = parse_dms_to_deg(&s) {
            return Some(deg);
        }
    }
    read_key_optional::<String>(hdu, fptr, "OBJCTDEC").and_then(|s| parse_dms_to_deg(&s))
}

/// Parse HMS string "HH MM SS.ss" to degrees.
/// Accepts both space-delimited and colon-delimited formats.
fn parse_hms_to_deg(s: &str) -> Option<f64> {
    let parts: Vec<f64> = s
        .split([' ', ':'])
        .filter(|p| !p.is_empty())
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != 3 {
        return None;
    }
    // RA in hours: deg = (h + m/60 + s/3600) * 15
    let sign = if parts[0].is_sign_negative() {
        -1.0
    } else {
        1.0
    };
    Some(sign * (parts[0].abs() + parts[1] / 60.0 + parts[2] / 3600.0) * 15.0)
}

/// Parse DMS string "±DD MM SS.ss" to degrees.
/// Accepts both space-delimited and colon-delimited formats.
fn parse_dms_to_deg(s: &str) -> Option<f64> {
    let parts: Vec<f64> = s
        .split([' ', ':'])
        .filter(|p| !p.is_empty())
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != 3 {
        return None;
    }
    let sign = if parts[0].is_sign_negative() {
        -1.0
    } else {
        1.0
    };
    Some(sign * (parts[0].abs() + parts[1] / 60.0 + parts[2] / 3600.0))
}

/// Helper to read an optional key from a FITS header.
fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &fitsio::hdu::FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}

/// Writes a single-HDU float FITS image, carrying the exposure keyword
/// external tools read.
pub fn write_fits_image(path: &Path, frame: &FrameBuffer, exposure_s: Option<f64>) -> Result<()> {
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[frame.height(), frame.width()],
    };

    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .open()
        .with_context(|| format!("Failed to create FITS file: {}", path.display()))?;

    let hdu = fptr.primary_hdu().context("Failed to access primary HDU")?;
    hdu.write_image(&mut fptr, frame.pixels())
        .context("Failed to write image data")?;

    if let Some(exposure) = exposure_s {
        hdu.write_key(&mut fptr, "EXPTIME", exposure)
            .context("Failed to write EXPTIME")?;
    }
    Ok(())
}

/// Session with an in-memory frame and no backing file, for stage tests.
#[cfg(test)]
pub(crate) fn synthetic_session(width: usize, height: usize, output_dir: &Path) -> ImageSession {
    let mut session =
        ImageSession::open(&output_dir.join("synthetic.fits"), output_dir).unwrap();
    session.frame = Some(FrameBuffer::new_filled(width, height, 100.0));
    session
}
