//! Analysis driver: sequences the measurement stages over one session.
//!
//! Each stage mutates the session and is gated on what earlier stages
//! produced. The external tools sit behind [`AnalysisTools`] so the
//! sequencing logic can be exercised without any of the binaries
//! installed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::CatalogStar;
use crate::fwhm;
use crate::photometry::{self, PhotometryOutcome};
use crate::plots;
use crate::session::ImageSession;
use crate::sources::SourceCatalog;
use crate::telescope::TelescopeConfig;
use crate::wcs::{self, WCS};

/// Fields with fewer detections than this are treated as blank.
pub const BLANK_STAR_FLOOR: usize = 100;

/// Extraction flavor requested from the tool layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Plain,
    /// Associate detections with the fetched reference stars; each
    /// matched detection carries its reference magnitude.
    Associated,
}

/// External analysis backends driven by [`run`].
pub trait AnalysisTools {
    /// Runs source extraction over the current working image.
    fn extract_sources(
        &mut self,
        session: &ImageSession,
        config: &TelescopeConfig,
        mode: ExtractionMode,
    ) -> Result<SourceCatalog>;

    /// Attempts a plate solve; `None` means the field did not solve.
    fn solve_astrometry(
        &mut self,
        session: &ImageSession,
        config: &TelescopeConfig,
    ) -> Result<Option<WCS>>;

    /// Runs the photometric solution over the last extraction catalog.
    fn solve_photometry(&mut self, session: &ImageSession) -> Result<PhotometryOutcome>;

    /// Resamples the working image onto the photometric solution and
    /// returns the path of the resampled frame.
    fn resample(&mut self, session: &ImageSession) -> Result<PathBuf>;

    /// Fetches reference stars covering the imaged field.
    fn fetch_catalog(
        &mut self,
        session: &ImageSession,
        config: &TelescopeConfig,
    ) -> Result<Vec<CatalogStar>>;
}

/// Stage toggles for one run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub analyze: bool,
    pub zero_point: bool,
    pub graphics: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            analyze: true,
            zero_point: false,
            graphics: true,
        }
    }
}

pub fn is_blank(session: &ImageSession) -> bool {
    session.n_stars() < BLANK_STAR_FLOOR
}

/// Runs the measurement stages over a loaded session.
pub fn run(
    session: &mut ImageSession,
    config: &TelescopeConfig,
    tools: &mut dyn AnalysisTools,
    options: &PipelineOptions,
) -> Result<()> {
    session.load().context("Failed to load image")?;

    if !options.analyze {
        return Ok(());
    }

    if let Some(roi) = &config.roi {
        session
            .crop_to_roi(roi)
            .context("Failed to crop to the configured region of interest")?;
    }

    extract_and_measure(session, config, tools, ExtractionMode::Plain)?;

    let blank = is_blank(session);
    if blank {
        warn!(
            n_stars = session.n_stars(),
            "Only {} stars found. Image may be blank.",
            session.n_stars()
        );
    }

    if session.wcs.is_some() {
        debug!("astrometric solution already present, not solving");
    } else if !blank {
        match tools.solve_astrometry(session, config)? {
            Some(solution) => {
                session.wcs = Some(solution);
                extract_and_measure(session, config, tools, ExtractionMode::Plain)?;
            }
            None => info!("field did not solve, continuing without astrometry"),
        }
    }

    measure_pointing_error(session);

    if options.zero_point && !blank {
        measure_zero_point(session, config, tools)?;
    }

    if options.graphics {
        if let (Some(sources), Some(stats)) = (&session.sources, &session.fwhm) {
            if let Err(err) = plots::psf_plot(&session.psf_plot_path(), sources, stats) {
                warn!(error = %err, "Failed to make PSF plot");
            }
        }
    }

    Ok(())
}

/// Extraction plus the FWHM estimate that always follows it.
fn extract_and_measure(
    session: &mut ImageSession,
    config: &TelescopeConfig,
    tools: &mut dyn AnalysisTools,
    mode: ExtractionMode,
) -> Result<()> {
    let catalog = tools.extract_sources(session, config, mode)?;
    session.fwhm = fwhm::estimate(&catalog, config.pixel_scale_arcsec());
    session.sources = Some(catalog);

    if let Some(stats) = &session.fwhm {
        info!(
            fwhm_arcsec = stats.arcsec,
            ellipticity = stats.ellipticity,
            n_used = stats.n_used,
            "image quality measured"
        );
    }
    Ok(())
}

/// Great-circle separation between the header target and the sky
/// position of the image center. A session without a solution or a
/// target keeps `None`.
fn measure_pointing_error(session: &mut ImageSession) {
    let (Some(target_ra), Some(target_dec)) =
        (session.header.target_ra_deg, session.header.target_dec_deg)
    else {
        info!("no target coordinates in header, pointing error unknown");
        return;
    };
    let Some(solution) = &session.wcs else {
        info!("no astrometric solution, pointing error unknown");
        return;
    };
    let Some((width, height)) = session.dimensions() else {
        return;
    };

    let center = solution.field_center(width, height);
    let error = wcs::separation_arcmin(center.ra_deg, center.dec_deg, target_ra, target_dec);
    info!(pointing_error_arcmin = error, "pointing error measured");
    session.pointing_error_arcmin = Some(error);
}

/// The photometric branch: SCAMP, resample, reference catalog,
/// associated re-extraction, zero-point fit with its diagnostic plot.
fn measure_zero_point(
    session: &mut ImageSession,
    config: &TelescopeConfig,
    tools: &mut dyn AnalysisTools,
) -> Result<()> {
    match tools.solve_photometry(session)? {
        PhotometryOutcome::Failed => {
            info!("SCAMP failed. Skipping photometric calculations.");
            return Ok(());
        }
        PhotometryOutcome::Solved => {}
    }

    let resampled = tools.resample(session)?;
    session
        .set_working_image(resampled)
        .context("Failed to switch to the resampled image")?;

    session.catalog_stars = tools.fetch_catalog(session, config)?;
    info!(n_catalog = session.catalog_stars.len(), "reference catalog fetched");

    extract_and_measure(session, config, tools, ExtractionMode::Associated)?;

    if let Some(sources) = &session.sources {
        session.zero_point = photometry::fit_zero_point(sources);
    }
    match &session.zero_point {
        Some(zp) => info!(
            zero_point_mag = zp.zp_mag,
            n_matched = zp.n_matched,
            "zero point fitted"
        ),
        None => info!("too few catalog matches for a zero point"),
    }

    if let (Some(sources), Some(zp)) = (&session.sources, &session.zero_point) {
        if let Err(err) = plots::zp_plot(&session.zp_plot_path(), sources, zp) {
            warn!(error = %err, "Failed to make zero point plot");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::write_fits_image;
    use crate::sources::ExtractedSource;
    use crate::frame::FrameBuffer;
    use fitsio::FitsFile;
    use std::path::Path;

    /// Scripted stand-in for the external tool suite.
    struct ScriptedTools {
        stars_per_extract: usize,
        solution: Option<WCS>,
        photometry_outcome: PhotometryOutcome,
        extract_modes: Vec<ExtractionMode>,
        solve_calls: usize,
        photometry_calls: usize,
        resample_calls: usize,
        catalog_calls: usize,
    }

    impl ScriptedTools {
        fn new(stars_per_extract: usize) -> Self {
            Self {
                stars_per_extract,
                solution: None,
                photometry_outcome: PhotometryOutcome::Failed,
                extract_modes: Vec::new(),
                solve_calls: 0,
                photometry_calls: 0,
                resample_calls: 0,
                catalog_calls: 0,
            }
        }

        fn with_solution(mut self, solution: WCS) -> Self {
            self.solution = Some(solution);
            self
        }

        fn with_photometry(mut self, outcome: PhotometryOutcome) -> Self {
            self.photometry_outcome = outcome;
            self
        }
    }

    impl AnalysisTools for ScriptedTools {
        fn extract_sources(
            &mut self,
            _session: &ImageSession,
            _config: &TelescopeConfig,
            mode: ExtractionMode,
        ) -> Result<SourceCatalog> {
            self.extract_modes.push(mode);
            let sources = (0..self.stars_per_extract)
                .map(|i| {
                    let mag = -8.0 - (i % 7) as f32 * 0.25;
                    ExtractedSource {
                        x: 10.0 + i as f32,
                        y: 12.0 + i as f32,
                        flux: 1000.0,
                        mag,
                        fwhm: 3.0 + (i % 3) as f32 * 0.1,
                        a: 2.0,
                        b: 1.9,
                        flags: 0,
                        catalog_mag: match mode {
                            ExtractionMode::Plain => None,
                            ExtractionMode::Associated => Some(mag + 20.0),
                        },
                    }
                })
                .collect();
            Ok(SourceCatalog::new(sources))
        }

        fn solve_astrometry(
            &mut self,
            _session: &ImageSession,
            _config: &TelescopeConfig,
        ) -> Result<Option<WCS>> {
            self.solve_calls += 1;
            Ok(self.solution.clone())
        }

        fn solve_photometry(&mut self, _session: &ImageSession) -> Result<PhotometryOutcome> {
            self.photometry_calls += 1;
            Ok(self.photometry_outcome)
        }

        fn resample(&mut self, session: &ImageSession) -> Result<PathBuf> {
            self.resample_calls += 1;
            let path = session.work_path("resampled_swarp.fits");
            let frame = FrameBuffer::new_filled(64, 64, 100.0);
            write_fits_image(&path, &frame, Some(30.0))?;
            Ok(path)
        }

        fn fetch_catalog(
            &mut self,
            _session: &ImageSession,
            _config: &TelescopeConfig,
        ) -> Result<Vec<CatalogStar>> {
            self.catalog_calls += 1;
            Ok(vec![
                CatalogStar {
                    ra: 180.0,
                    dec: 0.0,
                    mag: 12.0,
                    mag_err: 0.05,
                };
                150
            ])
        }
    }

    fn centered_solution() -> WCS {
        WCS {
            crpix1: 31.5,
            crpix2: 31.5,
            crval1: 180.0,
            crval2: 0.0,
            cd1_1: -2.0 / 3600.0,
            cd1_2: 0.0,
            cd2_1: 0.0,
            cd2_2: 2.0 / 3600.0,
        }
    }

    fn test_config() -> TelescopeConfig {
        let yaml = r#"
name: test scope
site:
  latitude_deg: 19.54
  longitude_deg: -155.58
  elevation_m: 3400.0
optics:
  focal_length_mm: 530.0
  aperture_mm: 106.0
  pixel_size_um: 5.4
"#;
        serde_yml::from_str(yaml).unwrap()
    }

    /// 64x64 frame with a target position in the header; optionally a
    /// full TAN solution so the session loads as already solved.
    fn test_image(dir: &Path, with_wcs: bool) -> PathBuf {
        let path = dir.join("field.fits");
        let frame = FrameBuffer::new_filled(64, 64, 100.0);
        write_fits_image(&path, &frame, Some(30.0)).unwrap();

        let mut fptr = FitsFile::edit(&path).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_key(&mut fptr, "RA", 180.0_f64).unwrap();
        hdu.write_key(&mut fptr, "DEC", 0.0_f64).unwrap();
        if with_wcs {
            hdu.write_key(&mut fptr, "CTYPE1", "RA---TAN").unwrap();
            hdu.write_key(&mut fptr, "CTYPE2", "DEC--TAN").unwrap();
            hdu.write_key(&mut fptr, "CRPIX1", 32.5_f64).unwrap();
            hdu.write_key(&mut fptr, "CRPIX2", 32.5_f64).unwrap();
            hdu.write_key(&mut fptr, "CRVAL1", 180.0_f64).unwrap();
            hdu.write_key(&mut fptr, "CRVAL2", 0.0_f64).unwrap();
            hdu.write_key(&mut fptr, "CD1_1", -2.0_f64 / 3600.0).unwrap();
            hdu.write_key(&mut fptr, "CD1_2", 0.0_f64).unwrap();
            hdu.write_key(&mut fptr, "CD2_1", 0.0_f64).unwrap();
            hdu.write_key(&mut fptr, "CD2_2", 2.0_f64 / 3600.0).unwrap();
        }
        path
    }

    fn no_graphics() -> PipelineOptions {
        PipelineOptions {
            analyze: true,
            zero_point: false,
            graphics: false,
        }
    }

    #[test]
    fn unsolved_field_gets_one_solve_and_one_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), false);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150).with_solution(centered_solution());

        run(&mut session, &test_config(), &mut tools, &no_graphics()).unwrap();

        assert_eq!(tools.solve_calls, 1);
        assert_eq!(
            tools.extract_modes,
            vec![ExtractionMode::Plain, ExtractionMode::Plain]
        );
        assert!(session.wcs.is_some());
        // Solution center coincides with the header target.
        let error = session.pointing_error_arcmin.unwrap();
        assert!(error < 0.1, "pointing error was {error}");
        session.clean_up().unwrap();
    }

    #[test]
    fn blank_field_skips_solver_and_photometry() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), false);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(40).with_solution(centered_solution());
        let options = PipelineOptions {
            zero_point: true,
            ..no_graphics()
        };

        run(&mut session, &test_config(), &mut tools, &options).unwrap();

        assert_eq!(tools.solve_calls, 0);
        assert_eq!(tools.photometry_calls, 0);
        assert_eq!(tools.extract_modes, vec![ExtractionMode::Plain]);
        // Quality is still measured on the few stars present.
        assert!(session.fwhm.is_some());
        assert!(session.pointing_error_arcmin.is_none());
        session.clean_up().unwrap();
    }

    #[test]
    fn solved_image_never_reaches_the_solver() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), true);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150).with_solution(centered_solution());

        run(&mut session, &test_config(), &mut tools, &no_graphics()).unwrap();

        assert_eq!(tools.solve_calls, 0);
        assert_eq!(tools.extract_modes, vec![ExtractionMode::Plain]);
        assert!(session.pointing_error_arcmin.is_some());
        session.clean_up().unwrap();
    }

    #[test]
    fn failed_solve_leaves_the_session_unsolved() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), false);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150);

        run(&mut session, &test_config(), &mut tools, &no_graphics()).unwrap();

        assert_eq!(tools.solve_calls, 1);
        assert_eq!(tools.extract_modes, vec![ExtractionMode::Plain]);
        assert!(session.wcs.is_none());
        assert!(session.pointing_error_arcmin.is_none());
        session.clean_up().unwrap();
    }

    #[test]
    fn zero_point_flag_off_never_invokes_photometry() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), true);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150).with_photometry(PhotometryOutcome::Solved);

        run(&mut session, &test_config(), &mut tools, &no_graphics()).unwrap();

        assert_eq!(tools.photometry_calls, 0);
        assert_eq!(tools.resample_calls, 0);
        session.clean_up().unwrap();
    }

    #[test]
    fn scamp_failure_skips_all_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), true);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150).with_photometry(PhotometryOutcome::Failed);
        let options = PipelineOptions {
            zero_point: true,
            ..no_graphics()
        };

        run(&mut session, &test_config(), &mut tools, &options).unwrap();

        assert_eq!(tools.photometry_calls, 1);
        assert_eq!(tools.resample_calls, 0);
        assert_eq!(tools.catalog_calls, 0);
        assert_eq!(tools.extract_modes, vec![ExtractionMode::Plain]);
        assert!(session.zero_point.is_none());
        session.clean_up().unwrap();
    }

    #[test]
    fn zero_point_branch_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), true);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150).with_photometry(PhotometryOutcome::Solved);
        let options = PipelineOptions {
            zero_point: true,
            ..no_graphics()
        };

        run(&mut session, &test_config(), &mut tools, &options).unwrap();

        assert_eq!(tools.resample_calls, 1);
        assert_eq!(tools.catalog_calls, 1);
        assert_eq!(
            tools.extract_modes,
            vec![ExtractionMode::Plain, ExtractionMode::Associated]
        );
        assert!(!session.catalog_stars.is_empty());
        assert!(session.working_path().ends_with("resampled_swarp.fits"));

        // Scripted catalog magnitudes sit exactly 20 above instrumental.
        let zp = session.zero_point.unwrap();
        assert!((zp.zp_mag - 20.0).abs() < 1e-4);
        session.clean_up().unwrap();
    }

    #[test]
    fn analyze_off_only_loads_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = test_image(dir.path(), false);
        let mut session = ImageSession::open(&image, dir.path()).unwrap();
        let mut tools = ScriptedTools::new(150);
        let options = PipelineOptions {
            analyze: false,
            ..no_graphics()
        };

        run(&mut session, &test_config(), &mut tools, &options).unwrap();

        assert!(tools.extract_modes.is_empty());
        assert!(session.frame.is_some());
        assert!(session.sources.is_none());
        session.clean_up().unwrap();
    }
}
