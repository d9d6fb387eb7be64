//! Production tool suite: the astromatic binaries plus VizieR.

pub mod scamp;
pub mod sextractor;
pub mod solve_field;
pub mod swarp;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::catalog::{CatalogStar, VizierClient};
use crate::photometry::PhotometryOutcome;
use crate::pipeline::{AnalysisTools, ExtractionMode};
use crate::session::ImageSession;
use crate::sources::SourceCatalog;
use crate::telescope::TelescopeConfig;
use crate::wcs::{FieldCenter, WCS};

use self::scamp::Scamp;
use self::sextractor::{AssocEntry, ExtractionContext, SExtractor};
use self::solve_field::{SolveField, SolveHints};
use self::swarp::Swarp;

/// [`AnalysisTools`] backed by SExtractor, solve-field, SCAMP, SWarp
/// and the VizieR service.
///
/// The suite remembers the catalog of the last extraction run because
/// SCAMP consumes that file and SWarp picks up the .head written next
/// to it.
pub struct AstromaticSuite {
    sextractor: SExtractor,
    solver: SolveField,
    scamp: Scamp,
    swarp: Swarp,
    vizier: VizierClient,
    last_catalog: Option<PathBuf>,
}

impl AstromaticSuite {
    pub fn from_config(config: &TelescopeConfig) -> Self {
        Self {
            sextractor: SExtractor::new(&config.tools.sex),
            solver: SolveField::new(&config.tools.solve_field),
            scamp: Scamp::new(&config.tools.scamp)
                .with_astref_catalog(scamp_astref(&config.catalog.name)),
            swarp: Swarp::new(&config.tools.swarp),
            vizier: VizierClient::new(),
            last_catalog: None,
        }
    }
}

impl AnalysisTools for AstromaticSuite {
    fn extract_sources(
        &mut self,
        session: &ImageSession,
        config: &TelescopeConfig,
        mode: ExtractionMode,
    ) -> Result<SourceCatalog> {
        let assoc = match mode {
            ExtractionMode::Plain => None,
            ExtractionMode::Associated => Some(project_catalog(session)?),
        };
        let ctx = ExtractionContext {
            pixel_scale_arcsec: config.pixel_scale_arcsec(),
            saturation_adu: config.saturation_adu,
            gain_e_adu: config.gain_e_adu,
            assoc,
        };

        let catalog_path = session.work_path(&format!("{}.ldac", session.base_name()));
        let catalog = self
            .sextractor
            .extract(session.working_path(), &catalog_path, &ctx)?;
        self.last_catalog = Some(catalog_path);
        Ok(catalog)
    }

    fn solve_astrometry(
        &mut self,
        session: &ImageSession,
        config: &TelescopeConfig,
    ) -> Result<Option<WCS>> {
        let hints = SolveHints {
            pixel_scale_arcsec: config.pixel_scale_arcsec(),
            ra_deg: session.header.target_ra_deg,
            dec_deg: session.header.target_dec_deg,
        };
        self.solver
            .solve(session.working_path(), session.work_dir(), &hints)
    }

    fn solve_photometry(&mut self, session: &ImageSession) -> Result<PhotometryOutcome> {
        let catalog = self
            .last_catalog
            .as_ref()
            .context("no extraction catalog for the photometric solution")?;
        self.scamp.solve(catalog, session.work_dir())
    }

    fn resample(&mut self, session: &ImageSession) -> Result<PathBuf> {
        let head = self
            .last_catalog
            .as_deref()
            .map(Scamp::head_path)
            .filter(|head| head.exists());
        self.swarp
            .resample(session.working_path(), head.as_deref(), session.work_dir())
    }

    fn fetch_catalog(
        &mut self,
        session: &ImageSession,
        config: &TelescopeConfig,
    ) -> Result<Vec<CatalogStar>> {
        let field = field_for(session, config)?;
        self.vizier.query_region(&config.catalog, &field)
    }
}

/// Projects the fetched reference stars into pixel space for an
/// associated extraction run.
fn project_catalog(session: &ImageSession) -> Result<Vec<AssocEntry>> {
    let wcs = session
        .wcs
        .as_ref()
        .context("no astrometric solution to project the reference catalog with")?;

    Ok(session
        .catalog_stars
        .iter()
        .map(|star| {
            let (x, y) = wcs.sky_to_pixel(star.ra, star.dec);
            AssocEntry {
                x,
                y,
                mag: star.mag,
            }
        })
        .collect())
}

/// Field center and radius for the catalog query: the solved WCS when
/// present, the header target with the optical field of view otherwise.
fn field_for(session: &ImageSession, config: &TelescopeConfig) -> Result<FieldCenter> {
    let (width, height) = session
        .dimensions()
        .context("no image loaded to derive the field from")?;

    if let Some(wcs) = &session.wcs {
        return Ok(wcs.field_center(width, height));
    }

    let (Some(ra_deg), Some(dec_deg)) =
        (session.header.target_ra_deg, session.header.target_dec_deg)
    else {
        bail!("no astrometric solution or header target to center the catalog query on");
    };

    let half_diagonal_px = ((width * width + height * height) as f64).sqrt() / 2.0;
    let radius_deg = config.pixel_scale_arcsec() * half_diagonal_px / 3600.0;
    Ok(FieldCenter {
        ra_deg,
        dec_deg,
        radius_deg,
    })
}

/// SCAMP spells its reference catalogs with a dash.
fn scamp_astref(catalog_name: &str) -> String {
    match catalog_name {
        "UCAC4" => "UCAC-4".to_string(),
        "UCAC3" => "UCAC-3".to_string(),
        "2MASS" => "2MASS".to_string(),
        other => other.to_string(),
    }
}
