//! Vigil - quality assessment for astronomical images.
//!
//! Vigil measures a single FITS image and reports how well the night went:
//! - Source extraction and FWHM / ellipticity statistics (SExtractor)
//! - Blind astrometric solving and pointing-error measurement (solve-field)
//! - Photometric zero point against a reference catalog (SCAMP, SWarp, VizieR)
//! - Annotated JPEG previews and diagnostic plots
//! - A JSONL record per measured image
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vigil::{measure_image, AstromaticSuite, JsonlRecorder, MeasureOptions, TelescopeConfig};
//!
//! let config = TelescopeConfig::load("panoptes.yaml")?;
//! let mut tools = AstromaticSuite::from_config(&config);
//! let mut recorder = JsonlRecorder::new("/data/images");
//!
//! let summary = measure_image(
//!     "/data/images/field_20260817at031500.fits",
//!     "/data/images",
//!     &config,
//!     &mut tools,
//!     &mut recorder,
//!     &MeasureOptions::default(),
//! )?;
//!
//! println!("FWHM {:?} px, {} stars", summary.fwhm_px, summary.n_stars);
//! ```

pub mod catalog;
pub mod frame;
pub mod fwhm;
pub mod measure;
pub mod photometry;
pub mod pipeline;
pub mod plots;
pub mod preview;
pub mod record;
pub mod session;
pub mod sources;
pub mod telescope;
pub mod tools;
pub mod wcs;

// ============================================================================
// Measurement entry points
// ============================================================================

pub use measure::{measure_image, LogOptions, MeasureOptions};
pub use pipeline::{AnalysisTools, ExtractionMode, PipelineOptions, BLANK_STAR_FLOOR};
pub use session::{ImageLoadError, ImageSession};

// ============================================================================
// Measurements
// ============================================================================

pub use fwhm::FwhmStats;
pub use photometry::{PhotometryOutcome, ZeroPoint};
pub use sources::{ExtractedSource, SourceCatalog};
pub use wcs::WCS;

// ============================================================================
// Configuration and external tools
// ============================================================================

pub use catalog::{CatalogStar, VizierClient};
pub use telescope::TelescopeConfig;
pub use tools::AstromaticSuite;

// ============================================================================
// Results
// ============================================================================

pub use record::{JsonlRecorder, Recorder, RunSummary};
