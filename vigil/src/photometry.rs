//! Photometric zero point from matched instrumental and catalog magnitudes.

use tracing::debug;

use crate::fwhm::median_and_mad_f32_mut;
use crate::sources::SourceCatalog;

/// Result of the external photometric solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotometryOutcome {
    Solved,
    Failed,
}

/// Fitted photometric zero point.
#[derive(Debug, Clone, Copy)]
pub struct ZeroPoint {
    /// Median of (catalog - instrumental) magnitude over matched sources.
    pub zp_mag: f32,
    /// MAD of the accepted magnitude offsets.
    pub mad_mag: f32,
    /// Matched pairs used by the fit, after rejection.
    pub n_matched: usize,
}

/// Fits the zero point as the robust median offset between catalog and
/// instrumental magnitudes; offsets further than 3 MADs from the first
/// median are rejected once. Returns `None` when no matched pair exists.
pub fn fit_zero_point(catalog: &SourceCatalog) -> Option<ZeroPoint> {
    let pairs = catalog.matched_magnitudes();
    if pairs.is_empty() {
        debug!("no matched sources, zero point not fit");
        return None;
    }

    let mut offsets: Vec<f32> = pairs.iter().map(|&(inst, cat)| cat - inst).collect();
    let (median, mad) = median_and_mad_f32_mut(&mut offsets);

    // The MAD floor keeps a near-uniform offset distribution from
    // rejecting its own scatter; the median itself always survives.
    let threshold = 3.0 * mad.max(0.01);
    let mut accepted: Vec<f32> = pairs
        .iter()
        .map(|&(inst, cat)| cat - inst)
        .filter(|&d| (d - median).abs() <= threshold)
        .collect();

    let (zp_mag, mad_mag) = median_and_mad_f32_mut(&mut accepted);
    Some(ZeroPoint {
        zp_mag,
        mad_mag,
        n_matched: accepted.len(),
    })
}
