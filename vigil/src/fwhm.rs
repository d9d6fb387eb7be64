//! Robust FWHM and ellipticity estimation over an extraction catalog.
//!
//! Uses median and MAD (Median Absolute Deviation) statistics so that
//! cosmic rays, saturated stars and edge artifacts do not drag the
//! seeing estimate.

use tracing::debug;

use crate::sources::SourceCatalog;

/// Sources participating in the estimate must have a plausible stellar
/// FWHM; anything outside this range is a hot pixel or a blended blob.
const FWHM_RANGE_PX: (f32, f32) = (0.5, 20.0);

/// Outlier rejection threshold in MADs.
const MAD_REJECTION: f32 = 3.0;

/// Minimum catalog size before outlier rejection is worth running.
const MIN_FOR_REJECTION: usize = 5;

/// Seeing estimate for one image.
#[derive(Debug, Clone, Copy)]
pub struct FwhmStats {
    /// Median FWHM in pixels.
    pub median_px: f32,
    /// Median Absolute Deviation of the accepted FWHM values, pixels.
    pub mad_px: f32,
    /// Median FWHM converted to arcseconds via the telescope pixel scale.
    pub arcsec: f32,
    /// Median ellipticity of the accepted sources.
    pub ellipticity: f32,
    /// Number of sources the estimate is based on, after rejection.
    pub n_used: usize,
}

/// Estimates FWHM and ellipticity from an extraction catalog.
///
/// Clean sources inside the plausible FWHM range are aggregated with a
/// median; values further than 3 MADs from it are rejected once and the
/// median recomputed. Returns `None` when no usable source survives the
/// quality filter.
pub fn estimate(catalog: &SourceCatalog, pixel_scale_arcsec: f64) -> Option<FwhmStats> {
    let accepted: Vec<(f32, f32)> = catalog
        .iter()
        .filter(|s| s.is_clean())
        .filter(|s| s.fwhm > FWHM_RANGE_PX.0 && s.fwhm < FWHM_RANGE_PX.1)
        .map(|s| (s.fwhm, s.ellipticity()))
        .collect();

    if accepted.is_empty() {
        debug!("no usable sources for FWHM estimation");
        return None;
    }

    let mut fwhms: Vec<f32> = accepted.iter().map(|&(f, _)| f).collect();
    let (median, mad) = median_and_mad_f32_mut(&mut fwhms);

    let (mut fwhms, mut ellipticities): (Vec<f32>, Vec<f32>) = if fwhms.len() >= MIN_FOR_REJECTION {
        // Floor the MAD so a near-uniform distribution does not reject
        // everything within measurement noise.
        let effective_mad = mad.max(median * 0.1);
        let max_fwhm = median + MAD_REJECTION * effective_mad;
        let min_fwhm = (median - MAD_REJECTION * effective_mad).max(FWHM_RANGE_PX.0);

        accepted
            .iter()
            .filter(|&&(f, _)| f >= min_fwhm && f <= max_fwhm)
            .copied()
            .unzip()
    } else {
        accepted.iter().copied().unzip()
    };

    if fwhms.is_empty() {
        // Degenerate rejection; fall back to the pre-rejection median.
        return Some(FwhmStats {
            median_px: median,
            mad_px: mad,
            arcsec: median * pixel_scale_arcsec as f32,
            ellipticity: 0.0,
            n_used: 0,
        });
    }

    let (final_median, final_mad) = median_and_mad_f32_mut(&mut fwhms);
    let median_ellipticity = median_f32_mut(&mut ellipticities);

    Some(FwhmStats {
        median_px: final_median,
        mad_px: final_mad,
        arcsec: final_median * pixel_scale_arcsec as f32,
        ellipticity: median_ellipticity,
        n_used: fwhms.len(),
    })
}

/// Median of a mutable slice, reordering it in place.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        let right = *right_median;
        let left = left_part.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (left + right) * 0.5
    }
}

/// Median and MAD of a mutable slice, reordering it in place.
pub fn median_and_mad_f32_mut(data: &mut [f32]) -> (f32, f32) {
    debug_assert!(!data.is_empty());

    let median = median_f32_mut(data);
    for v in data.iter_mut() {
        *v = (*v - median).abs();
    }
    let mad = median_f32_mut(data);
    (median, mad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{test_source, ExtractedSource, SourceCatalog};

    fn catalog_of(fwhms: &[f32]) -> SourceCatalog {
        SourceCatalog::new(fwhms.iter().map(|&f| test_source(f, 2.0, 2.0)).collect())
    }

    #[test]
    fn median_of_odd_and_even_slices() {
        let mut odd = [3.0, 1.0, 2.0];
        assert_eq!(median_f32_mut(&mut odd), 2.0);

        let mut even = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(median_f32_mut(&mut even), 2.5);
    }

    #[test]
    fn mad_of_known_distribution() {
        let mut data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let (median, mad) = median_and_mad_f32_mut(&mut data);
        assert_eq!(median, 3.0);
        assert_eq!(mad, 1.0);
    }

    #[test]
    fn estimate_recovers_the_median_seeing() {
        let fwhms: Vec<f32> = (0..20).map(|i| 3.5 + i as f32 * 0.05).collect();
        let stats = estimate(&catalog_of(&fwhms), 2.0).unwrap();

        assert!((stats.median_px - 3.975).abs() < 0.1);
        assert!((stats.arcsec - stats.median_px * 2.0).abs() < 1e-5);
        assert!(stats.n_used >= 18);
    }

    #[test]
    fn estimate_rejects_outliers() {
        let mut fwhms: Vec<f32> = (0..18).map(|i| 3.5 + i as f32 * 0.05).collect();
        fwhms.push(15.0);
        fwhms.push(0.9);

        let stats = estimate(&catalog_of(&fwhms), 1.0).unwrap();
        assert!((stats.median_px - 3.9).abs() < 0.5);
        assert!(stats.n_used < 20);
    }

    #[test]
    fn estimate_skips_flagged_and_implausible_sources() {
        let mut sources: Vec<ExtractedSource> =
            (0..10).map(|_| test_source(3.0, 2.0, 2.0)).collect();

        let mut flagged = test_source(9.0, 2.0, 2.0);
        flagged.flags = 4;
        sources.push(flagged);
        sources.push(test_source(0.1, 2.0, 2.0)); // hot pixel
        sources.push(test_source(35.0, 2.0, 2.0)); // blended blob

        let stats = estimate(&SourceCatalog::new(sources), 1.0).unwrap();
        assert!((stats.median_px - 3.0).abs() < 0.01);
        assert_eq!(stats.n_used, 10);
    }

    #[test]
    fn estimate_reports_median_ellipticity() {
        let sources: Vec<ExtractedSource> = (0..11)
            .map(|i| {
                let b = if i < 6 { 2.0 } else { 1.0 };
                test_source(3.0, 2.0, b)
            })
            .collect();

        let stats = estimate(&SourceCatalog::new(sources), 1.0).unwrap();
        assert_eq!(stats.ellipticity, 0.0);
    }

    #[test]
    fn estimate_returns_none_for_empty_catalog() {
        assert!(estimate(&SourceCatalog::default(), 1.0).is_none());
    }

    #[test]
    fn estimate_is_stable_under_measurement_noise() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let fwhms: Vec<f32> = (0..500)
            .map(|_| 3.2 + rng.random_range(-0.4..0.4))
            .collect();

        let stats = estimate(&catalog_of(&fwhms), 1.0).unwrap();
        assert!((stats.median_px - 3.2).abs() < 0.1);
        assert!(stats.mad_px < 0.4);
        assert!(stats.n_used > 400);
    }

    #[test]
    fn uniform_distribution_has_zero_mad() {
        let stats = estimate(&catalog_of(&[3.5; 20]), 1.0).unwrap();
        assert!((stats.median_px - 3.5).abs() < 0.01);
        assert!(stats.mad_px < 0.01);
        assert_eq!(stats.n_used, 20);
    }
}
