//! World Coordinate System support for FITS images.
//!
//! Implements the TAN (tangent plane / gnomonic) projection for converting
//! between pixel coordinates and sky coordinates (RA/Dec), plus the
//! great-circle separation used for pointing-error measurement.

/// World Coordinate System of one image.
///
/// Covers the TAN projection, which is what both solve-field and SCAMP
/// produce for wide-field optical frames.
#[derive(Debug, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub struct WCS {
    /// Reference pixel X (1-indexed in FITS, stored 0-indexed)
    pub crpix1: f64,
    /// Reference pixel Y (1-indexed in FITS, stored 0-indexed)
    pub crpix2: f64,
    /// RA at the reference pixel (degrees)
    pub crval1: f64,
    /// Dec at the reference pixel (degrees)
    pub crval2: f64,
    /// CD matrix element (1,1) - degrees per pixel
    pub cd1_1: f64,
    /// CD matrix element (1,2)
    pub cd1_2: f64,
    /// CD matrix element (2,1)
    pub cd2_1: f64,
    /// CD matrix element (2,2)
    pub cd2_2: f64,
}

/// Sky position of the frame center plus a radius covering the whole frame.
/// This is the region handed to catalog queries.
#[derive(Debug, Clone, Copy)]
pub struct FieldCenter {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub radius_deg: f64,
}

impl WCS {
    /// Builds a WCS from FITS header keywords.
    ///
    /// Expects CRPIX1/2 and CRVAL1/2, plus either the CD matrix
    /// (CD1_1..CD2_2) or the older CDELT/CROTA convention.
    pub fn from_header<F>(mut get_keyword: F) -> Option<Self>
    where
        F: FnMut(&str) -> Option<f64>,
    {
        let crpix1 = get_keyword("CRPIX1")? - 1.0; // convert to 0-indexed
        let crpix2 = get_keyword("CRPIX2")? - 1.0;
        let crval1 = get_keyword("CRVAL1")?;
        let crval2 = get_keyword("CRVAL2")?;

        let (cd1_1, cd1_2, cd2_1, cd2_2) =
            if let (Some(cd1_1), Some(cd1_2), Some(cd2_1), Some(cd2_2)) = (
                get_keyword("CD1_1"),
                get_keyword("CD1_2"),
                get_keyword("CD2_1"),
                get_keyword("CD2_2"),
            ) {
                (cd1_1, cd1_2, cd2_1, cd2_2)
            } else {
                let cdelt1 = get_keyword("CDELT1")?;
                let cdelt2 = get_keyword("CDELT2")?;
                let crota2 = get_keyword("CROTA2").unwrap_or(0.0).to_radians();

                let cos_r = crota2.cos();
                let sin_r = crota2.sin();

                (
                    cdelt1 * cos_r,
                    -cdelt2 * sin_r,
                    cdelt1 * sin_r,
                    cdelt2 * cos_r,
                )
            };

        Some(Self {
            crpix1,
            crpix2,
            crval1,
            crval2,
            cd1_1,
            cd1_2,
            cd2_1,
            cd2_2,
        })
    }

    /// Converts pixel coordinates to (RA, Dec) in degrees.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix1;
        let dy = y - self.crpix2;

        // Intermediate world coordinates (degrees)
        let xi = self.cd1_1 * dx + self.cd1_2 * dy;
        let eta = self.cd2_1 * dx + self.cd2_2 * dy;

        let xi_rad = xi.to_radians();
        let eta_rad = eta.to_radians();
        let ra0_rad = self.crval1.to_radians();
        let dec0_rad = self.crval2.to_radians();

        let rho = (xi_rad * xi_rad + eta_rad * eta_rad).sqrt();

        let (ra, dec) = if rho < 1e-10 {
            (self.crval1, self.crval2)
        } else {
            let c = rho.atan();
            let sin_c = c.sin();
            let cos_c = c.cos();

            let dec_rad = (cos_c * dec0_rad.sin() + eta_rad * sin_c * dec0_rad.cos() / rho).asin();

            let ra_rad = ra0_rad
                + (xi_rad * sin_c)
                    .atan2(rho * dec0_rad.cos() * cos_c - eta_rad * dec0_rad.sin() * sin_c);

            (ra_rad.to_degrees(), dec_rad.to_degrees())
        };

        let ra_norm = if ra < 0.0 { ra + 360.0 } else { ra % 360.0 };
        (ra_norm, dec)
    }

    /// Converts (RA, Dec) in degrees to pixel coordinates.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let ra_rad = ra.to_radians();
        let dec_rad = dec.to_radians();
        let ra0_rad = self.crval1.to_radians();
        let dec0_rad = self.crval2.to_radians();

        let cos_dec = dec_rad.cos();
        let sin_dec = dec_rad.sin();
        let cos_dec0 = dec0_rad.cos();
        let sin_dec0 = dec0_rad.sin();
        let cos_dra = (ra_rad - ra0_rad).cos();
        let sin_dra = (ra_rad - ra0_rad).sin();

        let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;

        let xi = (cos_dec * sin_dra / denom).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / denom).to_degrees();

        let det = self.cd1_1 * self.cd2_2 - self.cd1_2 * self.cd2_1;
        assert!(det.abs() > 1e-15, "CD matrix is singular");

        let dx = (self.cd2_2 * xi - self.cd1_2 * eta) / det;
        let dy = (-self.cd2_1 * xi + self.cd1_1 * eta) / det;

        (self.crpix1 + dx, self.crpix2 + dy)
    }

    /// Sky position of the frame center with a radius reaching the corners.
    pub fn field_center(&self, width: usize, height: usize) -> FieldCenter {
        let (ra_deg, dec_deg) = self.pixel_to_sky(width as f64 / 2.0, height as f64 / 2.0);
        let (corner_ra, corner_dec) = self.pixel_to_sky(0.0, 0.0);
        let radius_deg = separation_deg(ra_deg, dec_deg, corner_ra, corner_dec);
        FieldCenter {
            ra_deg,
            dec_deg,
            radius_deg,
        }
    }

    /// Approximate pixel scale in arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale = ((self.cd1_1 * self.cd1_1 + self.cd2_1 * self.cd2_1).sqrt()
            + (self.cd1_2 * self.cd1_2 + self.cd2_2 * self.cd2_2).sqrt())
            / 2.0;
        scale * 3600.0
    }
}

/// Great-circle separation between two sky positions, in degrees.
pub fn separation_deg(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let dec1_rad = dec1.to_radians();
    let dec2_rad = dec2.to_radians();
    let dra_rad = (ra1 - ra2).to_radians();

    let cos_d = dec1_rad.sin() * dec2_rad.sin() + dec1_rad.cos() * dec2_rad.cos() * dra_rad.cos();
    cos_d.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Great-circle separation in arcminutes, the unit pointing error is
/// reported in.
pub fn separation_arcmin(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    separation_deg(ra1, dec1, ra2, dec2) * 60.0
}
