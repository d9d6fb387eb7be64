//! Source records parsed from extraction catalogs.

/// One detection from the source-extraction catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSource {
    /// Centroid X in pixels, 0-indexed.
    pub x: f32,
    /// Centroid Y in pixels, 0-indexed.
    pub y: f32,
    /// Automatic-aperture flux (ADU).
    pub flux: f32,
    /// Instrumental magnitude.
    pub mag: f32,
    /// Full width at half maximum, pixels.
    pub fwhm: f32,
    /// Profile semi-major axis, pixels.
    pub a: f32,
    /// Profile semi-minor axis, pixels.
    pub b: f32,
    /// Extraction flags; 0 means clean.
    pub flags: i32,
    /// Reference-catalog magnitude carried over by association, present
    /// only when extraction ran in associated mode.
    pub catalog_mag: Option<f32>,
}

impl ExtractedSource {
    /// Ellipticity `1 - b/a`; 0 for a perfectly round profile.
    pub fn ellipticity(&self) -> f32 {
        if self.a <= 0.0 {
            return 0.0;
        }
        (1.0 - self.b / self.a).max(0.0)
    }

    /// True when no extraction flags are raised (no blending, no
    /// saturation, no truncation).
    pub fn is_clean(&self) -> bool {
        self.flags == 0
    }
}

/// All sources extracted from one image.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    pub sources: Vec<ExtractedSource>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<ExtractedSource>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExtractedSource> {
        self.sources.iter()
    }

    /// (instrumental, catalog) magnitude pairs for clean associated
    /// sources with finite magnitudes.
    pub fn matched_magnitudes(&self) -> Vec<(f32, f32)> {
        self.sources
            .iter()
            .filter(|s| s.is_clean())
            .filter_map(|s| {
                let catalog_mag = s.catalog_mag?;
                (s.mag.is_finite() && catalog_mag.is_finite()).then_some((s.mag, catalog_mag))
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn test_source(fwhm: f32, a: f32, b: f32) -> ExtractedSource {
    ExtractedSource {
        x: 100.0,
        y: 100.0,
        flux: 1000.0,
        mag: -8.0,
        fwhm,
        a,
        b,
        flags: 0,
        catalog_mag: None,
    }
}
