//! Reference-star queries against VizieR.
//!
//! The photometric branch compares instrumental magnitudes against a
//! published catalog (UCAC4 by default), fetched as a cone search around
//! the solved field center.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::debug;

use crate::telescope::CatalogSpec;
use crate::wcs::FieldCenter;

/// A reference star from the photometric catalog.
#[derive(Debug, Clone)]
pub struct CatalogStar {
    /// Right Ascension (degrees)
    pub ra: f64,
    /// Declination (degrees)
    pub dec: f64,
    /// Magnitude in the configured band
    pub mag: f32,
    /// Magnitude error
    pub mag_err: f32,
}

/// Client for VizieR cone searches.
#[derive(Debug)]
pub struct VizierClient {
    client: reqwest::blocking::Client,
    server: String,
}

impl Default for VizierClient {
    fn default() -> Self {
        Self::new()
    }
}

impl VizierClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            server: "https://vizier.cds.unistra.fr".to_string(),
        }
    }

    /// Overrides the VizieR mirror.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Cone search around the field center, constrained to the catalog's
    /// configured band and faint limit. Returns the parsed star list.
    pub fn query_region(&self, spec: &CatalogSpec, field: &FieldCenter) -> Result<Vec<CatalogStar>> {
        let mag_column = format!("{}mag", spec.filter_band);
        let source = vizier_table(&spec.name);
        let url = format!("{}/viz-bin/asu-tsv", self.server);

        let center = format!("{:.6} {:+.6}", field.ra_deg, field.dec_deg);
        let radius = format!("{:.6}", field.radius_deg);
        let out_columns = format!("RAJ2000,DEJ2000,{0},e_{0}", mag_column);
        let mag_constraint = format!("<{}", spec.mag_limit);

        debug!(
            source = source.as_str(),
            center = center.as_str(),
            radius = radius.as_str(),
            "querying VizieR"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("-source", source.as_str()),
                ("-c", center.as_str()),
                ("-c.rd", radius.as_str()),
                ("-out", out_columns.as_str()),
                ("-out.max", "100000"),
                (mag_column.as_str(), mag_constraint.as_str()),
            ])
            .send()
            .context("Failed to query VizieR")?;

        if !response.status().is_success() {
            bail!("VizieR query failed: {}", response.status());
        }

        let text = response.text().context("Failed to read VizieR response")?;
        Ok(Self::parse_tsv(&text))
    }

    /// Parses VizieR TSV output. Comment, header, unit and separator lines
    /// are recognized by their non-numeric leading fields and skipped; rows
    /// with a blank magnitude are dropped.
    fn parse_tsv(text: &str) -> Vec<CatalogStar> {
        text.lines()
            .filter(|line| !line.starts_with('#') && !line.is_empty())
            .filter_map(|line| {
                let mut fields = line.split('\t').map(str::trim);
                let ra: f64 = fields.next()?.parse().ok()?;
                let dec: f64 = fields.next()?.parse().ok()?;
                let mag: f32 = fields.next()?.parse().ok()?;
                let mag_err: f32 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
                Some(CatalogStar {
                    ra,
                    dec,
                    mag,
                    mag_err,
                })
            })
            .collect()
    }
}

/// Maps a friendly catalog name to its VizieR table identifier; unknown
/// names pass through untouched so any table can be configured directly.
fn vizier_table(name: &str) -> String {
    match name.to_ascii_uppercase().as_str() {
        "UCAC4" => "I/322A/out".to_string(),
        "UCAC3" => "I/315/out".to_string(),
        "USNO-B1" => "I/284/out".to_string(),
        _ => name.to_string(),
    }
}
