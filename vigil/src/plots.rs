//! Diagnostic plots: PSF quality histograms and the zero-point fit.

use std::path::Path;

use anyhow::{anyhow, Result};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::fwhm::FwhmStats;
use crate::photometry::ZeroPoint;
use crate::sources::SourceCatalog;

const HISTOGRAM_BINS: usize = 30;

/// FWHM and ellipticity distributions of the extracted sources, with
/// the robust medians marked.
pub fn psf_plot(path: &Path, catalog: &SourceCatalog, stats: &FwhmStats) -> Result<()> {
    draw_psf_plot(path, catalog, stats)
        .map_err(|err| anyhow!("Failed to render PSF plot: {err}"))
}

/// Instrumental vs catalog magnitude scatter with the fitted offset.
pub fn zp_plot(path: &Path, catalog: &SourceCatalog, zp: &ZeroPoint) -> Result<()> {
    draw_zp_plot(path, catalog, zp)
        .map_err(|err| anyhow!("Failed to render zero point plot: {err}"))
}

fn draw_psf_plot(
    path: &Path,
    catalog: &SourceCatalog,
    stats: &FwhmStats,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let clean: Vec<_> = catalog.iter().filter(|s| s.is_clean()).collect();
    let fwhm_values: Vec<f64> = clean.iter().map(|s| s.fwhm as f64).collect();
    let ellipticities: Vec<f64> = clean.iter().map(|s| s.ellipticity() as f64).collect();

    let root = BitMapBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let areas = root.split_evenly((2, 1));
    draw_histogram(
        &areas[0],
        "FWHM Distribution",
        "FWHM (pixels)",
        &fwhm_values,
        stats.median_px as f64,
    )?;
    draw_histogram(
        &areas[1],
        "Ellipticity Distribution",
        "Ellipticity",
        &ellipticities,
        stats.ellipticity as f64,
    )?;

    root.present()?;
    Ok(())
}

fn draw_histogram(
    area: &DrawingArea<BitMapBackend, Shift>,
    title: &str,
    x_label: &str,
    values: &[f64],
    median: f64,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    if values.is_empty() {
        return Ok(());
    }

    let min_val = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_val = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    // Identical values still need a drawable axis range.
    let pad = ((max_val - min_val) * 0.1).max(0.05);
    let hist_min = min_val - pad;
    let hist_max = max_val + pad;

    let bin_width = (hist_max - hist_min) / HISTOGRAM_BINS as f64;
    let mut bins = vec![0u32; HISTOGRAM_BINS];
    for &value in values {
        let idx = (((value - hist_min) / bin_width) as usize).min(HISTOGRAM_BINS - 1);
        bins[idx] += 1;
    }
    let max_count = *bins.iter().max().unwrap_or(&1) as f64;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 25))
        .margin(5)
        .x_label_area_size(35)
        .y_label_area_size(45)
        .build_cartesian_2d(hist_min..hist_max, 0.0..max_count * 1.1)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc("Count")
        .x_label_formatter(&|x| format!("{x:.2}"))
        .y_label_formatter(&|y| format!("{y:.0}"))
        .draw()?;

    chart.draw_series(bins.iter().enumerate().map(|(i, &count)| {
        let x0 = hist_min + i as f64 * bin_width;
        let x1 = x0 + bin_width;
        Rectangle::new([(x0, 0.0), (x1, count as f64)], BLUE.mix(0.5).filled())
    }))?;

    chart
        .draw_series(LineSeries::new(
            vec![(median, 0.0), (median, max_count * 1.1)],
            &RED,
        ))?
        .label(format!("median={median:.2}"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    Ok(())
}

fn draw_zp_plot(
    path: &Path,
    catalog: &SourceCatalog,
    zp: &ZeroPoint,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let pairs: Vec<(f64, f64)> = catalog
        .matched_magnitudes()
        .into_iter()
        .map(|(inst, cat)| (inst as f64, cat as f64))
        .collect();
    if pairs.is_empty() {
        return Ok(());
    }

    let inst_min = pairs.iter().fold(f64::INFINITY, |a, &(i, _)| a.min(i));
    let inst_max = pairs.iter().fold(f64::NEG_INFINITY, |a, &(i, _)| a.max(i));
    let cat_min = pairs.iter().fold(f64::INFINITY, |a, &(_, c)| a.min(c));
    let cat_max = pairs.iter().fold(f64::NEG_INFINITY, |a, &(_, c)| a.max(c));
    let x_pad = ((inst_max - inst_min) * 0.05).max(0.1);
    let y_pad = ((cat_max - cat_min) * 0.05).max(0.1);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Zero Point Fit ({} stars)", zp.n_matched),
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(
            inst_min - x_pad..inst_max + x_pad,
            cat_min - y_pad..cat_max + y_pad,
        )?;

    chart
        .configure_mesh()
        .x_desc("Instrumental magnitude")
        .y_desc("Catalog magnitude")
        .x_label_formatter(&|x| format!("{x:.1}"))
        .y_label_formatter(&|y| format!("{y:.1}"))
        .draw()?;

    chart.draw_series(
        pairs
            .iter()
            .map(|&(inst, cat)| Circle::new((inst, cat), 2, BLUE.filled())),
    )?;

    let zp_mag = zp.zp_mag as f64;
    chart
        .draw_series(LineSeries::new(
            vec![
                (inst_min - x_pad, inst_min - x_pad + zp_mag),
                (inst_max + x_pad, inst_max + x_pad + zp_mag),
            ],
            &RED,
        ))?
        .label(format!("ZP = {:.2}", zp.zp_mag))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
