//! Annotated JPEG previews of a measured image.
//!
//! Two previews per run: a 2x-binned full frame and an unbinned crop of
//! the image center. Both use the same percentile stretch; markers are
//! drawn over the stretched pixels.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use imageproc::drawing::{draw_cross_mut, draw_hollow_circle_mut};
use rayon::prelude::*;
use tracing::info;

use crate::frame::FrameBuffer;
use crate::session::ImageSession;

/// Percentile clipped off the low end of the stretch.
pub const STRETCH_LOW_PCT: f32 = 1.50;
/// Percentile clipped off the high end.
pub const STRETCH_HIGH_PCT: f32 = 0.50;

const FULLFRAME_BINNING: usize = 2;
const FULLFRAME_QUALITY: u8 = 70;
const CROP_QUALITY: u8 = 40;
/// Half-size of the centered crop window, pixels.
const CROP_HALF_SIZE: isize = 800;

/// Marker colors.
mod colors {
    use image::Rgb;

    pub const POINTING: Rgb<u8> = Rgb([255, 255, 0]);
    pub const DETECTED: Rgb<u8> = Rgb([255, 50, 50]);
    pub const CATALOG: Rgb<u8> = Rgb([0, 255, 0]);
}

/// Image-to-preview coordinate transform.
#[derive(Debug, Clone, Copy)]
struct Mapping {
    scale: f64,
    origin_x: f64,
    origin_y: f64,
}

impl Mapping {
    fn apply(&self, x: f64, y: f64) -> (i32, i32) {
        (
            ((x - self.origin_x) * self.scale).round() as i32,
            ((y - self.origin_y) * self.scale).round() as i32,
        )
    }
}

/// Renders both previews into the session output directory.
pub fn render_previews(session: &ImageSession) -> Result<()> {
    let frame = session
        .frame
        .as_ref()
        .context("no image loaded to render previews from")?;

    let fullframe = fullframe_preview(session, frame)?;
    write_jpeg(
        &session.fullframe_preview_path(),
        &fullframe,
        FULLFRAME_QUALITY,
    )?;

    let cropped = crop_preview(session, frame)?;
    write_jpeg(&session.crop_preview_path(), &cropped, CROP_QUALITY)?;

    info!(
        fullframe = %session.fullframe_preview_path().display(),
        crop = %session.crop_preview_path().display(),
        "previews written"
    );
    Ok(())
}

/// Centered crop rectangle as (x0, y0, x1, y1), clamped to the frame.
pub fn crop_window(width: usize, height: usize) -> (usize, usize, usize, usize) {
    let half_w = (width / 2) as isize;
    let half_h = (height / 2) as isize;

    let x0 = (half_w - CROP_HALF_SIZE).max(0) as usize;
    let y0 = (half_h - CROP_HALF_SIZE).max(0) as usize;
    let x1 = ((half_w + CROP_HALF_SIZE) as usize).min(width);
    let y1 = ((half_h + CROP_HALF_SIZE) as usize).min(height);
    (x0, y0, x1, y1)
}

fn fullframe_preview(session: &ImageSession, frame: &FrameBuffer) -> Result<RgbImage> {
    let binned = frame.binned(FULLFRAME_BINNING);
    let mut image = stretched_rgb(&binned)?;
    let map = Mapping {
        scale: 1.0 / FULLFRAME_BINNING as f64,
        origin_x: 0.0,
        origin_y: 0.0,
    };

    draw_detected_stars(&mut image, session, map);
    draw_catalog_stars(&mut image, session, map);
    draw_pointing_marker(&mut image, session, frame, map);
    Ok(image)
}

fn crop_preview(session: &ImageSession, frame: &FrameBuffer) -> Result<RgbImage> {
    let (x0, y0, x1, y1) = crop_window(frame.width(), frame.height());
    let cropped = frame.crop(x0, y0, x1 - x0, y1 - y0);
    let mut image = stretched_rgb(&cropped)?;
    let map = Mapping {
        scale: 1.0,
        origin_x: x0 as f64,
        origin_y: y0 as f64,
    };

    draw_detected_stars(&mut image, session, map);
    draw_pointing_marker(&mut image, session, frame, map);
    Ok(image)
}

/// Percentile-stretched grayscale rendering as RGB bytes.
fn stretched_rgb(frame: &FrameBuffer) -> Result<RgbImage> {
    let (low, high) = frame.percentile_levels(STRETCH_LOW_PCT, 100.0 - STRETCH_HIGH_PCT);
    let range = (high - low).max(1e-6);

    let width = frame.width();
    let mut data = vec![0u8; frame.len() * 3];
    data.par_chunks_mut(width * 3)
        .zip(frame.pixels().par_chunks(width))
        .for_each(|(row_bytes, row)| {
            for (chunk, &p) in row_bytes.chunks_exact_mut(3).zip(row) {
                let v = (((p - low) / range) * 255.0).clamp(0.0, 255.0) as u8;
                chunk.fill(v);
            }
        });

    RgbImage::from_raw(width as u32, frame.height() as u32, data)
        .context("preview dimensions exceed the image format")
}

fn draw_detected_stars(image: &mut RgbImage, session: &ImageSession, map: Mapping) {
    let Some(catalog) = &session.sources else {
        return;
    };
    for source in catalog.iter() {
        let (cx, cy) = map.apply(source.x as f64, source.y as f64);
        let radius = (source.fwhm as f64 * 1.5 * map.scale).max(4.0) as i32;
        draw_hollow_circle_mut(image, (cx, cy), radius, colors::DETECTED);
    }
}

fn draw_catalog_stars(image: &mut RgbImage, session: &ImageSession, map: Mapping) {
    let Some(wcs) = &session.wcs else {
        return;
    };
    for star in &session.catalog_stars {
        let (x, y) = wcs.sky_to_pixel(star.ra, star.dec);
        let (cx, cy) = map.apply(x, y);
        draw_hollow_circle_mut(image, (cx, cy), 8, colors::CATALOG);
    }
}

/// Crosshair at the commanded target position, or the frame center when
/// the target cannot be placed on the pixels.
fn draw_pointing_marker(
    image: &mut RgbImage,
    session: &ImageSession,
    frame: &FrameBuffer,
    map: Mapping,
) {
    let target = match (
        &session.wcs,
        session.header.target_ra_deg,
        session.header.target_dec_deg,
    ) {
        (Some(wcs), Some(ra), Some(dec)) => wcs.sky_to_pixel(ra, dec),
        _ => (
            (frame.width() as f64 - 1.0) / 2.0,
            (frame.height() as f64 - 1.0) / 2.0,
        ),
    };

    let (cx, cy) = map.apply(target.0, target.1);
    draw_hollow_circle_mut(image, (cx, cy), 14, colors::POINTING);
    draw_cross_mut(image, colors::POINTING, cx, cy);
}

fn write_jpeg(path: &Path, image: &RgbImage, quality: u8) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create preview file: {}", path.display()))?;
    let writer = BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(writer, quality);
    encoder
        .encode_image(image)
        .with_context(|| format!("Failed to encode JPEG: {}", path.display()))?;
    Ok(())
}
