//! Row-major pixel buffer holding one image plane in raw ADU.

use std::ops::{Index, IndexMut};

use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pixels: Vec<f32>,
    width: usize,
    height: usize,
}

impl FrameBuffer {
    pub fn new(width: usize, height: usize, pixels: Vec<f32>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn new_filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [f32] {
        &mut self.pixels
    }

    /// Copies out the `width` x `height` region with top-left corner at (x, y).
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> FrameBuffer {
        assert!(
            x + width <= self.width && y + height <= self.height,
            "crop region out of bounds"
        );

        let mut pixels = Vec::with_capacity(width * height);
        for row in y..y + height {
            let start = row * self.width + x;
            pixels.extend_from_slice(&self.pixels[start..start + width]);
        }
        FrameBuffer::new(width, height, pixels)
    }

    /// Mean-bins the frame by `factor` in both axes. Trailing rows and
    /// columns that do not fill a whole bin are dropped.
    pub fn binned(&self, factor: usize) -> FrameBuffer {
        assert!(factor > 0, "bin factor must be positive");
        if factor == 1 {
            return self.clone();
        }

        let out_width = self.width / factor;
        let out_height = self.height / factor;
        let norm = 1.0 / (factor * factor) as f32;

        let mut pixels = vec![0.0_f32; out_width * out_height];
        pixels
            .par_chunks_mut(out_width.max(1))
            .enumerate()
            .for_each(|(oy, row)| {
                for (ox, out) in row.iter_mut().enumerate() {
                    let mut sum = 0.0_f32;
                    for dy in 0..factor {
                        let base = (oy * factor + dy) * self.width + ox * factor;
                        for dx in 0..factor {
                            sum += self.pixels[base + dx];
                        }
                    }
                    *out = sum * norm;
                }
            });

        FrameBuffer::new(out_width, out_height, pixels)
    }

    /// Pixel values at the given percentiles (in [0, 100]), ignoring
    /// non-finite pixels. Returns (0.0, 1.0) for an empty frame.
    pub fn percentile_levels(&self, low_pct: f32, high_pct: f32) -> (f32, f32) {
        let mut values: Vec<f32> = self
            .pixels
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return (0.0, 1.0);
        }
        values.sort_unstable_by(f32::total_cmp);

        let pick = |pct: f32| {
            let idx = ((pct / 100.0) * (values.len() - 1) as f32).round() as usize;
            values[idx.min(values.len() - 1)]
        };
        (pick(low_pct), pick(high_pct))
    }
}

impl Index<(usize, usize)> for FrameBuffer {
    type Output = f32;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl IndexMut<(usize, usize)> for FrameBuffer {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}
