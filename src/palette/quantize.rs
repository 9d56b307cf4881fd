//! Median-cut color quantization
//!
//! Sampled pixels are bucketed into a 5-bit-per-channel histogram (32768
//! cells). Boxes over that histogram are split at their population median
//! along the widest axis until `k` boxes exist. Splitting is population
//! driven for the first 75% of the boxes and population × volume driven
//! afterwards, which keeps small but distinct color regions from being
//! swallowed by large flat backgrounds.
//!
//! Every cell also accumulates the exact channel sums of its pixels, so a
//! box's color is the true mean of the pixels inside it rather than the
//! center of its histogram cells.

use image::RgbaImage;
use thiserror::Error;

use crate::color::Rgb;

const SIGBITS: u32 = 5;
const RSHIFT: u32 = 8 - SIGBITS;
const SIDE: usize = 1 << SIGBITS;
const CELLS: usize = SIDE * SIDE * SIDE;

/// Pixels with alpha below this are ignored
const MIN_ALPHA: u8 = 125;

/// Share of the boxes produced by population-only splitting
const POPULATION_PHASE: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantizeError {
    #[error("requested an empty palette")]
    ZeroColors,

    #[error("image has no pixels")]
    EmptyImage,

    #[error("image has no opaque pixels")]
    NoOpaquePixels,

    #[error("quantization aborted: {0}")]
    Aborted(String),
}

#[inline]
fn cell_index(r: usize, g: usize, b: usize) -> usize {
    (r << (2 * SIGBITS)) | (g << SIGBITS) | b
}

#[derive(Clone, Copy, Default)]
struct Cell {
    count: u64,
    sum: [u64; 3],
}

/// Pixel histogram with per-cell channel sums
struct Histogram {
    cells: Vec<Cell>,
    total: u64,
}

impl Histogram {
    fn from_image(image: &RgbaImage, quality: u32) -> Self {
        let mut cells = vec![Cell::default(); CELLS];
        let mut total = 0;

        let step = quality.max(1) as usize;
        for pixel in image.pixels().step_by(step) {
            let [r, g, b, a] = pixel.0;
            if a < MIN_ALPHA {
                continue;
            }

            let idx = cell_index(
                (r >> RSHIFT) as usize,
                (g >> RSHIFT) as usize,
                (b >> RSHIFT) as usize,
            );
            let cell = &mut cells[idx];
            cell.count += 1;
            cell.sum[0] += r as u64;
            cell.sum[1] += g as u64;
            cell.sum[2] += b as u64;
            total += 1;
        }

        Self { cells, total }
    }

    fn cell(&self, r: usize, g: usize, b: usize) -> &Cell {
        &self.cells[cell_index(r, g, b)]
    }
}

/// Inclusive bounds in histogram units, `[r, g, b]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorBox {
    lo: [usize; 3],
    hi: [usize; 3],
    count: u64,
}

impl ColorBox {
    fn full(histogram: &Histogram) -> Option<Self> {
        Self::fitted(histogram, [0, 0, 0], [SIDE - 1, SIDE - 1, SIDE - 1])
    }

    /// Shrink the given bounds to the populated cells; `None` when empty
    fn fitted(histogram: &Histogram, lo: [usize; 3], hi: [usize; 3]) -> Option<Self> {
        let mut min = [usize::MAX; 3];
        let mut max = [0usize; 3];
        let mut count = 0;

        for r in lo[0]..=hi[0] {
            for g in lo[1]..=hi[1] {
                for b in lo[2]..=hi[2] {
                    let cell = histogram.cell(r, g, b);
                    if cell.count == 0 {
                        continue;
                    }
                    count += cell.count;
                    for (axis, v) in [r, g, b].into_iter().enumerate() {
                        min[axis] = min[axis].min(v);
                        max[axis] = max[axis].max(v);
                    }
                }
            }
        }

        (count > 0).then_some(ColorBox {
            lo: min,
            hi: max,
            count,
        })
    }

    fn width(&self, axis: usize) -> usize {
        self.hi[axis] - self.lo[axis] + 1
    }

    fn volume(&self) -> u64 {
        (0..3).map(|axis| self.width(axis) as u64).product()
    }

    fn splittable(&self) -> bool {
        (0..3).any(|axis| self.width(axis) > 1)
    }

    /// Population along `axis`, one bucket per slice
    fn slice_counts(&self, histogram: &Histogram, axis: usize) -> Vec<u64> {
        let mut counts = vec![0u64; self.width(axis)];
        for r in self.lo[0]..=self.hi[0] {
            for g in self.lo[1]..=self.hi[1] {
                for b in self.lo[2]..=self.hi[2] {
                    let pos = [r, g, b][axis] - self.lo[axis];
                    counts[pos] += histogram.cell(r, g, b).count;
                }
            }
        }
        counts
    }

    /// Split at the population median of the widest axis
    fn split(&self, histogram: &Histogram) -> Option<(ColorBox, ColorBox)> {
        if !self.splittable() {
            return None;
        }

        // Widest axis; ties resolve r, then g, then b
        let axis = (0..3)
            .rev()
            .max_by_key(|&axis| self.width(axis))
            .unwrap_or(0);

        let counts = self.slice_counts(histogram, axis);
        let half = self.count.div_ceil(2);
        let mut running = 0;
        let mut cut = counts.len() - 1;
        for (pos, count) in counts.iter().enumerate() {
            running += count;
            if running >= half {
                cut = pos;
                break;
            }
        }
        // Both halves must be non-empty; the box is fitted so its last slice is populated
        let cut = self.lo[axis] + cut.min(counts.len() - 2);

        let mut left_hi = self.hi;
        left_hi[axis] = cut;
        let mut right_lo = self.lo;
        right_lo[axis] = cut + 1;

        let left = ColorBox::fitted(histogram, self.lo, left_hi)?;
        let right = ColorBox::fitted(histogram, right_lo, self.hi)?;
        Some((left, right))
    }

    /// Mean of the pixels inside the box
    fn average(&self, histogram: &Histogram) -> Rgb {
        let mut sum = [0u64; 3];
        for r in self.lo[0]..=self.hi[0] {
            for g in self.lo[1]..=self.hi[1] {
                for b in self.lo[2]..=self.hi[2] {
                    let cell = histogram.cell(r, g, b);
                    for (channel, s) in sum.iter_mut().enumerate() {
                        *s += cell.sum[channel];
                    }
                }
            }
        }

        let mean = |s: u64| ((s + self.count / 2) / self.count).min(255) as u8;
        Rgb::new(mean(sum[0]), mean(sum[1]), mean(sum[2]))
    }
}

/// Repeatedly split the highest-priority splittable box until `target` boxes exist
fn split_until<F>(boxes: &mut Vec<ColorBox>, histogram: &Histogram, target: usize, priority: F)
where
    F: Fn(&ColorBox) -> u64,
{
    while boxes.len() < target {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.splittable())
            .max_by(|(ia, a), (ib, b)| priority(a).cmp(&priority(b)).then(ib.cmp(ia)))
            .map(|(idx, _)| idx);

        let Some(idx) = candidate else {
            break;
        };

        match boxes[idx].split(histogram) {
            Some((left, right)) => {
                boxes[idx] = left;
                boxes.push(right);
            }
            None => break,
        }
    }
}

/// Reduce an image to `k` representative colors, most populous first.
///
/// # Arguments
/// * `image` - Decoded RGBA pixels
/// * `k` - Number of colors to return
/// * `quality` - Sample every `quality`-th pixel (1 = every pixel)
///
/// # Returns
/// * Exactly `k` colors. When the image has fewer natural clusters than `k`,
///   the clusters found are repeated in order to fill the palette.
pub fn quantize(image: &RgbaImage, k: usize, quality: u32) -> Result<Vec<Rgb>, QuantizeError> {
    if k == 0 {
        return Err(QuantizeError::ZeroColors);
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(QuantizeError::EmptyImage);
    }

    let histogram = Histogram::from_image(image, quality);
    if histogram.total == 0 {
        return Err(QuantizeError::NoOpaquePixels);
    }

    let root = ColorBox::full(&histogram).ok_or(QuantizeError::NoOpaquePixels)?;
    let mut boxes = vec![root];

    let population_target = ((k as f64) * POPULATION_PHASE).ceil() as usize;
    split_until(&mut boxes, &histogram, population_target, |b| b.count);
    split_until(&mut boxes, &histogram, k, |b| b.count * b.volume());

    let mut clusters: Vec<(u64, Rgb)> = boxes
        .iter()
        .map(|b| (b.count, b.average(&histogram)))
        .collect();
    // Most populous first; color breaks ties so the order is stable
    clusters.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    Ok(clusters
        .iter()
        .map(|(_, color)| *color)
        .cycle()
        .take(k)
        .collect())
}
