//! Reference-frame matching on luminance.
//!
//! The sample is resized to the reference's dimensions, both are reduced to
//! BT.601 luma, and scored with the mean structural similarity over 7x7
//! windows. Frames too small for a window fall back to the fraction of
//! pixels whose luma differs by at most `LUMA_TOLERANCE`.

use std::borrow::Cow;

use image::imageops::{self, FilterType};

use crate::types::Capture;

pub const DEFAULT_THRESHOLD_PERCENT: u8 = 80;

const WINDOW: usize = 7;
const LUMA_TOLERANCE: f64 = 30.0;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Score in [0, 1]; 1 means identical.
pub fn similarity(reference: &Capture, sample: &Capture) -> f64 {
    let (w, h) = (reference.width, reference.height);
    if w == 0 || h == 0 || sample.width == 0 || sample.height == 0 {
        return 0.0;
    }
    let sample: Cow<Capture> = if sample.width == w && sample.height == h {
        Cow::Borrowed(sample)
    } else {
        let resized = imageops::resize(&sample.to_rgba_image(), w, h, FilterType::Triangle);
        Cow::Owned(Capture::from_rgba(resized))
    };

    let a = luminance(reference);
    let b = luminance(&sample);
    let score = structural_similarity(&a, &b, w as usize, h as usize)
        .unwrap_or_else(|| pixel_agreement(&a, &b));
    score.clamp(0.0, 1.0)
}

/// True when the similarity strictly exceeds `threshold_percent`.
pub fn matches(reference: &Capture, sample: &Capture, threshold_percent: u8) -> bool {
    similarity(reference, sample) > threshold_percent as f64 / 100.0
}

fn luminance(frame: &Capture) -> Vec<f64> {
    frame
        .pixels()
        .map(|[r, g, b]| 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64)
        .collect()
}

fn pixel_agreement(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let close = a
        .iter()
        .zip(b)
        .filter(|(x, y)| (*x - *y).abs() <= LUMA_TOLERANCE)
        .count();
    close as f64 / a.len() as f64
}

/// Summed-area table with one row/column of zero padding.
struct Integral {
    sums: Vec<f64>,
    stride: usize,
}

impl Integral {
    fn build(w: usize, h: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = w + 1;
        let mut sums = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            for x in 0..w {
                row += value(y * w + x);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { sums, stride }
    }

    fn window(&self, x: usize, y: usize, size: usize) -> f64 {
        let s = self.stride;
        self.sums[(y + size) * s + x + size] - self.sums[y * s + x + size] - self.sums[(y + size) * s + x]
            + self.sums[y * s + x]
    }
}

/// Mean SSIM over every full window, or `None` if the frame is smaller
/// than one window.
fn structural_similarity(a: &[f64], b: &[f64], w: usize, h: usize) -> Option<f64> {
    if w < WINDOW || h < WINDOW {
        return None;
    }
    let sa = Integral::build(w, h, |i| a[i]);
    let sb = Integral::build(w, h, |i| b[i]);
    let saa = Integral::build(w, h, |i| a[i] * a[i]);
    let sbb = Integral::build(w, h, |i| b[i] * b[i]);
    let sab = Integral::build(w, h, |i| a[i] * b[i]);

    let n = (WINDOW * WINDOW) as f64;
    let mut total = 0.0;
    let mut windows = 0usize;
    for y in 0..=h - WINDOW {
        for x in 0..=w - WINDOW {
            let (ta, tb) = (sa.window(x, y, WINDOW), sb.window(x, y, WINDOW));
            let (mean_a, mean_b) = (ta / n, tb / n);
            // sample (n - 1) normalisation
            let var_a = (saa.window(x, y, WINDOW) - ta * ta / n) / (n - 1.0);
            let var_b = (sbb.window(x, y, WINDOW) - tb * tb / n) / (n - 1.0);
            let cov = (sab.window(x, y, WINDOW) - ta * tb / n) / (n - 1.0);

            let num = (2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2);
            let den = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);
            total += num / den;
            windows += 1;
        }
    }
    Some(total / windows as f64)
}
