//! FFT phase correlation between two equally sized rasters.
//!
//! 1. Subtract the mean and apply a separable Hann window
//! 2. 2D FFT of both inputs (row-column decomposition)
//! 3. Normalized cross-power spectrum
//! 4. Inverse FFT; the peak location is the translation
//! 5. Parabolic sub-pixel refinement around the peak
//!
//! Transform sizes equal the input size exactly; rustfft plans any length.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Cross-power magnitudes below this are treated as zero.
const SPECTRUM_EPSILON: f32 = 1e-9;

/// Translation estimate from [`PhaseCorrelator::correlate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    /// Horizontal displacement to apply to the target.
    pub dx: f64,
    /// Vertical displacement to apply to the target.
    pub dy: f64,
    /// Height of the correlation peak, in `[0, 1]`. 1 means a perfect match.
    pub response: f64,
}

/// Phase correlator planned for one raster size.
pub struct PhaseCorrelator {
    width: usize,
    height: usize,
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl PhaseCorrelator {
    /// Plan transforms for `width` x `height` rasters.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        let mut planner = FftPlanner::new();
        let row_window = hann_window(width);
        let col_window = hann_window(height);
        let window = col_window
            .iter()
            .flat_map(|&wy| row_window.iter().map(move |&wx| wx * wy))
            .collect();

        Self {
            width,
            height,
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
            window,
        }
    }

    /// Estimate the displacement that aligns `target` onto `reference`.
    ///
    /// Both inputs are row-major `width * height` buffers. Returns `None`
    /// when either buffer has the wrong length or the size is empty.
    #[must_use]
    pub fn correlate(&self, reference: &[f32], target: &[f32]) -> Option<Correlation> {
        let n = self.width * self.height;
        if n == 0 || reference.len() != n || target.len() != n {
            return None;
        }

        let mut ref_spec = self.prepare(reference);
        let mut tar_spec = self.prepare(target);
        self.fft_2d(&mut ref_spec, true);
        self.fft_2d(&mut tar_spec, true);

        let mut cross: Vec<Complex<f32>> = ref_spec
            .iter()
            .zip(&tar_spec)
            .map(|(r, t)| {
                let c = r * t.conj();
                let mag = c.norm();
                if mag > SPECTRUM_EPSILON {
                    c / mag
                } else {
                    Complex::new(0.0, 0.0)
                }
            })
            .collect();
        self.fft_2d(&mut cross, false);

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / n as f32;
        let surface: Vec<f32> = cross.iter().map(|c| c.re * scale).collect();

        let (peak_idx, peak) = surface
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best });
        let (px, py) = (peak_idx % self.width, peak_idx / self.width);

        let sub_x = self.parabolic_offset(&surface, px, py, true);
        let sub_y = self.parabolic_offset(&surface, px, py, false);

        Some(Correlation {
            dx: wrap(px, self.width) + sub_x,
            dy: wrap(py, self.height) + sub_y,
            response: f64::from(peak).clamp(0.0, 1.0),
        })
    }

    /// Mean-subtracted, windowed copy as complex samples.
    fn prepare(&self, image: &[f32]) -> Vec<Complex<f32>> {
        #[allow(clippy::cast_precision_loss)]
        let mean = image.iter().sum::<f32>() / image.len() as f32;
        image
            .iter()
            .zip(&self.window)
            .map(|(&v, &w)| Complex::new((v - mean) * w, 0.0))
            .collect()
    }

    /// In-place 2D FFT (forward or inverse, unnormalized).
    fn fft_2d(&self, data: &mut [Complex<f32>], forward: bool) {
        let (row_fft, col_fft) = if forward {
            (&self.row_forward, &self.col_forward)
        } else {
            (&self.row_inverse, &self.col_inverse)
        };

        // rustfft processes every `len`-sized chunk of the buffer.
        row_fft.process(data);

        let mut transposed = transpose(data, self.width, self.height);
        col_fft.process(&mut transposed);
        data.copy_from_slice(&transpose(&transposed, self.height, self.width));
    }

    /// Sub-pixel offset of the peak along one axis, in `[-0.5, 0.5]`.
    fn parabolic_offset(&self, surface: &[f32], px: usize, py: usize, horizontal: bool) -> f64 {
        let (len, pos) = if horizontal {
            (self.width, px)
        } else {
            (self.height, py)
        };
        if len < 3 {
            return 0.0;
        }
        let at = |p: usize| {
            let idx = if horizontal {
                py * self.width + p
            } else {
                p * self.width + px
            };
            f64::from(surface[idx])
        };
        let left = at((pos + len - 1) % len);
        let center = at(pos);
        let right = at((pos + 1) % len);

        let denom = left - 2.0 * center + right;
        if denom.abs() < f64::EPSILON {
            return 0.0;
        }
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    }
}

/// Signed displacement for a peak index on a circular axis.
#[allow(clippy::cast_precision_loss)]
fn wrap(index: usize, len: usize) -> f64 {
    if index > len / 2 {
        index as f64 - len as f64
    } else {
        index as f64
    }
}

fn transpose(data: &[Complex<f32>], width: usize, height: usize) -> Vec<Complex<f32>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

/// Symmetric Hann window of length `n`.
#[allow(clippy::cast_precision_loss)]
fn hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
        .collect()
}
