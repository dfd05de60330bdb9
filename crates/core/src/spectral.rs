//! Spectral helpers shared by the FFT-based filters
//!
//! Window functions, Hz-to-bin mapping, and cached rustfft plans.

use num_complex::Complex;
use rustfft::{Fft, FftNum, FftPlanner};
use std::sync::Arc;

/// Periodic Hann (raised-cosine) window of `size` points
pub fn hann_window(size: usize) -> Vec<f64> {
    let step = 2.0 * std::f64::consts::PI / size as f64;
    (0..size).map(|i| 0.5 - 0.5 * (step * i as f64).cos()).collect()
}

/// 4-term Blackman-Harris window of `size` points.
///
/// Built as two mirrored halves, the rising half sweeping its phase over
/// `[0, pi]`, so the two center samples sit at exactly 1.0.
pub fn blackman_harris_window(size: usize) -> Vec<f64> {
    const A0: f64 = 0.35875;
    const A1: f64 = 0.48829;
    const A2: f64 = 0.14128;
    const A3: f64 = 0.01168;

    let half = size / 2;
    let mut window = vec![1.0; size];
    if half > 1 {
        let step = std::f64::consts::PI / (half - 1) as f64;
        for i in 0..half {
            let x = step * i as f64;
            let value = A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos();
            window[i] = value;
            window[size - i - 1] = value;
        }
    }
    window
}

/// Nearest FFT bin for a frequency, clamped to the real half-spectrum
pub fn frequency_bin(fft_size: usize, frequency: f64, sampling_rate: f64) -> usize {
    let bin = (frequency * fft_size as f64 / sampling_rate).round();
    (bin.max(0.0) as usize).min(fft_size / 2)
}

/// Forward/inverse rustfft plans for one transform size.
///
/// rustfft transforms are unnormalized in both directions; callers fold any
/// required `1/size` factor into their own output scaling.
#[derive(Clone)]
pub struct FftPair<T: FftNum> {
    size: usize,
    forward: Arc<dyn Fft<T>>,
    inverse: Arc<dyn Fft<T>>,
}

impl<T: FftNum> FftPair<T> {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn forward(&self, buffer: &mut [Complex<T>]) {
        self.forward.process(buffer);
    }

    pub fn inverse(&self, buffer: &mut [Complex<T>]) {
        self.inverse.process(buffer);
    }
}

impl<T: FftNum> std::fmt::Debug for FftPair<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPair").field("size", &self.size).finish()
    }
}
