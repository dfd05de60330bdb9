//! Dual-kernel FIR convolution
//!
//! Convolves a mono stream against a real/imaginary kernel pair, emitting
//! the two results interleaved as a 2-channel stream. The frequency shifters
//! use this to generate an analytic (I/Q) signal.

use crate::stream::{Result, SampleStream, StreamError};

const BLOCK_SIZE: usize = 256;

/// Mono-to-I/Q convolution against a pair of FIR kernels
#[derive(Debug)]
pub struct AnalyticConvolutionFilter<S> {
    stream: S,
    /// Kernels stored reversed so the inner loop is a forward dot product
    reversed_real: Vec<f64>,
    reversed_imag: Vec<f64>,
    /// `history_len` carried samples followed by the current input block
    window: Vec<f32>,
    history_len: usize,
}

impl<S: SampleStream> AnalyticConvolutionFilter<S> {
    pub fn new(stream: S, real_kernel: &[f64], imag_kernel: &[f64]) -> Result<Self> {
        if stream.channels() != 1 {
            return Err(StreamError::Composition(format!(
                "convolution filter requires a mono input stream, got {} channels",
                stream.channels()
            )));
        }
        if real_kernel.is_empty() || real_kernel.len() != imag_kernel.len() {
            return Err(StreamError::Composition(
                "convolution kernels must be non-empty and equal in length".into(),
            ));
        }

        let history_len = real_kernel.len() - 1;

        Ok(Self {
            reversed_real: real_kernel.iter().rev().copied().collect(),
            reversed_imag: imag_kernel.iter().rev().copied().collect(),
            window: vec![0.0; history_len + BLOCK_SIZE],
            history_len,
            stream,
        })
    }
}

impl<S: SampleStream> SampleStream for AnalyticConvolutionFilter<S> {
    fn channels(&self) -> usize {
        2
    }

    fn sampling_rate(&self) -> f32 {
        self.stream.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.stream.channel_samples()
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let pairs = data.len() / 2;
        let kernel_len = self.reversed_real.len();
        let mut produced = 0;

        while produced < pairs {
            let want = (pairs - produced).min(BLOCK_SIZE);
            let history = self.history_len;
            let read = self.stream.read(&mut self.window[history..history + want]);
            if read == 0 {
                break;
            }

            for i in 0..read {
                let mut acc_re = 0.0f64;
                let mut acc_im = 0.0f64;
                for k in 0..kernel_len {
                    let x = f64::from(self.window[i + k]);
                    acc_re += self.reversed_real[k] * x;
                    acc_im += self.reversed_imag[k] * x;
                }
                data[2 * (produced + i)] = acc_re as f32;
                data[2 * (produced + i) + 1] = acc_im as f32;
            }

            self.window.copy_within(read..read + history, 0);
            produced += read;
        }

        2 * produced
    }

    fn reset(&mut self) {
        self.window[..self.history_len].fill(0.0);
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.window[..self.history_len].fill(0.0);
        self.stream.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        let rms = self.stream.channel_rms()[0];
        vec![rms, rms]
    }
}
