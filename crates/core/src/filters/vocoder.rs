//! Channel vocoder
//!
//! Imposes the spectral envelope of a modulator stream onto a carrier
//! stream. Each STFT frame is split into exponentially spaced bands; per
//! band, the carrier is masked to the band and scaled by the modulator's
//! band envelope, and the results accumulate across overlapping frames.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::spectral::{blackman_harris_window, frequency_bin, FftPair};
use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream, StreamError};

type Complex64 = Complex<f64>;

/// Vocoder band layout and transform geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VocoderParams {
    /// Lowest band edge in Hz
    pub freq_lower_bound: f64,
    /// Highest band edge in Hz
    pub freq_upper_bound: f64,
    pub band_count: usize,
    pub fft_size: usize,
    pub overlap_ratio: usize,
}

impl Default for VocoderParams {
    fn default() -> Self {
        Self {
            freq_lower_bound: 50.0,
            freq_upper_bound: 16000.0,
            band_count: 22,
            fft_size: 4096,
            overlap_ratio: 4,
        }
    }
}

/// Exponentially spaced band edges: `band_count + 1` frequencies.
/// A degenerate bound ratio collapses to equal edges rather than NaN.
fn exponential_band_edges(lower: f64, upper: f64, band_count: usize) -> Vec<f64> {
    let mut ratio = (upper / lower).powf(1.0 / band_count as f64);
    if ratio.is_nan() || ratio.is_infinite() {
        ratio = 1.0;
    }

    let mut freq = lower;
    (0..=band_count)
        .map(|_| {
            let edge = freq;
            freq *= ratio;
            edge
        })
        .collect()
}

/// Channel vocoder over a modulator and a carrier stream
pub struct VocoderFilter<S, C> {
    stream: S,
    carrier: C,
    band_frequencies: Vec<f64>,
    window: Vec<f64>,
    input_buffer: Vec<f32>,
    carrier_buffer: Vec<f32>,
    signal_fft: Vec<Complex64>,
    carrier_fft: Vec<Complex64>,
    amplitude_buffer: Vec<Complex64>,
    carrier_band_buffer: Vec<Complex64>,
    output_accumulation: Vec<f64>,
    cached: Vec<f32>,
    fft: FftPair<f64>,
    fft_size: usize,
    overlap_ratio: usize,
    step_size: usize,
    overlap_size: usize,
    output_factor: f64,
    buffer_index: usize,
    buffer_count: usize,
    frame_lag: usize,
    samples_handled: usize,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream, C: SampleStream> VocoderFilter<S, C> {
    pub fn new(
        stream: S,
        carrier: C,
        params: VocoderParams,
        rms_behavior: RmsBehavior,
    ) -> Result<Self> {
        if stream.channels() != 1 {
            return Err(StreamError::Composition(format!(
                "vocoder requires a mono modulator stream, got {} channels",
                stream.channels()
            )));
        }
        if carrier.channels() != 1 {
            return Err(StreamError::Composition(format!(
                "vocoder requires a mono carrier stream, got {} channels",
                carrier.channels()
            )));
        }
        if stream.sampling_rate() != carrier.sampling_rate() {
            return Err(StreamError::Composition(format!(
                "vocoder streams must share a sampling rate: {} vs {}",
                stream.sampling_rate(),
                carrier.sampling_rate()
            )));
        }
        if !params.fft_size.is_power_of_two() || params.overlap_ratio == 0 || params.band_count == 0
        {
            return Err(StreamError::Composition(format!(
                "invalid vocoder geometry: fft size {} / overlap {} / bands {}",
                params.fft_size, params.overlap_ratio, params.band_count
            )));
        }

        let fft_size = params.fft_size;
        let overlap_ratio = params.overlap_ratio;
        let step_size = fft_size / overlap_ratio;
        let overlap_size = fft_size - step_size;

        // the inverse transform is unnormalized, so the 1/fft_size fold
        // lives in the output factor
        let output_factor = 0.5 * (fft_size as f64).sqrt() / overlap_ratio as f64 / fft_size as f64;

        Ok(Self {
            band_frequencies: exponential_band_edges(
                params.freq_lower_bound,
                params.freq_upper_bound,
                params.band_count,
            ),
            window: blackman_harris_window(fft_size),
            input_buffer: vec![0.0; fft_size],
            carrier_buffer: vec![0.0; fft_size],
            signal_fft: vec![Complex64::new(0.0, 0.0); fft_size],
            carrier_fft: vec![Complex64::new(0.0, 0.0); fft_size],
            amplitude_buffer: vec![Complex64::new(0.0, 0.0); fft_size],
            carrier_band_buffer: vec![Complex64::new(0.0, 0.0); fft_size],
            output_accumulation: vec![0.0; fft_size],
            cached: vec![0.0; step_size],
            fft: FftPair::new(fft_size),
            fft_size,
            overlap_ratio,
            step_size,
            overlap_size,
            output_factor,
            buffer_index: 0,
            buffer_count: 0,
            frame_lag: overlap_ratio,
            samples_handled: 0,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
            carrier,
        })
    }

    fn read_body(&mut self, data: &mut [f32], offset: usize) -> usize {
        let count = data.len() - offset;
        let samples_written = count.min(self.buffer_count - self.buffer_index);

        data[offset..offset + samples_written]
            .copy_from_slice(&self.cached[self.buffer_index..self.buffer_index + samples_written]);

        self.buffer_index += samples_written;
        samples_written
    }

    fn process_frame(&mut self) {
        let fft_size = self.fft_size;
        let sampling_rate = f64::from(self.stream.sampling_rate());

        for i in 0..fft_size {
            self.signal_fft[i] =
                Complex64::new(f64::from(self.input_buffer[i]) * self.window[i], 0.0);
            self.carrier_fft[i] = Complex64::new(f64::from(self.carrier_buffer[i]), 0.0);
        }

        self.fft.forward(&mut self.signal_fft);
        self.fft.forward(&mut self.carrier_fft);

        for band in 0..self.band_frequencies.len() - 1 {
            let lower = frequency_bin(fft_size, self.band_frequencies[band], sampling_rate);
            let upper = frequency_bin(fft_size, self.band_frequencies[band + 1], sampling_rate);

            // mask to the band, doubled to fold the negative half's energy
            for i in 0..fft_size {
                if i >= lower && i < upper {
                    self.amplitude_buffer[i] = self.signal_fft[i] * 2.0;
                    self.carrier_band_buffer[i] = self.carrier_fft[i] * 2.0;
                } else {
                    self.amplitude_buffer[i] = Complex64::new(0.0, 0.0);
                    self.carrier_band_buffer[i] = Complex64::new(0.0, 0.0);
                }
            }

            self.fft.inverse(&mut self.amplitude_buffer);
            self.fft.inverse(&mut self.carrier_band_buffer);

            for i in 0..fft_size {
                self.output_accumulation[i] += self.output_factor
                    * self.window[i]
                    * self.carrier_band_buffer[i].re
                    * self.amplitude_buffer[i].norm();
            }
        }
    }

    fn clear_buffers(&mut self) {
        self.buffer_index = 0;
        self.buffer_count = 0;
        self.samples_handled = 0;
        self.frame_lag = self.overlap_ratio;
        self.cached.fill(0.0);
        self.output_accumulation.fill(0.0);
        self.input_buffer.fill(0.0);
        self.carrier_buffer.fill(0.0);
    }
}

impl<S: SampleStream, C: SampleStream> SampleStream for VocoderFilter<S, C> {
    fn channels(&self) -> usize {
        1
    }

    fn sampling_rate(&self) -> f32 {
        self.stream.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.stream.channel_samples()
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let count = data.len();
        let mut written = self.read_body(data, 0);

        while written < count {
            let overlap_size = self.overlap_size;
            let read_stream = self.stream.read(&mut self.input_buffer[overlap_size..]);
            let read_carrier = self.carrier.read(&mut self.carrier_buffer[overlap_size..]);

            if read_stream == 0 && self.samples_handled == 0 {
                break;
            }
            if read_stream < self.step_size {
                self.input_buffer[overlap_size + read_stream..].fill(0.0);
            }
            if read_carrier < self.step_size {
                self.carrier_buffer[overlap_size + read_carrier..].fill(0.0);
            }

            self.process_frame();

            self.samples_handled += read_stream.min(read_carrier);

            // the first `overlap_ratio` frames only prime the accumulator
            if self.frame_lag > 0 {
                self.frame_lag -= 1;
            }
            if self.frame_lag == 0 {
                self.buffer_index = 0;
                self.buffer_count = self.step_size.min(self.samples_handled);
                self.samples_handled -= self.buffer_count;

                for sample in 0..self.buffer_count {
                    self.cached[sample] = self.output_accumulation[sample] as f32;
                }
            }

            self.input_buffer.copy_within(self.step_size.., 0);
            self.carrier_buffer.copy_within(self.step_size.., 0);
            self.output_accumulation.copy_within(self.step_size.., 0);
            self.output_accumulation[self.overlap_size..].fill(0.0);

            written += self.read_body(data, written);
        }

        written
    }

    fn reset(&mut self) {
        self.clear_buffers();
        self.stream.reset();
        self.carrier.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.clear_buffers();
        self.stream.seek(position)?;
        self.carrier.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        if let Some(rms) = self.rms_cache.get() {
            return rms.to_vec();
        }

        let rms = match self.rms_behavior {
            RmsBehavior::Recalculate => calculate_rms(self),
            RmsBehavior::Passthrough => self.stream.channel_rms(),
        };

        self.rms_cache.set(rms.clone());
        rms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SampleBuffer;

    fn sine(len: usize, freq: f32, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect()
    }

    fn drain<T: SampleStream>(stream: &mut T) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buffer = [0.0f32; 1024];
        loop {
            let read = stream.read(&mut buffer);
            if read == 0 {
                break;
            }
            out.extend_from_slice(&buffer[..read]);
        }
        out
    }

    #[test]
    fn test_band_edges_are_exponential() {
        let edges = exponential_band_edges(50.0, 16000.0, 22);
        assert_eq!(edges.len(), 23);
        assert!((edges[0] - 50.0).abs() < 1e-9);
        assert!((edges[22] - 16000.0).abs() < 1e-6);

        // constant ratio between adjacent edges
        let ratio = edges[1] / edges[0];
        for pair in edges.windows(2) {
            assert!((pair[1] / pair[0] - ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn test_degenerate_bounds_do_not_poison_edges() {
        let edges = exponential_band_edges(0.0, 16000.0, 4);
        assert!(edges.iter().all(|f| f.is_finite() || *f == 0.0));
    }

    #[test]
    fn test_rejects_mismatched_rates() {
        let modulator = SampleBuffer::from_mono(vec![0.0; 100], 44100.0);
        let carrier = SampleBuffer::from_mono(vec![0.0; 100], 48000.0);
        assert!(VocoderFilter::new(
            modulator,
            carrier,
            VocoderParams::default(),
            RmsBehavior::Passthrough
        )
        .is_err());
    }

    #[test]
    fn test_output_length_tracks_modulator() {
        let modulator = SampleBuffer::from_mono(sine(9000, 440.0, 44100.0), 44100.0);
        let carrier = SampleBuffer::from_mono(sine(20000, 2000.0, 44100.0), 44100.0);
        let mut vocoder = VocoderFilter::new(
            modulator,
            carrier,
            VocoderParams::default(),
            RmsBehavior::Passthrough,
        )
        .unwrap();

        assert_eq!(vocoder.channel_samples(), Some(9000));
        assert_eq!(drain(&mut vocoder).len(), 9000);
    }

    #[test]
    fn test_silent_modulator_silences_carrier() {
        let modulator = SampleBuffer::from_mono(vec![0.0; 10000], 44100.0);
        let carrier = SampleBuffer::from_mono(sine(10000, 2000.0, 44100.0), 44100.0);
        let mut vocoder = VocoderFilter::new(
            modulator,
            carrier,
            VocoderParams::default(),
            RmsBehavior::Passthrough,
        )
        .unwrap();

        let out = drain(&mut vocoder);
        assert!(out.iter().all(|&s| s.abs() < 1e-9));
    }

    #[test]
    fn test_voiced_modulator_passes_carrier_energy() {
        let modulator = SampleBuffer::from_mono(sine(30000, 300.0, 44100.0), 44100.0);
        let carrier = SampleBuffer::from_mono(sine(30000, 2000.0, 44100.0), 44100.0);
        let mut vocoder = VocoderFilter::new(
            modulator,
            carrier,
            VocoderParams::default(),
            RmsBehavior::Passthrough,
        )
        .unwrap();

        let out = drain(&mut vocoder);
        let energy: f64 = out[8192..]
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        assert!(energy > 1e-3, "vocoded energy {energy}");
    }

    #[test]
    fn test_reset_reproduces_output() {
        let modulator = SampleBuffer::from_mono(sine(12000, 300.0, 44100.0), 44100.0);
        let carrier = SampleBuffer::from_mono(sine(12000, 1500.0, 44100.0), 44100.0);
        let mut vocoder = VocoderFilter::new(
            modulator,
            carrier,
            VocoderParams::default(),
            RmsBehavior::Passthrough,
        )
        .unwrap();

        let first = drain(&mut vocoder);
        vocoder.reset();
        let second = drain(&mut vocoder);
        assert_eq!(first, second);
    }
}
