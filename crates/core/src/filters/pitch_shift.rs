//! Phase-vocoder pitch shifting
//!
//! Short-time Fourier transform analysis/synthesis after Bernsee's
//! smbPitchShift: each frame's bin phases are unwrapped into true partial
//! frequencies, the spectrum is remapped by the pitch factor, and phase is
//! reintegrated on synthesis. Duration is preserved.

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::filters::limiter::soft_clip;
use crate::spectral::{hann_window, FftPair};
use crate::stream::{Result, SampleStream, StreamError};

/// Supported pitch factor range (one octave down to one octave up)
const PITCH_FACTOR_MIN: f64 = 0.5;
const PITCH_FACTOR_MAX: f64 = 2.0;

/// Transform geometry for the pitch shifter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchShiftParams {
    /// STFT frame size; must be a power of two
    pub fft_size: usize,
    /// Oversampling factor; frames overlap by `1 - 1/overlap_ratio`
    pub overlap_ratio: usize,
}

impl Default for PitchShiftParams {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            overlap_ratio: 4,
        }
    }
}

/// Pitch shifter preserving duration
pub struct PitchShiftFilter<S> {
    stream: S,
    pitch_factor: f64,
    fft_size: usize,
    overlap_ratio: usize,
    step_size: usize,
    overlap_size: usize,
    output_index: usize,
    output_sample_count: usize,
    input_buffer: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    window: Vec<f64>,
    processed: Vec<f32>,
    output_accumulator: Vec<f32>,
    phase_last: Vec<f32>,
    phase_sum: Vec<f32>,
    analysis_frequency: Vec<f32>,
    analysis_magnitude: Vec<f32>,
    synthesis_frequency: Vec<f32>,
    synthesis_magnitude: Vec<f32>,
    fft: FftPair<f32>,
}

impl<S: SampleStream> PitchShiftFilter<S> {
    pub fn new(stream: S, pitch_factor: f64, params: PitchShiftParams) -> Result<Self> {
        if stream.channels() != 1 {
            return Err(StreamError::Composition(
                "pitch shifter requires a mono input stream".into(),
            ));
        }
        if !params.fft_size.is_power_of_two() || params.overlap_ratio == 0 {
            return Err(StreamError::Composition(format!(
                "invalid transform geometry: fft size {} / overlap {}",
                params.fft_size, params.overlap_ratio
            )));
        }

        let fft_size = params.fft_size;
        let overlap_ratio = params.overlap_ratio;
        let step_size = fft_size / overlap_ratio;
        let overlap_size = fft_size - step_size;
        let half = fft_size / 2 + 1;

        Ok(Self {
            pitch_factor: clamp_pitch_factor(pitch_factor),
            fft_size,
            overlap_ratio,
            step_size,
            overlap_size,
            output_index: 0,
            output_sample_count: 0,
            input_buffer: vec![0.0; fft_size],
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            window: hann_window(fft_size),
            processed: vec![0.0; step_size],
            output_accumulator: vec![0.0; fft_size],
            phase_last: vec![0.0; half],
            phase_sum: vec![0.0; half],
            analysis_frequency: vec![0.0; half],
            analysis_magnitude: vec![0.0; half],
            synthesis_frequency: vec![0.0; half],
            synthesis_magnitude: vec![0.0; half],
            fft: FftPair::new(fft_size),
            stream,
        })
    }

    /// Pitch factor: 0.5 = octave down, 1.0 = unchanged, 2.0 = octave up
    pub fn pitch_factor(&self) -> f64 {
        self.pitch_factor
    }

    pub fn set_pitch_factor(&mut self, pitch_factor: f64) {
        self.pitch_factor = clamp_pitch_factor(pitch_factor);
    }

    fn read_body(&mut self, data: &mut [f32], offset: usize) -> usize {
        let count = data.len() - offset;
        let samples_written = count.min(self.output_sample_count - self.output_index);

        for i in 0..samples_written {
            data[offset + i] = soft_clip(self.processed[self.output_index + i]);
        }

        self.output_index += samples_written;
        samples_written
    }

    fn pitch_shift_frame(&mut self) {
        use std::f64::consts::PI;

        let half = self.fft_size / 2;
        let freq_per_bin = f64::from(self.stream.sampling_rate()) / self.fft_size as f64;
        let expct = 2.0 * PI * self.step_size as f64 / self.fft_size as f64;

        for k in 0..self.fft_size {
            self.fft_buffer[k] = Complex::new(
                (f64::from(self.input_buffer[k]) * self.window[k]) as f32,
                0.0,
            );
        }

        // analysis: unwrap each bin's phase advance into its true frequency
        self.fft.forward(&mut self.fft_buffer);

        for k in 0..=half {
            let real = f64::from(self.fft_buffer[k].re);
            let imag = f64::from(self.fft_buffer[k].im);

            let magn = 2.0 * (real * real + imag * imag).sqrt();
            let phase = imag.atan2(real);

            let mut temp = phase - f64::from(self.phase_last[k]);
            self.phase_last[k] = phase as f32;

            temp -= k as f64 * expct;

            // map delta phase into the +/- pi interval
            let mut qpd = (temp / PI) as i64;
            if qpd >= 0 {
                qpd += qpd & 1;
            } else {
                qpd -= qpd & 1;
            }
            temp -= PI * qpd as f64;

            temp = self.overlap_ratio as f64 * temp / (2.0 * PI);
            temp = k as f64 * freq_per_bin + temp * freq_per_bin;

            self.analysis_magnitude[k] = magn as f32;
            self.analysis_frequency[k] = temp as f32;
        }

        // remap bins by the pitch factor; colliding magnitudes accumulate
        // while the frequency takes the last writer
        self.synthesis_frequency.fill(0.0);
        self.synthesis_magnitude.fill(0.0);

        for k in 0..=half {
            let index = (k as f64 * self.pitch_factor) as usize;
            if index <= half {
                self.synthesis_magnitude[index] += self.analysis_magnitude[k];
                self.synthesis_frequency[index] =
                    (f64::from(self.analysis_frequency[k]) * self.pitch_factor) as f32;
            }
        }

        // synthesis: reintegrate phase from the remapped true frequencies
        for k in 0..=half {
            let magn = f64::from(self.synthesis_magnitude[k]);
            let mut temp = f64::from(self.synthesis_frequency[k]);

            temp -= k as f64 * freq_per_bin;
            temp /= freq_per_bin;
            temp = 2.0 * PI * temp / self.overlap_ratio as f64;
            temp += k as f64 * expct;

            self.phase_sum[k] += temp as f32;
            let phase = f64::from(self.phase_sum[k]);

            self.fft_buffer[k] = Complex::new(
                (magn * phase.cos()) as f32,
                (magn * phase.sin()) as f32,
            );
        }

        // zero the negative-frequency half
        for bin in self.fft_buffer[half + 1..].iter_mut() {
            *bin = Complex::new(0.0, 0.0);
        }

        self.fft.inverse(&mut self.fft_buffer);

        let scale = 1.0 / (half * self.overlap_ratio) as f64;
        for k in 0..self.fft_size {
            self.output_accumulator[k] +=
                (2.0 * self.window[k] * f64::from(self.fft_buffer[k].re) * scale) as f32;
        }

        self.processed.copy_from_slice(&self.output_accumulator[..self.step_size]);

        self.output_accumulator.copy_within(self.step_size.., 0);
        self.output_accumulator[self.overlap_size..].fill(0.0);
    }

    fn clear_state(&mut self) {
        self.output_index = 0;
        self.output_sample_count = 0;
        self.input_buffer.fill(0.0);
        self.output_accumulator.fill(0.0);
        self.processed.fill(0.0);
        self.phase_last.fill(0.0);
        self.phase_sum.fill(0.0);
    }
}

fn clamp_pitch_factor(pitch_factor: f64) -> f64 {
    if !pitch_factor.is_finite() {
        warn!(requested = pitch_factor, "non-finite pitch factor, using 1.0");
        return 1.0;
    }
    let clamped = pitch_factor.clamp(PITCH_FACTOR_MIN, PITCH_FACTOR_MAX);
    if clamped != pitch_factor {
        warn!(requested = pitch_factor, applied = clamped, "pitch factor clamped");
    }
    clamped
}

impl<S: SampleStream> SampleStream for PitchShiftFilter<S> {
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
        if self.pitch_factor == 1.0 {
            // bit-exact passthrough
            return self.stream.read(data);
        }

        let count = data.len();
        let mut written = self.read_body(data, 0);

        while written < count {
            let overlap_size = self.overlap_size;
            let read = self.stream.read(&mut self.input_buffer[overlap_size..]);

            if read == 0 {
                break;
            }
            if read < self.step_size {
                self.input_buffer[overlap_size + read..].fill(0.0);
            }

            self.output_index = 0;
            self.output_sample_count = read;

            self.pitch_shift_frame();

            self.input_buffer.copy_within(self.step_size.., 0);

            written += self.read_body(data, written);
        }

        written
    }

    fn reset(&mut self) {
        self.clear_state();
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.clear_state();
        self.stream.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        self.stream.channel_rms()
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

    fn zero_crossing_freq(samples: &[f32], rate: f32) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
            .count();
        crossings as f32 * rate / (2.0 * samples.len() as f32)
    }

    #[test]
    fn test_factor_one_is_exact_passthrough() {
        let samples = sine(5000, 440.0, 44100.0);
        let source = SampleBuffer::from_mono(samples.clone(), 44100.0);
        let mut shifter =
            PitchShiftFilter::new(source, 1.0, PitchShiftParams::default()).unwrap();

        let mut out = vec![0.0f32; 5000];
        assert_eq!(shifter.read(&mut out), 5000);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_octave_up_doubles_frequency() {
        let source = SampleBuffer::from_mono(sine(88200, 440.0, 44100.0), 44100.0);
        let mut shifter =
            PitchShiftFilter::new(source, 2.0, PitchShiftParams::default()).unwrap();

        let mut out = vec![0.0f32; 88200];
        let read = shifter.read(&mut out);
        assert!(read >= 88200 - 4096);

        // skip the first frames while the accumulator fills
        let freq = zero_crossing_freq(&out[16384..read - 4096], 44100.0);
        assert!((freq - 880.0).abs() < 880.0 * 0.1, "measured {freq} Hz");
    }

    #[test]
    fn test_half_factor_halves_frequency() {
        let source = SampleBuffer::from_mono(sine(88200, 880.0, 44100.0), 44100.0);
        let mut shifter =
            PitchShiftFilter::new(source, 0.5, PitchShiftParams::default()).unwrap();

        let mut out = vec![0.0f32; 88200];
        let read = shifter.read(&mut out);
        let freq = zero_crossing_freq(&out[16384..read - 4096], 44100.0);
        assert!((freq - 440.0).abs() < 440.0 * 0.1, "measured {freq} Hz");
    }

    #[test]
    fn test_output_is_bounded() {
        let source = SampleBuffer::from_mono(sine(44100, 440.0, 44100.0), 44100.0);
        let mut shifter =
            PitchShiftFilter::new(source, 1.5, PitchShiftParams::default()).unwrap();

        let mut out = vec![0.0f32; 44100];
        let read = shifter.read(&mut out);
        assert!(out[..read].iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_pitch_factor_clamping() {
        let source = SampleBuffer::from_mono(vec![0.0; 100], 44100.0);
        let mut shifter =
            PitchShiftFilter::new(source, 5.0, PitchShiftParams::default()).unwrap();
        assert_eq!(shifter.pitch_factor(), 2.0);

        shifter.set_pitch_factor(0.1);
        assert_eq!(shifter.pitch_factor(), 0.5);
        shifter.set_pitch_factor(f64::NAN);
        assert_eq!(shifter.pitch_factor(), 1.0);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let source = SampleBuffer::from_mono(vec![0.0; 100], 44100.0);
        let params = PitchShiftParams {
            fft_size: 3000,
            overlap_ratio: 4,
        };
        assert!(PitchShiftFilter::new(source, 1.5, params).is_err());
    }

    #[test]
    fn test_reset_reproduces_output() {
        let source = SampleBuffer::from_mono(sine(20000, 440.0, 44100.0), 44100.0);
        let mut shifter =
            PitchShiftFilter::new(source, 1.5, PitchShiftParams::default()).unwrap();

        let mut first = vec![0.0f32; 10000];
        shifter.read(&mut first);
        shifter.reset();
        let mut second = vec![0.0f32; 10000];
        shifter.read(&mut second);
        assert_eq!(first, second);
    }
}
