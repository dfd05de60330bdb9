//! Feedback echo
//!
//! Circular delay line fed back into itself. After the source is depleted
//! the tail keeps ringing until the repeats would fall below -60 dB, and the
//! declared length is extended to match.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream};

const READ_BUFFER_SIZE: usize = 512;

/// Echo parameters, durations in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EchoParams {
    /// Time between repeats, clamped to [0.01, 2.0]
    pub delay: f64,
    /// Feedback fraction per repeat, clamped to [0.01, 0.5]
    pub residual: f64,
}

impl Default for EchoParams {
    fn default() -> Self {
        Self {
            delay: 0.20,
            residual: 0.30,
        }
    }
}

impl EchoParams {
    fn clamped(mut self) -> Self {
        if !(0.01..=0.5).contains(&self.residual) {
            warn!(residual = self.residual, "echo residual clamped to [0.01, 0.5]");
            self.residual = self.residual.clamp(0.01, 0.5);
        }
        if !(0.01..=2.0).contains(&self.delay) {
            warn!(delay = self.delay, "echo delay clamped to [0.01, 2.0]");
            self.delay = self.delay.clamp(0.01, 2.0);
        }
        self
    }
}

/// Feedback delay echo with a -60 dB tail
#[derive(Debug)]
pub struct EchoFilter<S> {
    stream: S,
    read_buffer: Box<[f32; READ_BUFFER_SIZE]>,
    echo_buffer: Vec<f32>,
    buffer_count: usize,
    buffer_index: usize,
    echo_buffer_index: usize,
    samples_remaining: usize,
    samples_depleted: bool,
    echo_tail: bool,
    residual: f32,
    factor: f32,
    channel_sample_adjustment: usize,
    channel_samples: Option<usize>,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream> EchoFilter<S> {
    pub fn new(stream: S, params: EchoParams, rms_behavior: RmsBehavior) -> Self {
        let params = params.clamped();
        let channels = stream.channels();
        let rate = f64::from(stream.sampling_rate());

        // repeats below -60 dB are inaudible: residual^n = 1e-3
        let cutoff_frames = ((1e-3f64).ln() / params.residual.ln()).ceil() as usize;
        let channel_sample_adjustment =
            (rate * params.delay * cutoff_frames as f64).round() as usize;

        let echo_buffer_size = channels * (rate * params.delay).round() as usize;
        let channel_samples = stream
            .channel_samples()
            .map(|samples| samples + channel_sample_adjustment);

        Self {
            read_buffer: Box::new([0.0; READ_BUFFER_SIZE]),
            echo_buffer: vec![0.0; echo_buffer_size],
            buffer_count: 0,
            buffer_index: 0,
            echo_buffer_index: 0,
            samples_remaining: 0,
            samples_depleted: false,
            echo_tail: false,
            residual: params.residual as f32,
            factor: 1.0 - params.residual as f32,
            channel_sample_adjustment,
            channel_samples,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
        }
    }

    fn read_body(&mut self, data: &mut [f32], mut offset: usize) -> usize {
        let count = data.len() - offset;
        let samples_ready = count.min(self.buffer_count - self.buffer_index);
        let mut samples_written = 0;

        while samples_written < samples_ready {
            let echo_ready =
                (samples_ready - samples_written).min(self.echo_buffer.len() - self.echo_buffer_index);

            for i in 0..echo_ready {
                let value = self.factor * self.read_buffer[self.buffer_index + i]
                    + self.echo_buffer[self.echo_buffer_index + i];
                data[offset + i] = value;
                self.echo_buffer[self.echo_buffer_index + i] = self.residual * value;
            }

            samples_written += echo_ready;
            self.buffer_index += echo_ready;
            self.echo_buffer_index += echo_ready;
            offset += echo_ready;

            if self.echo_buffer_index >= self.echo_buffer.len() {
                self.echo_buffer_index = 0;
            }
        }

        if self.samples_depleted && samples_written < count {
            self.echo_tail = true;
        }

        samples_ready
    }

    fn read_tail(&mut self, data: &mut [f32], mut offset: usize) -> usize {
        let count = data.len() - offset;
        let samples_ready = count.min(self.samples_remaining);
        self.samples_remaining -= samples_ready;

        let mut samples_written = 0;
        while samples_written < samples_ready {
            let echo_ready =
                (samples_ready - samples_written).min(self.echo_buffer.len() - self.echo_buffer_index);

            for i in 0..echo_ready {
                data[offset + i] = self.echo_buffer[self.echo_buffer_index + i];
                self.echo_buffer[self.echo_buffer_index + i] *= self.residual;
            }

            samples_written += echo_ready;
            self.echo_buffer_index += echo_ready;
            offset += echo_ready;

            if self.echo_buffer_index >= self.echo_buffer.len() {
                self.echo_buffer_index = 0;
            }
        }

        samples_ready
    }

    fn clear_state(&mut self) {
        self.echo_buffer_index = 0;
        self.buffer_index = 0;
        self.buffer_count = 0;
        self.samples_remaining = 0;
        self.samples_depleted = false;
        self.echo_tail = false;
        self.read_buffer.fill(0.0);
        self.echo_buffer.fill(0.0);
    }
}

impl<S: SampleStream> SampleStream for EchoFilter<S> {
    fn channels(&self) -> usize {
        self.stream.channels()
    }

    fn sampling_rate(&self) -> f32 {
        self.stream.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.channel_samples
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let count = data.len();
        let mut written = 0;

        if !self.echo_tail {
            written = self.read_body(data, 0);
        }

        while written < count && !self.samples_depleted {
            self.buffer_count = self.stream.read(&mut self.read_buffer[..]);
            self.buffer_index = 0;

            if self.buffer_count < READ_BUFFER_SIZE {
                self.samples_remaining = self.channels() * self.channel_sample_adjustment;
                self.samples_depleted = true;
            }

            written += self.read_body(data, written);
        }

        if self.echo_tail {
            written += self.read_tail(data, written);
        }

        written
    }

    fn reset(&mut self) {
        self.clear_state();
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        let position = match self.channel_samples {
            Some(samples) => position.min(samples),
            None => position,
        };
        self.clear_state();
        self.stream.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        if let Some(rms) = self.rms_cache.get() {
            return rms.to_vec();
        }

        let rms = match self.rms_behavior {
            RmsBehavior::Recalculate => calculate_rms(self),
            RmsBehavior::Passthrough => {
                let upstream = self.stream.channel_rms();
                if upstream.iter().any(|v| v.is_nan()) && self.channel_samples.is_some() {
                    calculate_rms(self)
                } else {
                    upstream
                }
            }
        };

        self.rms_cache.set(rms.clone());
        rms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SampleBuffer;

    #[test]
    fn test_declared_length_accounts_for_tail() {
        // residual 0.3: ceil(ln(1e-3)/ln(0.3)) = 6 repeats of 0.2s
        let source = SampleBuffer::from_mono(vec![0.0; 100], 44100.0);
        let echo = EchoFilter::new(source, EchoParams::default(), RmsBehavior::Passthrough);
        assert_eq!(echo.channel_samples(), Some(100 + 6 * 8820));
    }

    #[test]
    fn test_impulse_response_repeats() {
        let mut samples = vec![0.0f32; 100];
        samples[0] = 1.0;
        let source = SampleBuffer::from_mono(samples, 44100.0);
        let mut echo = EchoFilter::new(source, EchoParams::default(), RmsBehavior::Passthrough);

        let declared = echo.channel_samples().unwrap();
        let mut out = vec![0.0f32; declared];
        let mut total = 0;
        loop {
            let read = echo.read(&mut out[total..]);
            if read == 0 {
                break;
            }
            total += read;
        }
        assert_eq!(total, declared);

        // dry impulse scaled by (1 - residual)
        assert!((out[0] - 0.7).abs() < 1e-6);
        // repeats every 8820 samples, each scaled by a further 0.3
        assert!((out[8820] - 0.21).abs() < 1e-6);
        assert!((out[2 * 8820] - 0.063).abs() < 1e-6);
        // silence between repeats
        assert_eq!(out[4000], 0.0);
    }

    #[test]
    fn test_param_clamping() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let source = SampleBuffer::from_mono(vec![0.0; 10], 44100.0);
        let params = EchoParams {
            delay: 50.0,
            residual: 0.9,
        };
        let echo = EchoFilter::new(source, params, RmsBehavior::Passthrough);

        // clamped to delay 2.0, residual 0.5: 10 cutoff frames of 88200
        assert_eq!(echo.channel_samples(), Some(10 + 10 * 88200));
    }

    #[test]
    fn test_fractional_delay_rounds_whole_tail() {
        // 44100 * 0.0745 = 3285.45 samples per repeat; the tail length
        // rounds once over all six repeats (19712.7 -> 19713), not per repeat
        let source = SampleBuffer::from_mono(vec![0.0; 100], 44100.0);
        let params = EchoParams {
            delay: 0.0745,
            residual: 0.30,
        };
        let echo = EchoFilter::new(source, params, RmsBehavior::Passthrough);
        assert_eq!(echo.channel_samples(), Some(100 + 19713));
    }

    #[test]
    fn test_seek_to_zero_matches_reset() {
        let samples: Vec<f32> = (0..2000).map(|i| ((i % 100) as f32 - 50.0) / 50.0).collect();
        let source = SampleBuffer::from_mono(samples, 44100.0);
        let mut echo = EchoFilter::new(source, EchoParams::default(), RmsBehavior::Passthrough);

        let mut first = vec![0.0f32; 1500];
        echo.read(&mut first);

        echo.seek(0).unwrap();
        let mut second = vec![0.0f32; 1500];
        echo.read(&mut second);
        assert_eq!(first, second);
    }
}
