//! Chorus effect
//!
//! Mixes the dry signal with two delay taps whose delays sweep along an LFO
//! table, the second tap offset half a cycle from the first. Lookback across
//! block boundaries is served from a two-buffer swap arena.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream};

const MIN_BUFFER_SIZE: usize = 512;
const AMPLITUDE: f32 = 0.5;

/// Delay modulation waveform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
}

/// Chorus parameters. Delays and the LFO period in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChorusParams {
    pub min_delay: f64,
    pub max_delay: f64,
    /// LFO frequency in Hz
    pub rate: f64,
    pub shape: LfoShape,
}

impl Default for ChorusParams {
    fn default() -> Self {
        Self {
            min_delay: 0.040,
            max_delay: 0.060,
            rate: 0.25,
            shape: LfoShape::Sine,
        }
    }
}

impl ChorusParams {
    fn clamped(mut self) -> Self {
        if !(0.0..=0.5).contains(&self.min_delay) {
            warn!(min_delay = self.min_delay, "chorus min delay clamped to [0, 0.5]");
            self.min_delay = self.min_delay.clamp(0.0, 0.5);
        }
        if !(self.min_delay..=0.5).contains(&self.max_delay) {
            warn!(max_delay = self.max_delay, "chorus max delay clamped to [min_delay, 0.5]");
            self.max_delay = self.max_delay.clamp(self.min_delay, 0.5);
        }
        if !(0.01..=100.0).contains(&self.rate) {
            warn!(rate = self.rate, "chorus rate clamped to [0.01, 100]");
            self.rate = self.rate.clamp(0.01, 100.0);
        }
        self
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Chorus effect over an LFO-swept pair of delay taps
#[derive(Debug)]
pub struct ChorusFilter<S> {
    stream: S,
    new_buffer: Vec<f32>,
    old_buffer: Vec<f32>,
    adjustments: Vec<usize>,
    adj_index_a: usize,
    adj_index_b: usize,
    buffer_size: usize,
    buffer_count: usize,
    buffer_index: usize,
    samples_remaining: Option<usize>,
    channel_sample_adjustment: usize,
    channel_samples: Option<usize>,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream> ChorusFilter<S> {
    pub fn new(stream: S, params: ChorusParams, rms_behavior: RmsBehavior) -> Self {
        let params = params.clamped();
        let channels = stream.channels();
        let rate = f64::from(stream.sampling_rate());

        let adjustment_samples = ((rate / params.rate).round() as usize).max(1);
        let center_delay = 0.5 * (params.max_delay + params.min_delay);
        let delay_amplitude = 0.5 * (params.max_delay - params.min_delay);

        let mut adjustments = vec![0usize; channels * adjustment_samples];
        for samp in 0..adjustment_samples {
            let lfo = match params.shape {
                LfoShape::Sine => {
                    (2.0 * std::f64::consts::PI * samp as f64 / adjustment_samples as f64).sin()
                }
                LfoShape::Triangle => {
                    let peak = adjustment_samples / 4;
                    let valley = 3 * peak;
                    if samp < peak {
                        lerp(0.0, 1.0, samp as f64 / peak as f64)
                    } else if samp < valley {
                        lerp(1.0, -1.0, (samp - peak) as f64 / (valley - peak) as f64)
                    } else {
                        lerp(-1.0, 0.0, (samp - valley) as f64 / (adjustment_samples - valley) as f64)
                    }
                }
            };

            let delay = (rate * (center_delay + delay_amplitude * lfo)).round().max(0.0) as usize;
            for chan in 0..channels {
                adjustments[samp * channels + chan] = delay;
            }
        }

        let max_adjustment = adjustments.iter().copied().max().unwrap_or(0);
        let buffer_size = MIN_BUFFER_SIZE.max(channels * max_adjustment.next_power_of_two());

        let channel_sample_adjustment = (params.max_delay * rate).ceil() as usize;
        let channel_samples = stream
            .channel_samples()
            .map(|samples| samples + channel_sample_adjustment);

        let adj_index_b = adjustments.len() / 2;

        Self {
            new_buffer: vec![0.0; buffer_size],
            old_buffer: vec![0.0; buffer_size],
            adjustments,
            adj_index_a: 0,
            adj_index_b,
            buffer_size,
            buffer_count: 0,
            buffer_index: 0,
            samples_remaining: None,
            channel_sample_adjustment,
            channel_samples,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
        }
    }

    fn read_body(&mut self, data: &mut [f32], offset: usize) -> usize {
        let count = data.len() - offset;
        let mut samples_written = count.min(self.buffer_count - self.buffer_index);

        if let Some(remaining) = self.samples_remaining.as_mut() {
            samples_written = samples_written.min(*remaining);
            *remaining -= samples_written;
        }

        for i in 0..samples_written {
            let base = self.buffer_index + i;
            let mut value = AMPLITUDE * self.new_buffer[base];

            let delay_a = self.adjustments[self.adj_index_a];
            let delay_b = self.adjustments[self.adj_index_b];

            // negative lookback wraps into the previous block's buffer
            value += AMPLITUDE
                * if base >= delay_a {
                    self.new_buffer[base - delay_a]
                } else {
                    self.old_buffer[self.buffer_size - (delay_a - base)]
                };
            value += AMPLITUDE
                * if base >= delay_b {
                    self.new_buffer[base - delay_b]
                } else {
                    self.old_buffer[self.buffer_size - (delay_b - base)]
                };

            data[offset + i] = value;

            self.adj_index_a += 1;
            if self.adj_index_a >= self.adjustments.len() {
                self.adj_index_a = 0;
            }
            self.adj_index_b += 1;
            if self.adj_index_b >= self.adjustments.len() {
                self.adj_index_b = 0;
            }
        }

        self.buffer_index += samples_written;
        samples_written
    }

    fn clear_state(&mut self) {
        self.adj_index_a = 0;
        self.adj_index_b = self.adjustments.len() / 2;
        self.buffer_index = 0;
        self.buffer_count = 0;
        self.samples_remaining = None;
        self.old_buffer.fill(0.0);
        self.new_buffer.fill(0.0);
    }
}

impl<S: SampleStream> SampleStream for ChorusFilter<S> {
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
        let mut written = self.read_body(data, 0);

        while written < count {
            if self.samples_remaining == Some(0) {
                break;
            }

            std::mem::swap(&mut self.new_buffer, &mut self.old_buffer);

            match self.samples_remaining {
                // tail: lookback drains against zeroed input blocks
                Some(_) => self.new_buffer.fill(0.0),
                None => {
                    let read = self.stream.read(&mut self.new_buffer);
                    if read < self.buffer_size {
                        self.new_buffer[read..].fill(0.0);
                        self.samples_remaining =
                            Some(read + self.channels() * self.channel_sample_adjustment);
                    }
                }
            }

            self.buffer_index = 0;
            self.buffer_count = self.buffer_size;

            written += self.read_body(data, written);
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
