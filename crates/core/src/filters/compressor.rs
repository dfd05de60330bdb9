//! Downward compressor
//!
//! Peak-following envelope across the channel group, log-domain gain
//! computation, linked gain applied to every channel of a frame.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream};

/// Compressor parameters. Thresholds and gains in dB, durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorParams {
    /// Compression ratio (N:1), at least 1.0
    pub ratio: f64,
    /// Level above which compression engages, in dB
    pub threshold: f64,
    pub attack_duration: f64,
    pub release_duration: f64,
    /// Makeup gain applied after compression, in dB
    pub output_gain: f64,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            ratio: 4.0,
            threshold: -20.0,
            attack_duration: 0.006,
            release_duration: 0.060,
            output_gain: 0.0,
        }
    }
}

impl CompressorParams {
    fn clamped(mut self) -> Self {
        if self.ratio < 1.0 {
            warn!(ratio = self.ratio, "compressor ratio below 1:1, clamping");
            self.ratio = 1.0;
        }
        if self.attack_duration < 1e-4 {
            warn!(attack = self.attack_duration, "compressor attack too short, clamping");
            self.attack_duration = 1e-4;
        }
        if self.release_duration < 1e-4 {
            warn!(release = self.release_duration, "compressor release too short, clamping");
            self.release_duration = 1e-4;
        }
        self
    }
}

/// Downward compressor with per-frame linked gain
#[derive(Debug)]
pub struct CompressorFilter<S> {
    stream: S,
    threshold: f64,
    attack_gain: f32,
    release_gain: f32,
    output_gain: f32,
    slope: f64,
    envelope: f32,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream> CompressorFilter<S> {
    pub fn new(stream: S, params: CompressorParams, rms_behavior: RmsBehavior) -> Self {
        let params = params.clamped();
        let rate = f64::from(stream.sampling_rate());

        Self {
            threshold: params.threshold,
            attack_gain: (-1.0 / (rate * params.attack_duration)).exp() as f32,
            release_gain: (-1.0 / (rate * params.release_duration)).exp() as f32,
            output_gain: 10f64.powf(params.output_gain / 20.0) as f32,
            slope: 1.0 - 1.0 / params.ratio,
            envelope: 0.0,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
        }
    }
}

impl<S: SampleStream> SampleStream for CompressorFilter<S> {
    fn channels(&self) -> usize {
        self.stream.channels()
    }

    fn sampling_rate(&self) -> f32 {
        self.stream.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.stream.channel_samples()
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let read = self.stream.read(data);
        let channels = self.stream.channels();

        for frame in data[..read].chunks_mut(channels) {
            let mut level = 0f32;
            for &sample in frame.iter() {
                level = level.max(sample.abs());
            }

            // one-pole peak follower
            if self.envelope < level {
                self.envelope = level + self.attack_gain * (self.envelope - level);
            } else {
                self.envelope = level + self.release_gain * (self.envelope - level);
            }

            let gain = self.slope * (self.threshold - 20.0 * f64::from(self.envelope).log10());
            let gain_factor = 10f64.powf(gain.min(0.0) / 20.0) as f32;

            for sample in frame.iter_mut() {
                *sample *= gain_factor * self.output_gain;
            }
        }

        read
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.envelope = 0.0;
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
                if upstream.iter().any(|v| v.is_nan()) && self.channel_samples().is_some() {
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
