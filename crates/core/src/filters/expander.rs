//! Downward expander
//!
//! RMS-style running-average envelope; gain reduction grows as the signal
//! falls below the threshold, floored at -60 dB.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream};

/// Expander parameters. Thresholds and gains in dB, durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpanderParams {
    /// Expansion ratio (1:N), at least 1.0
    pub ratio: f64,
    /// Level below which expansion engages, in dB
    pub threshold: f64,
    pub attack_duration: f64,
    pub release_duration: f64,
    /// Makeup gain applied after expansion, in dB
    pub output_gain: f64,
}

impl Default for ExpanderParams {
    fn default() -> Self {
        Self {
            ratio: 2.0,
            threshold: -40.0,
            attack_duration: 0.010,
            release_duration: 0.050,
            output_gain: 0.0,
        }
    }
}

impl ExpanderParams {
    fn clamped(mut self) -> Self {
        if self.ratio < 1.0 {
            warn!(ratio = self.ratio, "expander ratio below 1:1, clamping");
            self.ratio = 1.0;
        }
        if self.attack_duration < 1e-4 {
            warn!(attack = self.attack_duration, "expander attack too short, clamping");
            self.attack_duration = 1e-4;
        }
        if self.release_duration < 1e-4 {
            warn!(release = self.release_duration, "expander release too short, clamping");
            self.release_duration = 1e-4;
        }
        self
    }
}

const GAIN_FLOOR_DB: f32 = -60.0;

/// Downward expander with per-frame linked gain
#[derive(Debug)]
pub struct ExpanderFilter<S> {
    stream: S,
    threshold: f64,
    attack_gain: f32,
    release_gain: f32,
    output_gain: f32,
    slope: f64,
    rms_coef: f32,
    last_gain: f32,
    running_average: f32,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream> ExpanderFilter<S> {
    pub fn new(stream: S, params: ExpanderParams, rms_behavior: RmsBehavior) -> Self {
        let params = params.clamped();
        let rate = f64::from(stream.sampling_rate());

        Self {
            threshold: params.threshold,
            attack_gain: (-1.0 / (rate * params.attack_duration)).exp() as f32,
            release_gain: (-1.0 / (rate * params.release_duration)).exp() as f32,
            output_gain: 10f64.powf(params.output_gain / 20.0) as f32,
            slope: 1.0 - params.ratio,
            rms_coef: 2f64.powf(-100.0 / rate) as f32,
            last_gain: 0.0,
            running_average: 0.0,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
        }
    }
}

impl<S: SampleStream> SampleStream for ExpanderFilter<S> {
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

            self.running_average =
                self.rms_coef * self.running_average + (1.0 - self.rms_coef) * level * level;
            let env = self.running_average.max(0.0).sqrt();
            let env_db = if env == 0.0 {
                f32::NEG_INFINITY
            } else {
                20.0 * env.log10()
            };

            let mut gain = if self.threshold as f32 - env_db > 0.0 {
                ((self.slope * (self.threshold - f64::from(env_db))) as f32).max(GAIN_FLOOR_DB)
            } else {
                0.0
            };

            if gain > self.last_gain {
                gain = self.attack_gain * self.last_gain + (1.0 - self.attack_gain) * gain;
            } else {
                gain = self.release_gain * self.last_gain + (1.0 - self.release_gain) * gain;
            }
            self.last_gain = gain;

            let gain_factor = 10f64.powf(f64::from(gain.min(0.0)) / 20.0) as f32;

            for sample in frame.iter_mut() {
                *sample *= gain_factor * self.output_gain;
            }
        }

        read
    }

    fn reset(&mut self) {
        self.last_gain = 0.0;
        self.running_average = 0.0;
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.last_gain = 0.0;
        self.running_average = 0.0;
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
