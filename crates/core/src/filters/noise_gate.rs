//! Hysteresis noise gate
//!
//! Open/close thresholds with a decaying peak tracker, a hold timer, and
//! linear attack/release attenuation ramps.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream};

/// Noise gate parameters. Thresholds in dB, durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseGateParams {
    /// Level that opens the gate, in dB
    pub open_threshold: f64,
    /// Tracked level that closes the gate, in dB (below `open_threshold`)
    pub close_threshold: f64,
    pub attack_duration: f64,
    /// Time the gate stays open after the level falls, in seconds
    pub hold_duration: f64,
    pub release_duration: f64,
}

impl Default for NoiseGateParams {
    fn default() -> Self {
        Self {
            open_threshold: -26.0,
            close_threshold: -32.0,
            attack_duration: 0.025,
            hold_duration: 0.200,
            release_duration: 0.150,
        }
    }
}

impl NoiseGateParams {
    fn clamped(mut self) -> Self {
        if self.close_threshold > self.open_threshold {
            warn!(
                open = self.open_threshold,
                close = self.close_threshold,
                "noise gate close threshold above open threshold, clamping"
            );
            self.close_threshold = self.open_threshold;
        }
        if self.attack_duration < 1e-4 {
            warn!(attack = self.attack_duration, "noise gate attack too short, clamping");
            self.attack_duration = 1e-4;
        }
        if self.release_duration < 1e-4 {
            warn!(release = self.release_duration, "noise gate release too short, clamping");
            self.release_duration = 1e-4;
        }
        self
    }
}

/// Hysteresis noise gate with hold timer
#[derive(Debug)]
pub struct NoiseGateFilter<S> {
    stream: S,
    open_threshold: f64,
    close_threshold: f64,
    attack_rate: f32,
    release_rate: f32,
    decay_rate: f64,
    hold_duration: f64,
    inverse_sample_rate: f64,
    is_open: bool,
    attenuation: f32,
    level: f64,
    held_time: f64,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream> NoiseGateFilter<S> {
    pub fn new(stream: S, params: NoiseGateParams, rms_behavior: RmsBehavior) -> Self {
        let params = params.clamped();
        let rate = f64::from(stream.sampling_rate());

        let open_threshold = 10f64.powf(params.open_threshold / 20.0);
        let close_threshold = 10f64.powf(params.close_threshold / 20.0);

        // the tracked level decays from open to close over 1/75th of a second
        let min_decay_period = rate / 75.0;
        let decay_rate = (open_threshold - close_threshold) / min_decay_period;

        Self {
            open_threshold,
            close_threshold,
            attack_rate: (1.0 / (params.attack_duration * rate)) as f32,
            release_rate: (1.0 / (params.release_duration * rate)) as f32,
            decay_rate,
            hold_duration: params.hold_duration,
            inverse_sample_rate: 1.0 / rate,
            is_open: false,
            attenuation: 0.0,
            level: 0.0,
            held_time: 0.0,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
        }
    }
}

impl<S: SampleStream> SampleStream for NoiseGateFilter<S> {
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
            let level = f64::from(level);

            if level > self.open_threshold && !self.is_open {
                self.is_open = true;
            }
            if self.level < self.close_threshold && self.is_open {
                self.held_time = 0.0;
                self.is_open = false;
            }

            self.level = self.level.max(level) - self.decay_rate;

            if self.is_open {
                self.attenuation = (self.attenuation + self.attack_rate).min(1.0);
            } else {
                self.held_time += self.inverse_sample_rate;
                if self.held_time > self.hold_duration {
                    self.attenuation = (self.attenuation - self.release_rate).max(0.0);
                }
            }

            for sample in frame.iter_mut() {
                *sample *= self.attenuation;
            }
        }

        read
    }

    fn reset(&mut self) {
        self.is_open = false;
        self.attenuation = 0.0;
        self.level = 0.0;
        self.held_time = 0.0;
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.is_open = false;
        self.attenuation = 0.0;
        self.level = 0.0;
        self.held_time = 0.0;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SampleBuffer;

    fn gate(samples: Vec<f32>) -> NoiseGateFilter<SampleBuffer> {
        NoiseGateFilter::new(
            SampleBuffer::from_mono(samples, 44100.0),
            NoiseGateParams::default(),
            RmsBehavior::Passthrough,
        )
    }

    #[test]
    fn test_sub_threshold_signal_stays_gated() {
        // -46 dB, well below the -26 dB open threshold
        let mut filter = gate(vec![0.005; 4000]);
        let mut out = vec![0.0f32; 4000];
        assert_eq!(filter.read(&mut out), 4000);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_loud_signal_opens_gate() {
        // 0.5 ~ -6 dB opens the gate; attack ramps attenuation up to 1
        let mut filter = gate(vec![0.5; 4000]);
        let mut out = vec![0.0f32; 4000];
        assert_eq!(filter.read(&mut out), 4000);

        // attack_rate = 1/(0.025 * 44100): full ramp after ~1103 samples
        assert!(out[0] < 0.5);
        assert!((out[2000] - 0.5).abs() < 1e-6);
        // monotone ramp-up
        assert!(out[10] < out[100]);
    }

    #[test]
    fn test_gate_holds_then_releases() {
        let mut samples = vec![0.5f32; 2000];
        samples.extend(vec![0.0f32; 44100]);
        let mut filter = gate(samples);

        let mut out = vec![0.0f32; 46100];
        assert_eq!(filter.read(&mut out), 46100);

        // silence is attenuated to zero well before the stream ends:
        // decay to close takes 1/75 s, hold 0.2 s, release 0.15 s
        assert_eq!(out[46099], 0.0);
    }

    #[test]
    fn test_reset_closes_gate() {
        let mut filter = gate(vec![0.5; 8000]);
        let mut first = vec![0.0f32; 4000];
        filter.read(&mut first);

        filter.reset();
        let mut second = vec![0.0f32; 4000];
        filter.read(&mut second);
        assert_eq!(first, second);
    }
}
