//! Look-ahead noise gate for interleaved multichannel streams
//!
//! Decides openness from a centered sliding window over all channels, then
//! applies a smoothed scaling factor to samples delayed by half the window
//! plus the smoothing length. The delay makes gate openings anticipate the
//! audio that triggered them.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ring::RingBuffer;
use crate::stream::{calculate_rms, Result, RmsBehavior, RmsCache, SampleStream};

const BUFFER_SIZE_PER_CHANNEL: usize = 512;

/// Multichannel gate parameters. Threshold in dB, durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiChannelNoiseGateParams {
    /// Level above which a sample counts as non-silent, in dB
    pub threshold: f64,
    /// Length of the centered decision window
    pub window_duration: f64,
    /// Non-silence required within the window to open the gate
    pub min_non_silent_duration: f64,
    /// Attack/decay ramp length
    pub attack_duration: f64,
}

impl Default for MultiChannelNoiseGateParams {
    fn default() -> Self {
        Self {
            threshold: -50.0,
            window_duration: 0.1,
            min_non_silent_duration: 0.07,
            attack_duration: 0.05,
        }
    }
}

impl MultiChannelNoiseGateParams {
    fn clamped(mut self) -> Self {
        if self.window_duration < 0.001 {
            warn!(window = self.window_duration, "gate window too short, clamping");
            self.window_duration = 0.001;
        }
        if self.attack_duration < 0.001 {
            warn!(attack = self.attack_duration, "gate attack too short, clamping");
            self.attack_duration = 0.001;
        }
        self
    }
}

/// Sliding window that maintains its maximum absolute value.
///
/// Monotonic deque of candidate indices: amortized O(1) per sample.
#[derive(Debug)]
struct MaxWindow {
    window_size: usize,
    buffer: RingBuffer<f32>,
    indices: RingBuffer<usize>,
    sample_count: usize,
}

impl MaxWindow {
    fn new(window_size: usize) -> Self {
        Self {
            window_size,
            buffer: RingBuffer::with_capacity(window_size),
            indices: RingBuffer::with_capacity(window_size),
            sample_count: 0,
        }
    }

    fn push_sample(&mut self, sample: f32) {
        let sample = sample.abs();

        while let Some(head) = self.indices.head() {
            if self.get_sample(head) <= sample {
                self.indices.pop();
            } else {
                break;
            }
        }
        while let Some(tail) = self.indices.tail() {
            if self.sample_count >= self.window_size
                && tail <= self.sample_count - self.window_size
            {
                self.indices.pop_back();
            } else {
                break;
            }
        }

        self.indices.push(self.sample_count);
        self.sample_count += 1;
        self.buffer.push(sample);
    }

    fn get_sample(&self, index: usize) -> f32 {
        self.buffer[self.sample_count - index - 1]
    }

    /// Maximum absolute value currently in the window.
    /// Only valid after at least one sample has been pushed.
    fn level(&self) -> f32 {
        match self.indices.tail() {
            Some(tail) => self.get_sample(tail),
            None => 0.0,
        }
    }
}

/// Sliding window that knows how much non-silence it contains
#[derive(Debug)]
struct NonSilenceWindow {
    buffer: RingBuffer<bool>,
    max_window: MaxWindow,
    sampling_rate: f64,
    channels: usize,
    level_threshold: f32,
    non_silent_samples: usize,
}

impl NonSilenceWindow {
    fn new(
        non_silent_size: usize,
        max_window_size: usize,
        sampling_rate: f64,
        channels: usize,
        level_threshold: f32,
    ) -> Self {
        Self {
            buffer: RingBuffer::with_capacity(channels * non_silent_size),
            max_window: MaxWindow::new(channels * max_window_size),
            sampling_rate,
            channels,
            level_threshold,
            non_silent_samples: 0,
        }
    }

    fn push_sample(&mut self, sample: f32) {
        self.max_window.push_sample(sample);

        if self.buffer.is_full() && self.buffer.pop_back() == Some(true) {
            self.non_silent_samples -= 1;
        }

        let next_non_silent = self.max_window.level() >= self.level_threshold;
        self.buffer.push(next_non_silent);
        if next_non_silent {
            self.non_silent_samples += 1;
        }
    }

    /// Non-silence inside the window, in seconds
    fn non_silence(&self) -> f64 {
        self.non_silent_samples as f64 / (self.sampling_rate * self.channels as f64)
    }
}

/// Smoothes transitions between the open and closed gate states.
///
/// Closed-to-open transitions are anticipated by the filter's latency, so
/// both edges ramp exponentially over the window length.
#[derive(Debug)]
struct SmoothingWindow {
    /// -80 dB
    floor: f32,
    factor: f32,
    window_size: usize,
    current_coeff: f32,
    gate_rising: bool,
    samples_since_open: usize,
}

impl SmoothingWindow {
    fn new(window_size: usize, channels: usize) -> Self {
        const FLOOR: f32 = 1e-4;
        let span = (window_size * channels) as f64;

        Self {
            floor: FLOOR,
            factor: (-f64::from(FLOOR).ln() / span).exp() as f32,
            window_size: window_size * channels,
            current_coeff: 1.0,
            gate_rising: true,
            samples_since_open: 0,
        }
    }

    fn push_sample(&mut self, open: bool) {
        if open {
            self.samples_since_open = 0;
            self.gate_rising = true;
        } else {
            self.samples_since_open += 1;
            if self.samples_since_open > self.window_size {
                self.gate_rising = false;
            }
        }

        if self.gate_rising {
            self.current_coeff = (self.current_coeff.max(self.floor) * self.factor).min(1.0);
        } else {
            self.current_coeff /= self.factor;
            if self.current_coeff < self.floor {
                self.current_coeff = 0.0;
            }
        }
    }

    fn scaling_factor(&self) -> f64 {
        f64::from(self.current_coeff)
    }
}

/// Look-ahead noise gate over all channels of an interleaved stream
#[derive(Debug)]
pub struct MultiChannelNoiseGateFilter<S> {
    stream: S,
    non_silence_window: NonSilenceWindow,
    smoothing_window: SmoothingWindow,
    sample_ring: RingBuffer<f32>,
    latency_samples: usize,
    min_non_silent_duration: f64,
    sample_buffer: Vec<f32>,
    buffer_index: usize,
    buffer_count: usize,
    samples_remaining: Option<usize>,
    channel_samples: Option<usize>,
    params: MultiChannelNoiseGateParams,
    rms_behavior: RmsBehavior,
    rms_cache: RmsCache,
}

impl<S: SampleStream> MultiChannelNoiseGateFilter<S> {
    pub fn new(stream: S, params: MultiChannelNoiseGateParams, rms_behavior: RmsBehavior) -> Self {
        let params = params.clamped();
        let channels = stream.channels();
        let rate = f64::from(stream.sampling_rate());

        let threshold = 10f64.powf(params.threshold / 20.0);
        let half_window_samples = (params.window_duration * rate * 0.5).floor() as usize;
        let window_samples = 2 * half_window_samples + 1;
        let smoothing_window_size = (params.attack_duration * rate).floor() as usize;
        let latency_samples = half_window_samples + smoothing_window_size;

        let non_silence_window = NonSilenceWindow::new(
            window_samples,
            (rate * 0.005).round() as usize,
            rate,
            channels,
            threshold as f32,
        );
        let smoothing_window = SmoothingWindow::new(smoothing_window_size, channels);

        let channel_samples = stream
            .channel_samples()
            .map(|samples| samples + latency_samples);

        Self {
            non_silence_window,
            smoothing_window,
            sample_ring: RingBuffer::with_capacity(channels * latency_samples),
            latency_samples,
            min_non_silent_duration: params.min_non_silent_duration,
            sample_buffer: vec![0.0; BUFFER_SIZE_PER_CHANNEL * channels],
            buffer_index: 0,
            buffer_count: 0,
            samples_remaining: None,
            channel_samples,
            params,
            rms_behavior,
            rms_cache: RmsCache::default(),
            stream,
        }
    }

    /// Samples of delay this gate adds per channel
    pub fn latency_samples(&self) -> usize {
        self.latency_samples
    }

    fn read_body(&mut self, data: &mut [f32], offset: usize) -> usize {
        let count = data.len() - offset;
        let mut samples_written = count.min(self.buffer_count - self.buffer_index);

        if let Some(remaining) = self.samples_remaining.as_mut() {
            samples_written = samples_written.min(*remaining);
            *remaining -= samples_written;
        }

        for i in 0..samples_written {
            let sample = self.sample_buffer[self.buffer_index + i];

            self.non_silence_window.push_sample(sample);
            self.smoothing_window
                .push_sample(self.non_silence_window.non_silence() >= self.min_non_silent_duration);

            data[offset + i] = if self.sample_ring.is_full() {
                match self.sample_ring.tail() {
                    Some(delayed) => delayed * self.smoothing_window.scaling_factor() as f32,
                    None => 0.0,
                }
            } else {
                0.0
            };

            self.sample_ring.push(sample);
        }

        self.buffer_index += samples_written;
        samples_written
    }

    fn clear_state(&mut self) {
        let channels = self.stream.channels();
        let rate = f64::from(self.stream.sampling_rate());
        let threshold = 10f64.powf(self.params.threshold / 20.0);
        let half_window_samples = (self.params.window_duration * rate * 0.5).floor() as usize;
        let smoothing_window_size = (self.params.attack_duration * rate).floor() as usize;

        self.non_silence_window = NonSilenceWindow::new(
            2 * half_window_samples + 1,
            (rate * 0.005).round() as usize,
            rate,
            channels,
            threshold as f32,
        );
        self.smoothing_window = SmoothingWindow::new(smoothing_window_size, channels);
        self.sample_ring.clear();

        self.buffer_index = 0;
        self.buffer_count = 0;
        self.samples_remaining = None;
        self.sample_buffer.fill(0.0);
    }
}

impl<S: SampleStream> SampleStream for MultiChannelNoiseGateFilter<S> {
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

            let buffer_size = self.sample_buffer.len();
            match self.samples_remaining {
                // tail: the delayed audio in the ring drains against zero input
                Some(_) => self.sample_buffer.fill(0.0),
                None => {
                    let read = self.stream.read(&mut self.sample_buffer);
                    if read < buffer_size {
                        self.sample_buffer[read..].fill(0.0);
                        self.samples_remaining =
                            Some(read + self.stream.channels() * self.latency_samples);
                    }
                }
            }

            self.buffer_index = 0;
            self.buffer_count = buffer_size;

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
            RmsBehavior::Passthrough => self.stream.channel_rms(),
        };

        self.rms_cache.set(rms.clone());
        rms
    }
}
