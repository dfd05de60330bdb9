//! The sample-stream contract and leaf streams
//!
//! Everything in this crate speaks `SampleStream`: a pull-based, seekable
//! source of interleaved f32 samples. Filters wrap an upstream stream and
//! implement the same trait, so arbitrary processing chains compose by
//! construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when composing or driving streams
#[derive(Debug, Error)]
pub enum StreamError {
    /// Streams were combined in an unsatisfiable way (channel counts,
    /// sampling rates, malformed buffers)
    #[error("Stream composition error: {0}")]
    Composition(String),

    /// The stream cannot perform the requested operation
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// A pull-based, seekable source of interleaved f32 audio samples.
///
/// Counts are always in samples, not frames: a stereo stream holding one
/// second at 44.1 kHz reports `channel_samples() == Some(44100)` and
/// `total_samples() == Some(88200)`.
pub trait SampleStream {
    /// Number of interleaved channels (>= 1)
    fn channels(&self) -> usize;

    /// Sampling rate in Hz
    fn sampling_rate(&self) -> f32;

    /// Per-channel length in samples; `None` for unbounded streams
    fn channel_samples(&self) -> Option<usize>;

    /// Total interleaved length; `None` for unbounded streams
    fn total_samples(&self) -> Option<usize> {
        self.channel_samples().map(|n| n * self.channels())
    }

    /// Fill a prefix of `data` with the next samples, returning how many
    /// were written. Returns fewer than `data.len()` only at (or while
    /// draining past) end-of-stream.
    fn read(&mut self, data: &mut [f32]) -> usize;

    /// Rewind to the beginning, as if freshly constructed
    fn reset(&mut self);

    /// Jump to a per-channel sample position, clamped to `[0, channel_samples]`
    fn seek(&mut self, position: usize) -> Result<()>;

    /// Per-channel RMS of the whole stream. Lazily computed and cached;
    /// unbounded streams report NaN per channel.
    fn channel_rms(&mut self) -> Vec<f64>;
}

impl<S: SampleStream + ?Sized> SampleStream for Box<S> {
    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn sampling_rate(&self) -> f32 {
        (**self).sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        (**self).channel_samples()
    }

    fn total_samples(&self) -> Option<usize> {
        (**self).total_samples()
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        (**self).read(data)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        (**self).seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        (**self).channel_rms()
    }
}

/// How a transform filter answers `channel_rms`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RmsBehavior {
    /// Report the upstream RMS unchanged. Falls back to recalculation when
    /// the upstream reports NaN and this stream is bounded.
    #[default]
    Passthrough,
    /// Measure this filter's own output
    Recalculate,
}

/// Cache cell for a lazily computed per-channel RMS
#[derive(Debug, Clone, Default)]
pub struct RmsCache {
    value: Option<Vec<f64>>,
}

impl RmsCache {
    pub fn get(&self) -> Option<&[f64]> {
        self.value.as_deref()
    }

    pub fn set(&mut self, value: Vec<f64>) {
        self.value = Some(value);
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }
}

const RMS_SCAN_BUFFER: usize = 512;

/// Measure the per-channel RMS of a stream by scanning it end to end.
///
/// Rewinds the stream before and after the scan, so any playback position is
/// lost. Unbounded streams yield NaN per channel; empty streams yield 0.
pub fn calculate_rms<S: SampleStream + ?Sized>(stream: &mut S) -> Vec<f64> {
    let channels = stream.channels();

    match stream.channel_samples() {
        None => vec![f64::NAN; channels],
        Some(0) => vec![0.0; channels],
        Some(channel_samples) => {
            let mut sums = vec![0.0f64; channels];
            let mut buffer = [0.0f32; RMS_SCAN_BUFFER];
            let mut index = 0usize;

            stream.reset();
            loop {
                let read = stream.read(&mut buffer);
                if read == 0 {
                    break;
                }
                for &sample in &buffer[..read] {
                    sums[index % channels] += f64::from(sample) * f64::from(sample);
                    index += 1;
                }
            }
            stream.reset();

            sums.into_iter()
                .map(|sum| (sum / channel_samples as f64).sqrt())
                .collect()
        }
    }
}

/// An owned, interleaved buffer of samples exposed as a stream.
///
/// The reference leaf producer: fully seekable, length known up front.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    channels: usize,
    sampling_rate: f32,
    position: usize,
    rms_cache: RmsCache,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, channels: usize, sampling_rate: f32) -> Result<Self> {
        if channels == 0 {
            return Err(StreamError::Composition(
                "sample buffer requires at least one channel".into(),
            ));
        }
        if samples.len() % channels != 0 {
            return Err(StreamError::Composition(format!(
                "interleaved length {} is not a multiple of {channels} channels",
                samples.len()
            )));
        }

        Ok(Self {
            samples,
            channels,
            sampling_rate,
            position: 0,
            rms_cache: RmsCache::default(),
        })
    }

    pub fn from_mono(samples: Vec<f32>, sampling_rate: f32) -> Self {
        Self {
            samples,
            channels: 1,
            sampling_rate,
            position: 0,
            rms_cache: RmsCache::default(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

impl SampleStream for SampleBuffer {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sampling_rate(&self) -> f32 {
        self.sampling_rate
    }

    fn channel_samples(&self) -> Option<usize> {
        Some(self.samples.len() / self.channels)
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let available = self.samples.len() - self.position;
        let count = data.len().min(available);
        data[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        count
    }

    fn reset(&mut self) {
        self.position = 0;
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        let channel_len = self.samples.len() / self.channels;
        self.position = position.min(channel_len) * self.channels;
        Ok(())
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        if let Some(rms) = self.rms_cache.get() {
            return rms.to_vec();
        }

        let channels = self.channels;
        let channel_len = self.samples.len() / channels;
        let rms: Vec<f64> = if channel_len == 0 {
            vec![0.0; channels]
        } else {
            let mut sums = vec![0.0f64; channels];
            for (i, &sample) in self.samples.iter().enumerate() {
                sums[i % channels] += f64::from(sample) * f64::from(sample);
            }
            sums.into_iter()
                .map(|sum| (sum / channel_len as f64).sqrt())
                .collect()
        };

        self.rms_cache.set(rms.clone());
        rms
    }
}
