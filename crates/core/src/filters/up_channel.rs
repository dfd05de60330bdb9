//! Mono-to-multichannel adapters

use serde::{Deserialize, Serialize};

use crate::stream::{Result, RmsCache, SampleStream, StreamError};

const BUFFER_SIZE: usize = 512;

/// Target placement for a mono source within a stereo stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioChannel {
    Left,
    Right,
    Both,
}

/// Upchannels a mono stream to stereo, placing the source in the selected
/// channel(s) and silence in the rest
#[derive(Debug)]
pub struct SelectiveUpChanneler<S> {
    stream: S,
    target: AudioChannel,
    buffer: Box<[f32; BUFFER_SIZE]>,
    /// Tail of a frame split by an odd-sized read, delivered first next time
    pending_frame: [f32; 2],
    pending: usize,
    rms_cache: RmsCache,
}

impl<S: SampleStream> SelectiveUpChanneler<S> {
    pub fn new(stream: S, target: AudioChannel) -> Result<Self> {
        if stream.channels() != 1 {
            return Err(StreamError::Composition(
                "selective upchanneler inner stream must have one channel".into(),
            ));
        }

        Ok(Self {
            stream,
            target,
            buffer: Box::new([0.0; BUFFER_SIZE]),
            pending_frame: [0.0; 2],
            pending: 0,
            rms_cache: RmsCache::default(),
        })
    }
}

impl<S: SampleStream> SampleStream for SelectiveUpChanneler<S> {
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
        let count = data.len();
        let mut offset = 0;

        while self.pending > 0 && offset < count {
            data[offset] = self.pending_frame[2 - self.pending];
            offset += 1;
            self.pending -= 1;
        }

        while offset < count {
            let frames_wanted = (count - offset + 1) / 2;
            let read = self.stream.read(&mut self.buffer[..BUFFER_SIZE.min(frames_wanted)]);
            if read == 0 {
                break;
            }

            for i in 0..read {
                let sample = self.buffer[i];
                let frame = match self.target {
                    AudioChannel::Left => [sample, 0.0],
                    AudioChannel::Right => [0.0, sample],
                    AudioChannel::Both => [sample, sample],
                };

                let take = 2.min(count - offset);
                data[offset..offset + take].copy_from_slice(&frame[..take]);
                offset += take;
                if take < 2 {
                    self.pending_frame = frame;
                    self.pending = 2 - take;
                }
            }
        }

        offset
    }

    fn reset(&mut self) {
        self.pending = 0;
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.pending = 0;
        self.stream.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        if let Some(rms) = self.rms_cache.get() {
            return rms.to_vec();
        }

        let source = self.stream.channel_rms()[0];
        let rms = match self.target {
            AudioChannel::Left => vec![source, 0.0],
            AudioChannel::Right => vec![0.0, source],
            AudioChannel::Both => vec![source, source],
        };
        self.rms_cache.set(rms.clone());
        rms
    }
}

/// Duplicates a mono stream across N identical channels.
///
/// Used by the concatenator to reconcile mono members against multichannel
/// ones.
#[derive(Debug)]
pub struct UpChannelFilter<S> {
    stream: S,
    channels: usize,
    buffer: Box<[f32; BUFFER_SIZE]>,
    /// Duplicates of a frame split by a non-frame-aligned read
    pending_sample: f32,
    pending: usize,
    rms_cache: RmsCache,
}

impl<S: SampleStream> UpChannelFilter<S> {
    pub fn new(stream: S, channels: usize) -> Result<Self> {
        if stream.channels() != 1 {
            return Err(StreamError::Composition(
                "upchannel inner stream must have one channel".into(),
            ));
        }
        if channels < 2 {
            return Err(StreamError::Composition(format!(
                "upchanneling to {channels} channels is meaningless"
            )));
        }

        Ok(Self {
            stream,
            channels,
            buffer: Box::new([0.0; BUFFER_SIZE]),
            pending_sample: 0.0,
            pending: 0,
            rms_cache: RmsCache::default(),
        })
    }
}

impl<S: SampleStream> SampleStream for UpChannelFilter<S> {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sampling_rate(&self) -> f32 {
        self.stream.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.stream.channel_samples()
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let count = data.len();
        let mut offset = 0;

        while self.pending > 0 && offset < count {
            data[offset] = self.pending_sample;
            offset += 1;
            self.pending -= 1;
        }

        while offset < count {
            let frames_wanted = (count - offset + self.channels - 1) / self.channels;
            let read = self.stream.read(&mut self.buffer[..BUFFER_SIZE.min(frames_wanted)]);
            if read == 0 {
                break;
            }

            for i in 0..read {
                let sample = self.buffer[i];
                let take = self.channels.min(count - offset);
                data[offset..offset + take].fill(sample);
                offset += take;
                if take < self.channels {
                    self.pending_sample = sample;
                    self.pending = self.channels - take;
                }
            }
        }

        offset
    }

    fn reset(&mut self) {
        self.pending = 0;
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.pending = 0;
        self.stream.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        if let Some(rms) = self.rms_cache.get() {
            return rms.to_vec();
        }

        let rms = vec![self.stream.channel_rms()[0]; self.channels];
        self.rms_cache.set(rms.clone());
        rms
    }
}
