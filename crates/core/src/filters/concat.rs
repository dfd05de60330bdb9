//! End-to-end stream concatenation

use crate::filters::up_channel::UpChannelFilter;
use crate::stream::{calculate_rms, Result, RmsCache, SampleStream, StreamError};

const DEFAULT_SAMPLING_RATE: f32 = 44100.0;

/// Appends multiple streams end to end.
///
/// Members must agree on sampling rate. Mixed channel counts are rectified
/// when every member is either mono or the maximum count: mono members get
/// wrapped in an up-channeler. Advancing to the next member resets it, so a
/// concatenator can hold several copies of the same clip.
pub struct StreamConcatenator {
    streams: Vec<Box<dyn SampleStream>>,
    channels: usize,
    sampling_rate: f32,
    channel_samples: Option<usize>,
    current_index: usize,
    position: usize,
    rms_cache: RmsCache,
}

impl StreamConcatenator {
    pub fn new(streams: Vec<Box<dyn SampleStream>>) -> Result<Self> {
        let mut concatenator = Self {
            streams: Vec::new(),
            channels: 1,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            channel_samples: Some(0),
            current_index: 0,
            position: 0,
            rms_cache: RmsCache::default(),
        };

        if streams.is_empty() {
            return Ok(concatenator);
        }

        let channels: Vec<usize> = streams.iter().map(|s| s.channels()).collect();
        let max_channels = *channels.iter().max().unwrap_or(&1);
        let min_channels = *channels.iter().min().unwrap_or(&1);

        if max_channels == min_channels {
            concatenator.streams = streams;
        } else if min_channels == 1
            && channels.iter().all(|&c| c == max_channels || c == 1)
        {
            for stream in streams {
                concatenator.streams.push(ensure_channel_count(stream, max_channels)?);
            }
        } else {
            return Err(StreamError::Composition(format!(
                "no clear path to rectify concatenated streams of channel counts: {channels:?}"
            )));
        }

        concatenator.update_stats()?;
        Ok(concatenator)
    }

    pub fn push(&mut self, stream: Box<dyn SampleStream>) -> Result<()> {
        self.streams.push(stream);
        self.update_stats()
    }

    /// Per-channel playback position across the whole concatenation
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current_stream_index(&self) -> usize {
        self.current_index
    }

    fn update_stats(&mut self) -> Result<()> {
        self.rms_cache.invalidate();

        if self.streams.is_empty() {
            self.channels = 1;
            self.sampling_rate = DEFAULT_SAMPLING_RATE;
            self.channel_samples = Some(0);
            return Ok(());
        }

        let channels: Vec<usize> = self.streams.iter().map(|s| s.channels()).collect();
        self.channels = *channels.iter().max().unwrap_or(&1);
        if channels.iter().any(|&c| c != self.channels) {
            return Err(StreamError::Composition(
                "concatenated streams must share one channel count".into(),
            ));
        }

        let rates: Vec<f32> = self.streams.iter().map(|s| s.sampling_rate()).collect();
        self.sampling_rate = rates.iter().cloned().fold(f32::MIN, f32::max);
        if rates.iter().any(|&r| r != self.sampling_rate) {
            return Err(StreamError::Composition(
                "concatenated streams must share one sampling rate".into(),
            ));
        }

        self.channel_samples = self
            .streams
            .iter()
            .map(|s| s.channel_samples())
            .try_fold(0usize, |acc, len| len.map(|len| acc + len));

        Ok(())
    }
}

fn ensure_channel_count(
    stream: Box<dyn SampleStream>,
    channels: usize,
) -> Result<Box<dyn SampleStream>> {
    if stream.channels() == channels {
        return Ok(stream);
    }
    Ok(Box::new(UpChannelFilter::new(stream, channels)?))
}

impl SampleStream for StreamConcatenator {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sampling_rate(&self) -> f32 {
        self.sampling_rate
    }

    fn channel_samples(&self) -> Option<usize> {
        self.channel_samples
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        let count = data.len();
        let mut remaining = count;
        let mut offset = 0;

        while remaining > 0 {
            let Some(stream) = self.streams.get_mut(self.current_index) else {
                break;
            };

            let read = stream.read(&mut data[offset..offset + remaining]);
            remaining -= read;
            offset += read;
            self.position += read / self.channels;

            if read == 0 {
                self.current_index += 1;
                if let Some(next) = self.streams.get_mut(self.current_index) {
                    next.reset();
                }
            }
        }

        count - remaining
    }

    fn reset(&mut self) {
        self.current_index = 0;
        self.position = 0;
        for stream in &mut self.streams {
            stream.reset();
        }
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        let position = match self.channel_samples {
            Some(samples) => position.min(samples),
            None => position,
        };
        self.position = position;
        self.current_index = self.streams.len();

        let mut remaining = position;
        for i in 0..self.streams.len() {
            let stream = &mut self.streams[i];
            if remaining > 0 {
                match stream.channel_samples() {
                    Some(len) if remaining > len => {
                        // fully skipped: rewind so a later seek backwards
                        // starts it clean
                        stream.reset();
                        remaining -= len;
                    }
                    _ => {
                        stream.seek(remaining)?;
                        remaining = 0;
                        self.current_index = i;
                    }
                }
            } else {
                stream.reset();
            }
        }

        Ok(())
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        if let Some(rms) = self.rms_cache.get() {
            return rms.to_vec();
        }

        let rms = calculate_rms(self);
        self.rms_cache.set(rms.clone());
        rms
    }
}
