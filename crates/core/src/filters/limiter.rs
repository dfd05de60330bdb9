//! Arctangent soft limiter

use crate::stream::{Result, SampleStream};

const LIM_THRESH: f32 = 0.95;
const LIM_RANGE: f64 = (1.0 - LIM_THRESH) as f64;
const INV_LIM_RANGE: f64 = 1.0 / LIM_RANGE;
const TWO_LIM_RANGE_OVER_PI: f64 = 2.0 * LIM_RANGE / std::f64::consts::PI;

/// Saturate a sample above ±0.95 with an arctangent curve.
///
/// Linear inside the threshold; output asymptotically approaches ±1.0.
pub fn soft_clip(sample: f32) -> f32 {
    if sample > LIM_THRESH {
        (((f64::from(sample) - f64::from(LIM_THRESH)) * INV_LIM_RANGE).atan()
            * TWO_LIM_RANGE_OVER_PI
            + f64::from(LIM_THRESH)) as f32
    } else if sample < -LIM_THRESH {
        -(((-f64::from(sample) - f64::from(LIM_THRESH)) * INV_LIM_RANGE).atan()
            * TWO_LIM_RANGE_OVER_PI
            + f64::from(LIM_THRESH)) as f32
    } else {
        sample
    }
}

/// Stream wrapper applying [`soft_clip`] to every sample
#[derive(Debug)]
pub struct SoftLimiterFilter<S> {
    stream: S,
}

impl<S: SampleStream> SoftLimiterFilter<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: SampleStream> SampleStream for SoftLimiterFilter<S> {
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
        for sample in &mut data[..read] {
            *sample = soft_clip(*sample);
        }
        read
    }

    fn reset(&mut self) {
        self.stream.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        self.stream.seek(position)
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        self.stream.channel_rms()
    }
}
