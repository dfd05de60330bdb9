//! Fixed-gain scalers and the RMS standardizer

use tracing::warn;

use crate::stream::{calculate_rms, Result, SampleStream, StreamError};

/// Applies a fixed linear gain to a mono stream
#[derive(Debug)]
pub struct MonoScalerFilter<S> {
    stream: S,
    factor: f32,
    channel_rms: Option<Vec<f64>>,
}

impl<S: SampleStream> MonoScalerFilter<S> {
    pub fn new(stream: S, factor: f32) -> Result<Self> {
        if stream.channels() != 1 {
            return Err(StreamError::Composition(
                "mono scaler inner stream must have one channel".into(),
            ));
        }

        Ok(Self {
            stream,
            factor,
            channel_rms: None,
        })
    }
}

impl<S: SampleStream> SampleStream for MonoScalerFilter<S> {
    fn channels(&self) -> usize {
        1
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
            *sample *= self.factor;
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
        if let Some(rms) = &self.channel_rms {
            return rms.clone();
        }

        let rms: Vec<f64> = self
            .stream
            .channel_rms()
            .into_iter()
            .map(|value| value * f64::from(self.factor.abs()))
            .collect();
        self.channel_rms = Some(rms.clone());
        rms
    }
}

/// Applies independent fixed gains to the two sides of a stereo stream
#[derive(Debug)]
pub struct StereoScalerFilter<S> {
    stream: S,
    left_factor: f32,
    right_factor: f32,
    channel_rms: Option<Vec<f64>>,
}

impl<S: SampleStream> StereoScalerFilter<S> {
    pub fn new(stream: S, left_factor: f64, right_factor: f64) -> Result<Self> {
        if stream.channels() != 2 {
            return Err(StreamError::Composition(
                "stereo scaler inner stream must have two channels".into(),
            ));
        }

        Ok(Self {
            stream,
            left_factor: left_factor as f32,
            right_factor: right_factor as f32,
            channel_rms: None,
        })
    }
}

impl<S: SampleStream> SampleStream for StereoScalerFilter<S> {
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
        let read = self.stream.read(data);
        for pair in data[..read].chunks_exact_mut(2) {
            pair[0] *= self.left_factor;
            pair[1] *= self.right_factor;
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
        if let Some(rms) = &self.channel_rms {
            return rms.clone();
        }

        let mut rms = self.stream.channel_rms();
        rms[0] *= f64::from(self.left_factor.abs());
        rms[1] *= f64::from(self.right_factor.abs());
        self.channel_rms = Some(rms.clone());
        rms
    }
}

const DEFAULT_TARGET_RMS: f64 = 1.0 / 128.0;

/// Scales the underlying stream so its loudest channel hits a target RMS.
///
/// The scale factor is derived lazily on first read. Unknowable or zero
/// upstream RMS degrades to unity gain.
#[derive(Debug)]
pub struct StreamRmsStandardizer<S> {
    stream: S,
    target_rms: f64,
    scalar: f32,
    channel_rms: Option<Vec<f64>>,
    initialized: bool,
}

impl<S: SampleStream> StreamRmsStandardizer<S> {
    pub fn new(stream: S, target_rms: f64) -> Self {
        Self {
            stream,
            target_rms,
            scalar: 1.0,
            channel_rms: None,
            initialized: false,
        }
    }

    pub fn with_default_target(stream: S) -> Self {
        Self::new(stream, DEFAULT_TARGET_RMS)
    }

    fn initialize(&mut self) {
        let mut rms_values = self.stream.channel_rms();

        if rms_values.iter().any(|value| value.is_nan()) {
            if self.stream.channel_samples().is_none() {
                warn!("cannot standardize an unbounded stream with unknowable RMS, using unity gain");
                self.scalar = 1.0;
                self.channel_rms = Some(rms_values);
                self.initialized = true;
                return;
            }
            rms_values = calculate_rms(&mut self.stream);
        }

        let max_rms = rms_values.iter().cloned().fold(f64::MIN, f64::max);
        let mut scalar = (self.target_rms / max_rms) as f32;

        if scalar.is_nan() || scalar.is_infinite() {
            warn!(max_rms, "degenerate upstream RMS, using unity gain");
            scalar = 1.0;
        }

        self.scalar = scalar;
        self.channel_rms = Some(
            rms_values
                .into_iter()
                .map(|value| value * f64::from(scalar))
                .collect(),
        );
        self.initialized = true;
    }
}

impl<S: SampleStream> SampleStream for StreamRmsStandardizer<S> {
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
        if !self.initialized {
            self.initialize();
        }

        let read = self.stream.read(data);
        for sample in &mut data[..read] {
            *sample *= self.scalar;
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
        if !self.initialized {
            self.initialize();
        }
        self.channel_rms.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SampleBuffer;

    #[test]
    fn test_mono_scaler_applies_gain() {
        let source = SampleBuffer::from_mono(vec![1.0, -0.5, 0.25], 44100.0);
        let mut scaler = MonoScalerFilter::new(source, 2.0).unwrap();

        let mut out = [0.0f32; 3];
        assert_eq!(scaler.read(&mut out), 3);
        assert_eq!(out, [2.0, -1.0, 0.5]);
    }

    #[test]
    fn test_mono_scaler_rejects_stereo() {
        let source = SampleBuffer::new(vec![0.0; 4], 2, 44100.0).unwrap();
        assert!(MonoScalerFilter::new(source, 2.0).is_err());
    }

    #[test]
    fn test_mono_scaler_rms_uses_magnitude() {
        let source = SampleBuffer::from_mono(vec![0.5; 100], 44100.0);
        let mut scaler = MonoScalerFilter::new(source, -2.0).unwrap();
        let rms = scaler.channel_rms();
        assert!((rms[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stereo_scaler_per_side_gain() {
        let source = SampleBuffer::new(vec![1.0, 1.0, 0.5, 0.5], 2, 44100.0).unwrap();
        let mut scaler = StereoScalerFilter::new(source, 0.5, 2.0).unwrap();

        let mut out = [0.0f32; 4];
        assert_eq!(scaler.read(&mut out), 4);
        assert_eq!(out, [0.5, 2.0, 0.25, 1.0]);
    }

    #[test]
    fn test_standardizer_hits_target_rms() {
        let source = SampleBuffer::from_mono(vec![0.5; 1000], 44100.0);
        let mut standardizer = StreamRmsStandardizer::new(source, 0.1);

        let rms = standardizer.channel_rms();
        assert!((rms[0] - 0.1).abs() < 1e-6);

        let mut out = [0.0f32; 10];
        assert_eq!(standardizer.read(&mut out), 10);
        assert!((out[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_standardizer_silent_stream_unity_gain() {
        let source = SampleBuffer::from_mono(vec![0.0; 100], 44100.0);
        let mut standardizer = StreamRmsStandardizer::with_default_target(source);

        let mut out = [0.0f32; 10];
        assert_eq!(standardizer.read(&mut out), 10);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
