//! Pull-based streaming audio filters
//!
//! Audio flows through chains of [`SampleStream`] implementors: a source
//! (such as [`SampleBuffer`]) at the bottom, filters stacked on top, and
//! the consumer calling [`SampleStream::read`] at the top. Samples are
//! interleaved `f32` PCM and all counts are in samples, not frames.

pub mod filters;
pub mod ring;
pub mod spectral;
pub mod stream;

// Re-export specific items to avoid ambiguous glob imports
pub use filters::{
    soft_clip, AnalyticConvolutionFilter, AudioChannel, ChorusFilter, ChorusParams,
    CompressorFilter, CompressorParams, DynamicFrequencyShiftFilter, EchoFilter, EchoParams,
    ExpanderFilter, ExpanderParams, FrequencyShiftFilter, LfoShape, MonoScalerFilter,
    MultiChannelNoiseGateFilter, MultiChannelNoiseGateParams, NoiseGateFilter, NoiseGateParams,
    PitchShiftFilter, PitchShiftParams, SelectiveUpChanneler, SoftLimiterFilter,
    StereoScalerFilter, StreamConcatenator, StreamRmsStandardizer, UpChannelFilter, VocoderFilter,
    VocoderParams,
};
pub use stream::{
    calculate_rms, Result, RmsBehavior, RmsCache, SampleBuffer, SampleStream, StreamError,
};
