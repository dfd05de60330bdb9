//! Composable stream filters
//!
//! Every filter wraps an upstream [`SampleStream`](crate::stream::SampleStream)
//! and implements the same trait, so chains compose by construction:
//! time-domain effects (chorus, echo), dynamics processors (compressor,
//! expander, noise gates), spectral processors (frequency shift, pitch
//! shift, vocoder), and structural combinators (concatenation, scaling,
//! up-channeling, limiting).

pub mod chorus;
pub mod compressor;
pub mod concat;
pub mod convolution;
pub mod echo;
pub mod expander;
pub mod frequency_shift;
pub mod limiter;
pub mod multichannel_gate;
pub mod noise_gate;
pub mod pitch_shift;
pub mod scaler;
pub mod up_channel;
pub mod vocoder;

pub use chorus::{ChorusFilter, ChorusParams, LfoShape};
pub use compressor::{CompressorFilter, CompressorParams};
pub use concat::StreamConcatenator;
pub use convolution::AnalyticConvolutionFilter;
pub use echo::{EchoFilter, EchoParams};
pub use expander::{ExpanderFilter, ExpanderParams};
pub use frequency_shift::{DynamicFrequencyShiftFilter, FrequencyShiftFilter};
pub use limiter::{soft_clip, SoftLimiterFilter};
pub use multichannel_gate::{MultiChannelNoiseGateFilter, MultiChannelNoiseGateParams};
pub use noise_gate::{NoiseGateFilter, NoiseGateParams};
pub use pitch_shift::{PitchShiftFilter, PitchShiftParams};
pub use scaler::{MonoScalerFilter, StereoScalerFilter, StreamRmsStandardizer};
pub use up_channel::{AudioChannel, SelectiveUpChanneler, UpChannelFilter};
pub use vocoder::{VocoderFilter, VocoderParams};
