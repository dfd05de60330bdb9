//! Frequency shifting via analytic signal rotation
//!
//! The input is turned into an analytic (I/Q) signal with the 129-tap FIR
//! pair from Clay S. Turner's "An Efficient Analytic Signal Generator"
//! (https://www.claysturner.com/dsp/asg.pdf), then rotated by a phasor that
//! advances `shift` Hz. Unlike pitch scaling, every component moves by the
//! same absolute frequency, so harmonic relationships are not preserved.

use num_complex::Complex;
use tracing::{debug, warn};

use crate::filters::convolution::AnalyticConvolutionFilter;
use crate::stream::{Result, SampleStream, StreamError};

type Complex64 = Complex<f64>;

const FILTER_LENGTH: usize = 129;
const KERNEL_A: f64 = 0.00125;
const KERNEL_W1: f64 = 0.49875;
const KERNEL_W2: f64 = 0.00125;

const BUFFER_SIZE: usize = 512;

/// Shifts below this magnitude collapse to "no shift" in the dynamic filter
const FREQ_CUTOFF: f64 = 1.0;
const MAX_FREQ: f64 = 5000.0;

/// Turner's half-band analytic kernel: the imaginary taps are the real taps
/// reversed, and the center tap carries the passband correction.
fn analytic_kernel() -> (Vec<f64>, Vec<f64>) {
    use std::f64::consts::PI;

    let two_pi_sq = 2.0 * PI * PI;
    let four_a_sq = 4.0 * KERNEL_A * KERNEL_A;
    let pi_sq = PI * PI;
    let pi_ov4 = PI / 4.0;
    let pi_ov4a = PI / (4.0 * KERNEL_A);
    let n0 = (FILTER_LENGTH - 1) as f64 / 2.0;

    let mut real = vec![0.0f64; FILTER_LENGTH];

    for (i, tap) in real.iter_mut().enumerate().take(FILTER_LENGTH - 1).skip(1) {
        if i as f64 == n0 {
            continue;
        }
        let t = 2.0 * PI * (i as f64 - n0);
        let prefactor = two_pi_sq * (KERNEL_A * t).cos() / (t * (four_a_sq * t * t - pi_sq));
        *tap = prefactor * ((KERNEL_W1 * t + pi_ov4).sin() - (KERNEL_W2 * t + pi_ov4).sin());
    }

    real[0] = KERNEL_A
        * ((pi_ov4a * (KERNEL_A - 2.0 * KERNEL_W1)).sin()
            - (pi_ov4a * (KERNEL_A - 2.0 * KERNEL_W2)).sin());
    real[FILTER_LENGTH - 1] = KERNEL_A
        * ((pi_ov4a * (KERNEL_A + 2.0 * KERNEL_W2)).sin()
            - (pi_ov4a * (KERNEL_A + 2.0 * KERNEL_W1)).sin());
    real[n0 as usize] = std::f64::consts::SQRT_2 * (KERNEL_W2 - KERNEL_W1);

    let imag: Vec<f64> = real.iter().rev().copied().collect();
    (real, imag)
}

/// Rotating phasor table spanning one shift cycle.
///
/// The table holds `ceil(rate / |shift|) - 1` unit phasors; the fractional
/// remainder of a cycle is accumulated into `partial` each wrap so the
/// rotation never drifts.
#[derive(Debug)]
struct PhasorTable {
    samples: Vec<Complex64>,
    count: usize,
    cycle_partial: f64,
    base_phase: f64,
    partial: Complex64,
    position: usize,
    cycles: usize,
}

impl PhasorTable {
    fn for_shift(shift: f64, sampling_rate: f64, base_phase: f64) -> Self {
        let sample_count = (sampling_rate / shift).abs();
        let count = ((sample_count.ceil() as usize).saturating_sub(1)).max(1);

        let cycle_partial =
            (2.0 * std::f64::consts::PI * shift / sampling_rate) * (count as f64 - sample_count);

        let samples = (0..count)
            .map(|i| {
                Complex64::from_polar(
                    1.0,
                    shift.signum() * 2.0 * std::f64::consts::PI * i as f64 / sample_count,
                )
            })
            .collect();

        let mut table = Self {
            samples,
            count,
            cycle_partial,
            base_phase,
            partial: Complex64::new(1.0, 0.0),
            position: 0,
            cycles: 0,
        };
        table.seek(0);
        table
    }

    fn unity(base_phase: f64) -> Self {
        let count = BUFFER_SIZE;
        let mut table = Self {
            samples: vec![Complex64::new(1.0, 0.0); count],
            count,
            cycle_partial: 0.0,
            base_phase,
            partial: Complex64::new(1.0, 0.0),
            position: 0,
            cycles: 0,
        };
        table.seek(0);
        table
    }

    /// Rotate one analytic sample and advance the phasor
    fn apply(&mut self, analytic: Complex64) -> f64 {
        let rotated = analytic * self.partial;
        let shifter = self.samples[self.position];
        let output = rotated.re * shifter.re - rotated.im * shifter.im;

        self.position += 1;
        if self.position == self.count {
            self.position = 0;
            self.cycles += 1;
            self.partial = Complex64::from_polar(
                1.0,
                self.base_phase + self.cycles as f64 * self.cycle_partial,
            );
        }

        output
    }

    /// Resynchronize to an absolute sample position arithmetically
    fn seek(&mut self, position: usize) {
        self.cycles = position / self.count;
        self.position = position % self.count;
        self.partial = Complex64::from_polar(
            1.0,
            self.base_phase + self.cycles as f64 * self.cycle_partial,
        );
    }

    /// Phase the rotation currently sits at
    fn current_phase(&self) -> f64 {
        (self.partial * self.samples[self.position]).arg()
    }
}

fn shifted_read<S: SampleStream>(
    conv: &mut AnalyticConvolutionFilter<S>,
    buffer: &mut [f32],
    table: &mut PhasorTable,
    data: &mut [f32],
) -> usize {
    let count = data.len();
    let mut remaining = count;
    let mut offset = 0;

    while remaining > 0 {
        let max_read = (2 * remaining).min(BUFFER_SIZE);
        let read = conv.read(&mut buffer[..max_read]);
        if read == 0 {
            break;
        }

        let pairs = read / 2;
        for i in 0..pairs {
            let analytic = Complex64::new(
                f64::from(buffer[2 * i]),
                f64::from(buffer[2 * i + 1]),
            );
            data[offset + i] = table.apply(analytic) as f32;
        }

        remaining -= pairs;
        offset += pairs;
    }

    count - remaining
}

/// Fixed frequency shift of a mono stream
pub struct FrequencyShiftFilter<S> {
    conv: AnalyticConvolutionFilter<S>,
    table: PhasorTable,
    buffer: Box<[f32; BUFFER_SIZE]>,
    channel_samples: Option<usize>,
}

impl<S: SampleStream> FrequencyShiftFilter<S> {
    pub fn new(stream: S, frequency_shift: f64) -> Result<Self> {
        let sampling_rate = f64::from(stream.sampling_rate());
        if !frequency_shift.is_finite()
            || frequency_shift == 0.0
            || frequency_shift.abs() > sampling_rate / 2.0
        {
            return Err(StreamError::Composition(format!(
                "frequency shift {frequency_shift} Hz outside (0, {}]",
                sampling_rate / 2.0
            )));
        }

        let channel_samples = stream.channel_samples();
        let (real, imag) = analytic_kernel();
        let conv = AnalyticConvolutionFilter::new(stream, &real, &imag)?;

        Ok(Self {
            conv,
            table: PhasorTable::for_shift(frequency_shift, sampling_rate, 0.0),
            buffer: Box::new([0.0; BUFFER_SIZE]),
            channel_samples,
        })
    }
}

impl<S: SampleStream> SampleStream for FrequencyShiftFilter<S> {
    fn channels(&self) -> usize {
        1
    }

    fn sampling_rate(&self) -> f32 {
        self.conv.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.channel_samples
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        shifted_read(&mut self.conv, &mut self.buffer[..], &mut self.table, data)
    }

    fn reset(&mut self) {
        self.table.seek(0);
        self.conv.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        let position = match self.channel_samples {
            Some(samples) => position.min(samples),
            None => position,
        };
        self.conv.seek(position)?;
        self.table.seek(position);
        Ok(())
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        // frequency shifting is energy preserving; report the source RMS
        vec![self.conv.channel_rms()[0]]
    }
}

/// Frequency shift with a runtime-adjustable shift amount.
///
/// Shift changes carry the accumulated phase forward, so adjusting the shift
/// mid-stream does not click.
pub struct DynamicFrequencyShiftFilter<S> {
    conv: AnalyticConvolutionFilter<S>,
    table: PhasorTable,
    buffer: Box<[f32; BUFFER_SIZE]>,
    channel_samples: Option<usize>,
    sampling_rate: f64,
    frequency_shift: f64,
    partial_phase: f64,
}

impl<S: SampleStream> DynamicFrequencyShiftFilter<S> {
    pub fn new(stream: S, frequency_shift: f64) -> Result<Self> {
        let sampling_rate = f64::from(stream.sampling_rate());
        let channel_samples = stream.channel_samples();
        let (real, imag) = analytic_kernel();
        let conv = AnalyticConvolutionFilter::new(stream, &real, &imag)?;

        let shift = clamp_shift(if frequency_shift.is_finite() {
            frequency_shift
        } else {
            0.0
        });

        let table = build_table(shift, sampling_rate, 0.0);

        Ok(Self {
            conv,
            table,
            buffer: Box::new([0.0; BUFFER_SIZE]),
            channel_samples,
            sampling_rate,
            frequency_shift: shift,
            partial_phase: 0.0,
        })
    }

    pub fn frequency_shift(&self) -> f64 {
        self.frequency_shift
    }

    /// Change the shift amount, rebuilding the phasor table and carrying the
    /// current phase so the transition is continuous
    pub fn set_frequency_shift(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }

        let clamped = clamp_shift(value);
        if clamped != value {
            warn!(requested = value, applied = clamped, "frequency shift clamped");
        }
        if clamped == self.frequency_shift
            || (value.abs() < FREQ_CUTOFF && self.frequency_shift == 0.0)
        {
            return;
        }

        self.partial_phase += self.table.current_phase();
        self.frequency_shift = clamped;
        self.table = build_table(clamped, self.sampling_rate, self.partial_phase);
        debug!(shift = clamped, "rebuilt frequency shifter");
    }
}

fn clamp_shift(value: f64) -> f64 {
    let clamped = value.clamp(-MAX_FREQ, MAX_FREQ);
    if clamped.abs() < FREQ_CUTOFF {
        0.0
    } else {
        clamped
    }
}

fn build_table(shift: f64, sampling_rate: f64, base_phase: f64) -> PhasorTable {
    if shift == 0.0 {
        PhasorTable::unity(base_phase)
    } else {
        PhasorTable::for_shift(shift, sampling_rate, base_phase)
    }
}

impl<S: SampleStream> SampleStream for DynamicFrequencyShiftFilter<S> {
    fn channels(&self) -> usize {
        1
    }

    fn sampling_rate(&self) -> f32 {
        self.conv.sampling_rate()
    }

    fn channel_samples(&self) -> Option<usize> {
        self.channel_samples
    }

    fn read(&mut self, data: &mut [f32]) -> usize {
        shifted_read(&mut self.conv, &mut self.buffer[..], &mut self.table, data)
    }

    fn reset(&mut self) {
        self.partial_phase = 0.0;
        self.table.base_phase = 0.0;
        self.table.seek(0);
        self.conv.reset();
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        let position = match self.channel_samples {
            Some(samples) => position.min(samples),
            None => position,
        };
        self.conv.seek(position)?;
        self.table.seek(position);
        Ok(())
    }

    fn channel_rms(&mut self) -> Vec<f64> {
        vec![self.conv.channel_rms()[0]]
    }
}
