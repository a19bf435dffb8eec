//! SIMD carrier synthesis.
//!
//! One step produces [`SAMPLES_PER_STEP`] samples per channel, split into two
//! sub-groups of [`SUBGROUP_LEN`]. Amplitude and frequency may each ramp
//! linearly across the step: half the step's delta is spread over the first
//! sub-group and half over the second.
//!
//! # Units
//!
//! Integers on the command side map to kernel floats as follows:
//!
//! | Quantity | Integer unit | Kernel unit |
//! |----------|--------------|-------------|
//! | phase | `MAX_PHASE` per cycle | π (`PHASE_SCALE`) |
//! | frequency | 10 × Hz | cycles per step (`FREQ_SCALE`) |
//! | amplitude | `AMP_SCALE` = (2³¹ − 1)·π | `AMP_FACTOR` |
//!
//! A frequency of 1.0 in kernel units is one full cycle per 32 samples,
//! 19.53125 MHz at 625 MS/s. The sine approximation returns sin(πx)/π, and
//! `AMP_FACTOR` carries the matching π² so that an integer amplitude of
//! `i32::MAX` is unit output.
//!
//! These conventions match the hardware calibration and must not change.

use core::f32::consts::PI;

use wide::f32x8;

/// Output samples per step.
pub const SAMPLES_PER_STEP: usize = 32;

/// Samples per sub-group; a step has two.
pub const SUBGROUP_LEN: usize = SAMPLES_PER_STEP / 2;

/// Output sample rate the integer units are defined against.
pub const SAMPLE_RATE: u64 = 625_000_000;

/// Integer phase of one full cycle (625e6 × 10).
pub const MAX_PHASE: i64 = 6_250_000_000;

/// Integer phase to units of π.
pub const PHASE_SCALE: f64 = 2.0 / MAX_PHASE as f64;

/// Integer frequency (10 × Hz) to cycles per step.
pub const FREQ_SCALE: f64 = 0.1 / (SAMPLE_RATE as f64 / SAMPLES_PER_STEP as f64);

/// Full-scale amplitude normalization, (2³¹ − 1)·π.
pub const AMP_SCALE: f32 = 6.746_518_5e9;

/// Integer amplitude to kernel amplitude.
pub const AMP_FACTOR: f32 = PI * PI / AMP_SCALE;

const LANES: usize = 8;

/// Sample offsets within a sub-group, in sub-group lengths.
const TIDXS: [[f32; LANES]; 2] = [
    [0.0, 0.0625, 0.125, 0.1875, 0.25, 0.3125, 0.375, 0.4375],
    [0.5, 0.5625, 0.625, 0.6875, 0.75, 0.8125, 0.875, 0.9375],
];

/// Evaluates sin(πx)/π on every lane.
///
/// Reduces to `r = x − round(x)` in [−½, ½], flips the sign for odd
/// periods, and applies an odd minimax polynomial in `r`.
#[inline]
pub fn sinpi_over_pi(x: f32x8) -> f32x8 {
    let q = x.round();
    let r = x - q;
    let s = r * r;

    // 1 for even q, -1 for odd q.
    let half = q * f32x8::splat(0.5);
    let sign = f32x8::splat(1.0) - f32x8::splat(4.0) * (half - half.round()).abs();
    let r = r * sign;

    let mut u = f32x8::splat(0.024_749_093) * s - f32x8::splat(0.190_457_85);
    u = u * s + f32x8::splat(0.811_717_7);
    u = u * s - f32x8::splat(1.644_933_5);
    (s * r) * u + r
}

/// `out += input * s`, skipped entirely when `s` is exactly zero.
#[inline]
fn accum_nonzero(out: &mut f32x8, input: f32x8, s: f32) {
    if s != 0.0 {
        *out = *out + input * f32x8::splat(s);
    }
}

/// Channel parameters at the start of a step, in kernel units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CarrierParams {
    /// Phase in units of π.
    pub phase: f32,
    /// Frequency in cycles per step.
    pub freq: f32,
    /// Frequency change across the step.
    pub dfreq: f32,
    /// Amplitude.
    pub amp: f32,
    /// Amplitude change across the step.
    pub damp: f32,
}

impl CarrierParams {
    /// Converts integer channel state and ramp deltas to kernel units.
    #[inline]
    pub fn from_integer(
        phase: i64,
        frequency: i32,
        dfrequency: i32,
        amplitude: i32,
        damplitude: i32,
    ) -> Self {
        Self {
            phase: (phase as f64 * PHASE_SCALE) as f32,
            freq: (frequency as f64 * FREQ_SCALE) as f32,
            dfreq: (dfrequency as f64 * FREQ_SCALE) as f32,
            amp: amplitude as f32 * AMP_FACTOR,
            damp: damplitude as f32 * AMP_FACTOR,
        }
    }
}

/// Per-step waveform accumulator shared by all channels.
#[derive(Debug, Clone, Copy)]
pub struct Accumulator {
    /// `[sub-group 0 lo, sub-group 0 hi, sub-group 1 lo, sub-group 1 hi]`.
    lanes: [f32x8; 4],
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            lanes: [f32x8::splat(0.0); 4],
        }
    }
}

impl Accumulator {
    /// Adds one channel's carrier for this step.
    pub fn add_channel(&mut self, p: &CarrierParams) {
        let phase = f32x8::splat(p.phase);
        let freq = f32x8::splat(p.freq);
        let half_df = p.dfreq / 2.0;
        let half_damp = p.damp / 2.0;
        let one = f32x8::splat(1.0);

        for (half, tidx) in TIDXS.iter().enumerate() {
            let t = f32x8::from(*tidx);

            let mut phase_v1 = phase + freq * t;
            let mut phase_v2 = phase + freq * (t + one);
            accum_nonzero(&mut phase_v1, t, half_df);
            accum_nonzero(&mut phase_v2, t + one, half_df);

            let mut amp_v1 = f32x8::splat(p.amp);
            let mut amp_v2 = f32x8::splat(p.amp + half_damp);
            accum_nonzero(&mut amp_v1, t, half_damp);
            accum_nonzero(&mut amp_v2, t, half_damp);

            self.lanes[half] = self.lanes[half] + sinpi_over_pi(phase_v1) * amp_v1;
            self.lanes[2 + half] = self.lanes[2 + half] + sinpi_over_pi(phase_v2) * amp_v2;
        }
    }

    /// Writes the accumulated waveform into `out`.
    pub fn store(&self, out: &mut [f32; SAMPLES_PER_STEP]) {
        for (chunk, lane) in out.chunks_exact_mut(LANES).zip(self.lanes.iter()) {
            chunk.copy_from_slice(&lane.to_array());
        }
    }
}

/// Everything one step produces.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepOutput {
    /// Waveform, full scale ±1.0.
    pub samples: [f32; SAMPLES_PER_STEP],
    /// Sum over channels of integer amplitude at each sub-group start.
    pub amplitude: [i64; 2],
    /// Sum over channels of integer frequency at each sub-group start.
    pub frequency: [i64; 2],
}

impl StepOutput {
    /// Resets to silence and a zero trace.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Adds one channel's values to the control trace.
    #[inline]
    pub fn trace_channel(
        &mut self,
        amplitude: i32,
        damplitude: i32,
        frequency: i32,
        dfrequency: i32,
    ) {
        self.amplitude[0] += amplitude as i64;
        self.amplitude[1] += amplitude as i64 + (damplitude / 2) as i64;
        self.frequency[0] += frequency as i64;
        self.frequency[1] += frequency as i64 + (dfrequency / 2) as i64;
    }

    /// True when every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }

    /// Converts the waveform to device samples, rounding and saturating at ±32767.
    pub fn write_i16(&self, out: &mut [i16]) {
        for (dst, &src) in out.iter_mut().zip(self.samples.iter()) {
            *dst = libm::roundf(src * 32767.0).clamp(-32767.0, 32767.0) as i16;
        }
    }

    /// Device samples for this step.
    pub fn to_i16(&self) -> [i16; SAMPLES_PER_STEP] {
        let mut out = [0; SAMPLES_PER_STEP];
        self.write_i16(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(x: f32) -> f32 {
        libm::sinf(PI * x) / PI
    }

    #[test]
    fn sinpi_matches_reference_over_several_periods() {
        let mut x = -4.0f32;
        while x <= 4.0 {
            let lanes = sinpi_over_pi(f32x8::splat(x)).to_array();
            assert!(
                (lanes[0] - reference(x)).abs() < 5e-6,
                "x={x}: {} vs {}",
                lanes[0],
                reference(x)
            );
            x += 0.037;
        }
    }

    #[test]
    fn sinpi_is_odd() {
        for x in [0.1f32, 0.25, 0.7, 1.3, 2.9] {
            let pos = sinpi_over_pi(f32x8::splat(x)).to_array()[0];
            let neg = sinpi_over_pi(f32x8::splat(-x)).to_array()[0];
            assert!((pos + neg).abs() < 1e-7);
        }
    }

    #[test]
    fn full_scale_amplitude_is_unit_peak() {
        // Quarter-cycle phase offset puts sample 0 at the sine peak.
        let p = CarrierParams::from_integer(MAX_PHASE / 4, 0, 0, i32::MAX, 0);
        let mut acc = Accumulator::default();
        acc.add_channel(&p);
        let mut out = [0.0; SAMPLES_PER_STEP];
        acc.store(&mut out);
        for s in out {
            assert!((s - 1.0).abs() < 1e-5, "{s}");
        }
    }

    #[test]
    fn one_cycle_per_step_frequency() {
        // 19.53125 MHz in 10 × Hz is one full cycle per step.
        let p = CarrierParams::from_integer(0, 195_312_500, 0, i32::MAX, 0);
        assert!((p.freq - 1.0).abs() < 1e-6);
        let mut acc = Accumulator::default();
        acc.add_channel(&p);
        let mut out = [0.0; SAMPLES_PER_STEP];
        acc.store(&mut out);
        // sin(2π i / 32)
        for (i, s) in out.iter().enumerate() {
            let expected = libm::sinf(2.0 * PI * i as f32 / 32.0);
            assert!((s - expected).abs() < 1e-4, "sample {i}: {s} vs {expected}");
        }
    }

    #[test]
    fn zero_delta_matches_constant_carrier_bitwise() {
        let a = CarrierParams::from_integer(123_456, 40_000_000, 0, 1 << 30, 0);
        let mut acc = Accumulator::default();
        acc.add_channel(&a);
        let mut first = [0.0; SAMPLES_PER_STEP];
        acc.store(&mut first);

        let mut acc = Accumulator::default();
        acc.add_channel(&a);
        let mut second = [0.0; SAMPLES_PER_STEP];
        acc.store(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn channels_sum() {
        let a = CarrierParams::from_integer(MAX_PHASE / 4, 0, 0, i32::MAX / 4, 0);
        let mut acc = Accumulator::default();
        acc.add_channel(&a);
        acc.add_channel(&a);
        let mut out = [0.0; SAMPLES_PER_STEP];
        acc.store(&mut out);
        assert!((out[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn i16_conversion_rounds_and_saturates() {
        let mut step = StepOutput::default();
        step.samples[0] = 1.5;
        step.samples[1] = -2.0;
        step.samples[2] = 0.5;
        let out = step.to_i16();
        assert_eq!(out[0], 32767);
        assert_eq!(out[1], -32767);
        assert_eq!(out[2], 16384);
        assert_eq!(out[3], 0);
    }

    #[test]
    fn trace_records_sub_group_starts() {
        let mut step = StepOutput::default();
        step.trace_channel(100, 10, 5000, -40);
        step.trace_channel(1, 0, 0, 0);
        assert_eq!(step.amplitude, [101, 106]);
        assert_eq!(step.frequency, [5000, 4980]);
    }
}
