//! Edge timing classification
//!
//! Converts three consecutive edge timestamps (one full bit period: two
//! half-bits, with one edge of lookahead) into a [`BitClass`]. All the
//! protocol's timing windows are precomputed into sample units once per run,
//! so classification itself is pure integer comparison.
//!
//! Nominal half-bit widths per the standard: a one-bit half is 52-64 us, a
//! zero-bit half is 90-119 us but may legally be stretched up to ~10 ms on
//! one side. The Railcom cutout appears as a 454-613 us gap and is reported
//! without forcing resynchronization.

use crate::types::BitClass;

/// Minimum usable sample rate in Hz; below this the half-bit windows
/// collapse into each other and classification is meaningless.
pub const MIN_SAMPLE_RATE: u64 = 25_000;

const ONE_HALF_MIN_US: f64 = 52.0;
const ONE_HALF_MAX_US: f64 = 64.0;
/// Nominal one-bit period used for the tolerance-scaled half difference cap
const ONE_PERIOD_US: f64 = 116.0;
const HALF_DIFF_MIN_US: f64 = 6.0;
const ZERO_HALF_MIN_US: f64 = 90.0;
const ZERO_HALF_SHORT_MAX_US: f64 = 119.0;
const ZERO_HALF_LONG_MAX_US: f64 = 10_000.0;
const CUTOUT_MIN_US: f64 = 454.0;
const CUTOUT_MAX_US: f64 = 613.0;

/// Precomputed timing windows in sample units
#[derive(Debug, Clone)]
pub struct BitTiming {
    one_half_min: u64,
    one_half_max: u64,
    half_diff_max: u64,
    zero_half_min: u64,
    zero_half_short_max: u64,
    zero_half_long_max: u64,
    /// Exclusive bounds of the polarity-straddle band
    straddle_low: u64,
    straddle_high: u64,
    cutout_min: u64,
    cutout_max: u64,
    /// Width limit for the short-pulse filter
    short_pulse_max: u64,
}

impl BitTiming {
    /// Compute all windows for the given sample rate
    ///
    /// `tolerance` widens the one-bit windows symmetrically (a fraction,
    /// e.g. 0.05); `short_pulse_limit_us` is the interfering-pulse width
    /// limit used by the edge prefilter.
    pub fn new(samplerate: u64, tolerance: f64, short_pulse_limit_us: u32) -> Self {
        let to_samples = |us: f64| -> f64 { us * samplerate as f64 / 1_000_000.0 };

        let one_half_min = to_samples(ONE_HALF_MIN_US * (1.0 - tolerance)).floor() as u64;
        let one_half_max = to_samples(ONE_HALF_MAX_US * (1.0 + tolerance)).ceil() as u64;
        let half_diff_us = HALF_DIFF_MIN_US.max(2.0 * tolerance * ONE_PERIOD_US);
        let zero_half_min = to_samples(ZERO_HALF_MIN_US).floor() as u64;

        Self {
            one_half_min,
            one_half_max,
            half_diff_max: to_samples(half_diff_us).ceil() as u64,
            zero_half_min,
            zero_half_short_max: to_samples(ZERO_HALF_SHORT_MAX_US).ceil() as u64,
            zero_half_long_max: to_samples(ZERO_HALF_LONG_MAX_US).ceil() as u64,
            straddle_low: 2 * one_half_max,
            straddle_high: 2 * zero_half_min,
            cutout_min: to_samples(CUTOUT_MIN_US).floor() as u64,
            cutout_max: to_samples(CUTOUT_MAX_US).ceil() as u64,
            short_pulse_max: to_samples(short_pulse_limit_us as f64).ceil() as u64,
        }
    }

    /// Maximum width of a pulse the prefilter may merge away, in samples
    pub fn short_pulse_max(&self) -> u64 {
        self.short_pulse_max
    }

    /// Classify one bit period delimited by edges at `t1`, `t2`, `t3`
    ///
    /// `t1..t2` and `t2..t3` are the two half-bits. Pure: no state is read
    /// or written beyond the precomputed windows.
    pub fn classify(&self, t1: u64, t2: u64, t3: u64) -> BitClass {
        let part1 = t2.saturating_sub(t1);
        let part2 = t3.saturating_sub(t2);
        let total = t3.saturating_sub(t1);

        if self.is_one_half(part1)
            && self.is_one_half(part2)
            && part1.abs_diff(part2) <= self.half_diff_max
        {
            return BitClass::One;
        }

        // A zero accepts one stretched half (up to ~10 ms) as long as the
        // other half stays in the strict window.
        let p1_strict = self.is_zero_half_strict(part1);
        let p2_strict = self.is_zero_half_strict(part2);
        let p1_loose = self.is_zero_half_loose(part1);
        let p2_loose = self.is_zero_half_loose(part2);
        if (p1_strict && p2_loose) || (p2_strict && p1_loose) {
            let stretched = part1.max(part2) > self.zero_half_short_max;
            return BitClass::Zero { stretched };
        }

        if total > self.straddle_low && total < self.straddle_high {
            return BitClass::HalfZeroHalfOne;
        }

        if total >= self.cutout_min && total <= self.cutout_max {
            return BitClass::RailcomCutout;
        }

        BitClass::Unknown
    }

    fn is_one_half(&self, width: u64) -> bool {
        width >= self.one_half_min && width <= self.one_half_max
    }

    fn is_zero_half_strict(&self, width: u64) -> bool {
        width >= self.zero_half_min && width <= self.zero_half_short_max
    }

    fn is_zero_half_loose(&self, width: u64) -> bool {
        width >= self.zero_half_min && width <= self.zero_half_long_max
    }
}
