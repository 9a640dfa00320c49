//! Integer-ratio sample rate conversion
//!
//! Windowed-sinc (Blackman) FIR filters for interpolation and decimation
//! between the 8kHz telephony rate and the 16/24kHz wideband rates.
//! Frames are processed independently: samples outside the frame are
//! taken as the nearest edge sample, so no state carries over between calls.

use std::f64::consts::PI;

use super::VosError;

/// Filter half-span measured in low-rate samples
const HALF_SPAN: usize = 12;

/// Decimation cutoff as a fraction of the output Nyquist frequency
const DECIMATION_CUTOFF: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Stateless resampler for a fixed integer ratio
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    direction: Direction,
    factor: usize,
    /// Upsampling: one tap list per output phase, as (input offset, weight).
    /// Downsampling: a single list of (input offset, weight) around `m * factor`.
    phases: Vec<Vec<(isize, f32)>>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, VosError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(VosError::UnsupportedFormat(
                "sample rates must be greater than 0".to_string(),
            ));
        }

        let (direction, factor) = if to_rate >= from_rate && to_rate % from_rate == 0 {
            (Direction::Up, (to_rate / from_rate) as usize)
        } else if from_rate % to_rate == 0 {
            (Direction::Down, (from_rate / to_rate) as usize)
        } else {
            return Err(VosError::UnsupportedFormat(format!(
                "no integer ratio between {}Hz and {}Hz",
                from_rate, to_rate
            )));
        };

        Ok(Self::build(from_rate, direction, factor))
    }

    /// Resampler from `base_rate` up to `base_rate * factor`
    pub fn upsampler(base_rate: u32, factor: usize) -> Self {
        Self::build(base_rate, Direction::Up, factor.max(1))
    }

    /// Resampler from `base_rate * factor` down to `base_rate`
    pub fn downsampler(base_rate: u32, factor: usize) -> Self {
        let factor = factor.max(1);
        Self::build(base_rate * factor as u32, Direction::Down, factor)
    }

    fn build(from_rate: u32, direction: Direction, factor: usize) -> Self {
        let (to_rate, phases) = match direction {
            Direction::Up => (from_rate * factor as u32, interpolation_phases(factor)),
            Direction::Down => (from_rate / factor as u32, vec![decimation_taps(factor)]),
        };

        Self {
            from_rate,
            to_rate,
            direction,
            factor,
            phases,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Number of output samples produced for `input_len` input samples
    pub fn output_len(&self, input_len: usize) -> usize {
        match self.direction {
            Direction::Up => input_len * self.factor,
            Direction::Down => input_len / self.factor,
        }
    }

    /// Resample one block of samples.
    ///
    /// When downsampling, a trailing remainder shorter than the ratio is dropped;
    /// callers validate block sizes before getting here.
    pub fn process(&self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        let last = input.len() as isize - 1;
        let at = |i: isize| input[i.clamp(0, last) as usize] as f32;

        let mut output = Vec::with_capacity(self.output_len(input.len()));
        match self.direction {
            Direction::Up => {
                for m in 0..input.len() as isize {
                    for phase in &self.phases {
                        let acc: f32 = phase.iter().map(|&(off, w)| w * at(m + off)).sum();
                        output.push(to_i16(acc));
                    }
                }
            }
            Direction::Down => {
                let taps = &self.phases[0];
                for m in 0..self.output_len(input.len()) {
                    let center = (m * self.factor) as isize;
                    let acc: f32 = taps.iter().map(|&(off, w)| w * at(center + off)).sum();
                    output.push(to_i16(acc));
                }
            }
        }
        output
    }
}

fn to_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Blackman window evaluated at `k` in `[-half, half]`
fn blackman(k: isize, half: usize) -> f64 {
    if half == 0 {
        return 1.0;
    }
    let n = (k + half as isize) as f64;
    let len = (2 * half) as f64;
    0.42 - 0.5 * (2.0 * PI * n / len).cos() + 0.08 * (4.0 * PI * n / len).cos()
}

/// Split an L-times interpolation filter into L phases.
///
/// Output sample `m * L + p` is `sum(w * x[m + off])` over phase `p`.
/// Phase 0 reduces to the input sample itself.
fn interpolation_phases(factor: usize) -> Vec<Vec<(isize, f32)>> {
    let half = (HALF_SPAN * factor) as isize;
    let l = factor as isize;

    (0..l)
        .map(|p| {
            // Tap k contributes when (n - k) lands on an original sample: k = p - j*L
            let mut taps: Vec<(isize, f64)> = (-half..=half)
                .filter(|k| (p - k).rem_euclid(l) == 0)
                .map(|k| {
                    let offset = (p - k) / l;
                    let weight = sinc(k as f64 / l as f64) * blackman(k, half as usize);
                    (offset, weight)
                })
                .filter(|&(_, w)| w.abs() > 1e-9)
                .collect();
            normalize(&mut taps);
            taps.into_iter().map(|(o, w)| (o, w as f32)).collect()
        })
        .collect()
}

/// Low-pass taps for M-times decimation, centered on the kept sample
fn decimation_taps(factor: usize) -> Vec<(isize, f32)> {
    let half = (HALF_SPAN * factor) as isize;
    // Cutoff in cycles per input sample
    let cutoff = DECIMATION_CUTOFF * 0.5 / factor as f64;

    let mut taps: Vec<(isize, f64)> = (-half..=half)
        .map(|k| {
            let weight = 2.0 * cutoff * sinc(2.0 * cutoff * k as f64) * blackman(k, half as usize);
            (k, weight)
        })
        .collect();
    normalize(&mut taps);
    taps.into_iter().map(|(o, w)| (o, w as f32)).collect()
}

/// Scale taps to unity DC gain
fn normalize(taps: &mut [(isize, f64)]) {
    let sum: f64 = taps.iter().map(|&(_, w)| w).sum();
    if sum.abs() > f64::EPSILON {
        for (_, w) in taps.iter_mut() {
            *w /= sum;
        }
    }
}
