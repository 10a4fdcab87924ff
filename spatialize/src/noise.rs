//! Deterministic periodic noise
//!
//! A cheap stand-in for Perlin noise built from sums of `sin·cos` products.
//! The output range is **[-1, 1]** for every input, the function is pure, and
//! all trig arguments are reduced modulo 2π in f64 so huge coordinates neither
//! lose precision nor escape the bound.

use std::f64::consts::TAU;

use crate::model::Vec3;

/// Smallest frequency used when the caller passes zero or a non-finite value
pub const MIN_FREQUENCY: f32 = 1e-6;

/// SplitMix64 finalizer, used to expand seeds into phases and multipliers
pub(crate) fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Map 64 random bits to [0, 1)
fn unit_interval(bits: u64) -> f64 {
    (bits >> 11) as f64 / (1u64 << 53) as f64
}

/// Per-seed phases and axis multipliers
struct SeedTerms {
    phase: [f64; 3],
    mult: [f64; 6],
}

impl SeedTerms {
    fn from_seed(seed: u64) -> Self {
        let mut state = seed;
        let mut next = || {
            state = mix64(state);
            unit_interval(state)
        };

        let phase = [next() * TAU, next() * TAU, next() * TAU];
        let mut mult = [0.0; 6];
        for m in &mut mult {
            *m = 0.75 + 0.5 * next();
        }
        Self { phase, mult }
    }
}

fn wrapped(a: f64) -> f64 {
    a.rem_euclid(TAU)
}

fn finite_or_zero(v: f32) -> f64 {
    if v.is_finite() { v as f64 } else { 0.0 }
}

/// Clamp a frequency to a usable positive value
pub fn sanitize_frequency(frequency: f32) -> f32 {
    if frequency.is_finite() && frequency.abs() >= MIN_FREQUENCY {
        frequency.abs()
    } else {
        MIN_FREQUENCY
    }
}

/// Sample the noise field at `(x, y, z)` scaled by `frequency`.
///
/// Returns a value in [-1, 1]. Non-finite coordinates are treated as zero.
pub fn noise(seed: u64, x: f32, y: f32, z: f32, frequency: f32) -> f32 {
    let f = sanitize_frequency(frequency) as f64;
    let t = SeedTerms::from_seed(seed);

    let x = finite_or_zero(x) * f;
    let y = finite_or_zero(y) * f;
    let z = finite_or_zero(z) * f;

    let a = wrapped(x * t.mult[0] + t.phase[0]).sin() * wrapped(y * t.mult[1] + t.phase[1]).cos();
    let b = wrapped(y * t.mult[2] + t.phase[1]).sin() * wrapped(z * t.mult[3] + t.phase[2]).cos();
    let c = wrapped(z * t.mult[4] + t.phase[2]).sin() * wrapped(x * t.mult[5] + t.phase[0]).cos();

    (((a + b + c) / 3.0).clamp(-1.0, 1.0)) as f32
}

/// Sample the noise field at a point
pub fn noise_at(seed: u64, p: Vec3, frequency: f32) -> f32 {
    noise(seed, p.x, p.y, p.z, frequency)
}

/// Three decorrelated noise samples (seeds `seed`, `seed+1`, `seed+2`)
pub fn noise_vec3(seed: u64, p: Vec3, frequency: f32) -> Vec3 {
    Vec3::new(
        noise_at(seed, p, frequency),
        noise_at(seed.wrapping_add(1), p, frequency),
        noise_at(seed.wrapping_add(2), p, frequency),
    )
}

/// Multi-octave noise: frequencies f, 2f, 4f… with amplitudes 1, ½, ¼…
///
/// Normalized by the amplitude sum, so the range stays [-1, 1].
pub fn fbm(seed: u64, p: Vec3, frequency: f32, octaves: u32) -> f32 {
    let octaves = octaves.clamp(1, 8);
    let base = sanitize_frequency(frequency);

    let mut sum = 0.0;
    let mut norm = 0.0;
    let mut amplitude = 1.0;
    let mut freq = base;
    for octave in 0..octaves {
        sum += amplitude * noise_at(seed.wrapping_add(octave as u64 * 7919), p, freq);
        norm += amplitude;
        amplitude *= 0.5;
        freq *= 2.0;
    }
    (sum / norm).clamp(-1.0, 1.0)
}
