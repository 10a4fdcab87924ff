//! Keyed randomness
//!
//! Every random draw in the crate comes from an RNG seeded by a pass seed and
//! an entity identifier, so re-running a pass on the same input reproduces the
//! same output regardless of leaf order or thread scheduling.

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::Vec3;
use crate::noise::mix64;

/// FNV-1a hash of an identifier (stable across platforms and releases)
pub fn hash_key(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

/// RNG for one entity within one pass
pub fn keyed_rng(seed: u64, key: &str) -> StdRng {
    StdRng::seed_from_u64(mix64(seed ^ hash_key(key)))
}

/// Uniformly distributed unit vector
pub fn unit_direction<R: Rng>(rng: &mut R) -> Vec3 {
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let theta: f32 = rng.gen_range(0.0..TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * theta.cos(), r * theta.sin(), z)
}

/// Point in the shell `inner ≤ |p| ≤ outer`, uniform in volume-weighted radius
pub fn point_in_shell<R: Rng>(rng: &mut R, inner: f32, outer: f32) -> Vec3 {
    let direction = unit_direction(rng);
    let u: f32 = rng.r#gen();
    let distance = (inner * inner + (outer * outer - inner * inner) * u).sqrt();
    direction * distance
}
