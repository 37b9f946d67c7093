//! Random helpers for the simulation
//!
//! All randomness flows through a single `StdRng` stored in the shared lab
//! state, so a fixed seed replays the same pod names, jitter and telemetry.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Build the simulation RNG from an optional seed
pub fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Kubernetes-style random name suffix
pub fn name_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect()
}

/// ReplicaSet-style hash segment used in pod names
pub fn template_hash<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:08x}", rng.gen::<u32>())
}

/// Pod IP inside the node's pod CIDR (10.244.<node>.0/24)
pub fn pod_ip<R: Rng + ?Sized>(rng: &mut R, node_index: usize) -> String {
    format!("10.244.{}.{}", node_index + 1, rng.gen_range(2..=254))
}

/// Uniform value in `[-spread, spread]`
pub fn jitter<R: Rng + ?Sized>(rng: &mut R, spread: f64) -> f64 {
    if spread <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-spread..=spread)
}
