use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Seeded RNG used everywhere randomness is needed.
/// A seed of 0 draws the seed from the OS instead.
pub fn create_rng(seed: u64) -> SmallRng {
    if seed == 0 {
        SmallRng::from_entropy()
    } else {
        SmallRng::seed_from_u64(seed)
    }
}
