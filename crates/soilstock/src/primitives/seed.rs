//! Deterministic per-unit seed derivation.
//!
//! Every stochastic step (bootstrap replicates, fold assignment, bagging)
//! seeds its own RNG from the run seed plus a stable unit salt, so results
//! are identical across runs and across parallel/sequential execution.
//! Mixing uses the splitmix64 finalizer, which decorrelates consecutive
//! salts.

/// Derive a unit seed from the run seed and a stable salt.
pub fn derive(base: u64, salt: u64) -> u64 {
    let mut z = base ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Derive a salt from a textual unit identifier (FNV-1a).
pub fn salt_of(unit: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in unit.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
