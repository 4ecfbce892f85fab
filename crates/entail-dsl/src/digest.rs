//! Stable identity digests for programs and iteration fingerprints.
//!
//! The loop needs a cheap, deterministic way to say "this iteration looks
//! exactly like that one". We use FNV-1a 64-bit over a canonical textual
//! rendering:
//!
//! - algorithm: **FNV-1a 64-bit**
//! - output: `"fnv1a64:<16 lowercase hex digits>"`
//!
//! This is a stability/identity tool, not a security primitive; fingerprint
//! inputs come from our own canonical renderings, not from attacker-chosen
//! bytes.

/// Prefix used in serialized digests.
pub const DIGEST_V1_PREFIX: &str = "fnv1a64:";

/// Compute a v1 digest (FNV-1a 64-bit) over arbitrary bytes.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("{DIGEST_V1_PREFIX}{hash:016x}")
}
