//! Stable content hashing for identifiers.
//!
//! All derived identifiers (intentions, procedures, traces, summary entries)
//! use 32-bit FNV-1a rendered as eight lowercase hex characters. The output
//! must be identical across runs and platforms, so no `std::hash` machinery
//! is involved.

/// 32-bit FNV-1a offset basis.
const FNV_OFFSET: u32 = 0x811c_9dc5;
/// 32-bit FNV prime.
const FNV_PRIME: u32 = 0x0100_0193;

/// Hash `input` with 32-bit FNV-1a and render as 8 hex characters.
pub fn fnv1a(input: &str) -> String {
    format!("{:08x}", fnv1a_u32(input))
}

/// Raw 32-bit FNV-1a over the UTF-8 bytes of `input`.
pub fn fnv1a_u32(input: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 64-bit FNV-1a, used where a wider value is needed (embedding seeds).
pub fn fnv1a_u64(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
