//! Domain-separated BLAKE3 derivation.
//!
//! Every chained or broadcast value in the protocol comes out of BLAKE3's
//! key-derivation mode under its own context string, so a temporary contact
//! key can never collide with the number derived from it.
//!
//! ## Context Strings
//!
//! The registered context strings are available as constants. Deriving under
//! an unregistered context is a protocol violation.

/// Registered BLAKE3 context strings.
pub mod contexts {
    /// Seed of the temporary contact key chain, keyed by the RAK secret.
    pub const TCK_SEED: &str = "CovidWatch v1 tck-seed";
    /// One ratchet step: `rvk || tck_i -> tck_{i+1}`.
    pub const TCK_RATCHET: &str = "CovidWatch v1 tck-ratchet";
    /// Public number: `LE16(i) || tck_i -> tcn_i`.
    pub const TCN: &str = "CovidWatch v1 tcn";

    /// All registered context strings, checked by [`super::derive_key`].
    pub const ALL_CONTEXTS: &[&str] = &[TCK_SEED, TCK_RATCHET, TCN];
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "CovidWatch v1 ")
/// * `key_material` - The input key material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    debug_assert!(
        is_registered_context(context),
        "unregistered derivation context {context:?}"
    );
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    let hash = hasher.finalize();
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Verify that a context string is registered.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}
