//! Temporary contact key ratchet.
//!
//! A report authorization key (RAK) seeds a chain of temporary contact keys
//! (TCKs). Each TCK yields exactly one public temporary contact number (TCN)
//! and can be advanced exactly one step.
//!
//! ## KDF Chain
//!
//! ```text
//! tck_0     = derive_key("CovidWatch v1 tck-seed",    rak_secret)
//! tck_{i+1} = derive_key("CovidWatch v1 tck-ratchet", rvk || tck_i)
//! tcn_i     = derive_key("CovidWatch v1 tcn",         LE16(i) || tck_i)[..16]
//! ```
//!
//! `rvk` is the RAK's public key. Binding it into every step means a chain
//! replayed under any other key produces unrelated numbers. The KDF is
//! one-way, so neither earlier keys nor the RAK can be recovered from a TCK,
//! and no TCK can be recovered from a TCN.

use cwatch_crypto::blake3;
use cwatch_crypto::ed25519::SigningKey;
use cwatch_types::{TckBytes, Tcn, TCN_LEN};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::Result;

/// The private key from which every TCN and report of a user derives.
///
/// Never leaves the device and never appears in logs.
#[derive(Clone, Debug)]
pub struct ReportAuthorizationKey {
    signing_key: SigningKey,
}

impl ReportAuthorizationKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(),
        }
    }

    /// Restore a key from its secret bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    /// Restore a key from a secret of unchecked length.
    pub fn from_slice(secret: &[u8]) -> Result<Self> {
        Ok(Self {
            signing_key: SigningKey::from_slice(secret)?,
        })
    }

    /// Secret bytes, for the secret store only.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Public report verification key bytes.
    pub fn verification_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The first key of this RAK's chain, at index 0.
    pub fn initial_temporary_contact_key(&self) -> TemporaryContactKey {
        initial_key(self)
    }
}

/// A chained key at a given period index.
///
/// Carries the public verification key so that it can advance itself. It is
/// safe to persist outside the secret store: on its own it reveals nothing
/// about the RAK or earlier keys.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryContactKey {
    index: u16,
    #[serde_as(as = "serde_with::hex::Hex")]
    rvk: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    tck_bytes: TckBytes,
}

impl TemporaryContactKey {
    /// Reassemble a key from disclosed or persisted parts.
    pub fn from_parts(index: u16, rvk: [u8; 32], tck_bytes: TckBytes) -> Self {
        Self {
            index,
            rvk,
            tck_bytes,
        }
    }

    /// The period index of this key.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The report verification key this chain is bound to.
    pub fn rvk_bytes(&self) -> &[u8; 32] {
        &self.rvk
    }

    /// The chained key bytes.
    pub fn tck_bytes(&self) -> &TckBytes {
        &self.tck_bytes
    }

    /// Advance one step. See [`ratchet`].
    pub fn ratchet(&self) -> Option<TemporaryContactKey> {
        ratchet(self)
    }

    /// The public number for this key. See [`temporary_contact_number`].
    pub fn temporary_contact_number(&self) -> Tcn {
        temporary_contact_number(self)
    }
}

/// Derive the index-0 key of a RAK's chain.
pub fn initial_key(rak: &ReportAuthorizationKey) -> TemporaryContactKey {
    let tck_bytes = blake3::derive_key(blake3::contexts::TCK_SEED, &rak.to_bytes());
    TemporaryContactKey {
        index: 0,
        rvk: rak.verification_key_bytes(),
        tck_bytes,
    }
}

/// Advance a key by exactly one period.
///
/// Returns `None` when the index is already `u16::MAX`; the owner must mint a
/// new RAK or stop broadcasting.
pub fn ratchet(key: &TemporaryContactKey) -> Option<TemporaryContactKey> {
    let index = key.index.checked_add(1)?;
    let input = blake3::encode_multi_field(&[&key.rvk, &key.tck_bytes]);
    let tck_bytes = blake3::derive_key(blake3::contexts::TCK_RATCHET, &input);
    Some(TemporaryContactKey {
        index,
        rvk: key.rvk,
        tck_bytes,
    })
}

/// Derive the public temporary contact number of a key.
pub fn temporary_contact_number(key: &TemporaryContactKey) -> Tcn {
    let index_bytes = key.index.to_le_bytes();
    let input = blake3::encode_multi_field(&[&index_bytes, &key.tck_bytes]);
    let full = blake3::derive_key(blake3::contexts::TCN, &input);
    let mut tcn = [0u8; TCN_LEN];
    tcn.copy_from_slice(&full[..TCN_LEN]);
    tcn
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_rak() -> ReportAuthorizationKey {
        ReportAuthorizationKey::from_bytes(&[0x42u8; 32])
    }

    #[test]
    fn test_initial_key_deterministic() {
        let a = initial_key(&fixed_rak());
        let b = initial_key(&fixed_rak());
        assert_eq!(a, b);
        assert_eq!(a.index(), 0);
        assert_eq!(a.rvk_bytes(), &fixed_rak().verification_key_bytes());
    }

    #[test]
    fn test_different_raks_different_chains() {
        let a = initial_key(&ReportAuthorizationKey::from_bytes(&[1u8; 32]));
        let b = initial_key(&ReportAuthorizationKey::from_bytes(&[2u8; 32]));
        assert_ne!(a.tck_bytes(), b.tck_bytes());
        assert_ne!(a.temporary_contact_number(), b.temporary_contact_number());
    }

    #[test]
    fn test_ratchet_increments_index() {
        let k0 = initial_key(&fixed_rak());
        let k1 = ratchet(&k0).expect("ratchet");
        let k2 = k1.ratchet().expect("ratchet");
        assert_eq!(k1.index(), 1);
        assert_eq!(k2.index(), 2);
        assert_ne!(k0.tck_bytes(), k1.tck_bytes());
        assert_ne!(k1.tck_bytes(), k2.tck_bytes());
    }

    #[test]
    fn test_ratchet_exhausts_at_max_index() {
        let key = TemporaryContactKey::from_parts(u16::MAX, [0u8; 32], [9u8; 32]);
        assert!(ratchet(&key).is_none());

        let almost = TemporaryContactKey::from_parts(u16::MAX - 1, [0u8; 32], [9u8; 32]);
        let last = ratchet(&almost).expect("last step");
        assert_eq!(last.index(), u16::MAX);
    }

    #[test]
    fn test_ratchet_bound_to_verification_key() {
        let key_a = TemporaryContactKey::from_parts(5, [1u8; 32], [7u8; 32]);
        let key_b = TemporaryContactKey::from_parts(5, [2u8; 32], [7u8; 32]);
        // Same TCK, so same number at this index...
        assert_eq!(
            key_a.temporary_contact_number(),
            key_b.temporary_contact_number()
        );
        // ...but the chains diverge after one step.
        let next_a = key_a.ratchet().expect("ratchet");
        let next_b = key_b.ratchet().expect("ratchet");
        assert_ne!(
            next_a.temporary_contact_number(),
            next_b.temporary_contact_number()
        );
    }

    #[test]
    fn test_tcn_depends_on_index() {
        let a = TemporaryContactKey::from_parts(1, [0u8; 32], [3u8; 32]);
        let b = TemporaryContactKey::from_parts(2, [0u8; 32], [3u8; 32]);
        assert_ne!(a.temporary_contact_number(), b.temporary_contact_number());
    }

    #[test]
    fn test_tcns_unique_over_many_steps() {
        let mut key = initial_key(&fixed_rak());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2_000 {
            assert!(seen.insert(key.temporary_contact_number()));
            key = key.ratchet().expect("ratchet");
        }
    }

    #[test]
    fn test_tcn_does_not_reveal_key_material() {
        // Exhaustive small-domain check: no TCN equals a prefix of any key
        // material in its own chain or of the RAK secret.
        let rak = fixed_rak();
        let secret = rak.to_bytes();
        let mut key = initial_key(&rak);
        for _ in 0..256 {
            let tcn = key.temporary_contact_number();
            assert_ne!(&tcn[..], &key.tck_bytes()[..16]);
            assert_ne!(&tcn[..], &secret[..16]);
            assert_ne!(&tcn[..], &key.rvk_bytes()[..16]);
            let next = key.ratchet().expect("ratchet");
            assert_ne!(&tcn[..], &next.tck_bytes()[..16]);
            key = next;
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let key = initial_key(&fixed_rak()).ratchet().expect("ratchet");
        let json = serde_json::to_string(&key).expect("serialize");
        let restored: TemporaryContactKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(key, restored);
        assert_eq!(
            key.temporary_contact_number(),
            restored.temporary_contact_number()
        );
    }
}
