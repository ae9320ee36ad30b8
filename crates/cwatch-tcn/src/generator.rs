//! Broadcast key state.
//!
//! The current temporary contact key is the one piece of process-wide mutable
//! protocol state. Reading it for broadcast and ratcheting it happen under one
//! lock, so no number is ever skipped or handed out twice.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use cwatch_types::{identifier_string, Tcn, MAX_ADVERTISED_TCNS};
use tracing::{debug, warn};

use crate::ratchet::{initial_key, ReportAuthorizationKey, TemporaryContactKey};
use crate::{Result, TcnError};

struct GeneratorState {
    key: TemporaryContactKey,
    /// Set after the number of the `u16::MAX` key has been handed out.
    exhausted: bool,
    advertised: VecDeque<Tcn>,
    advertised_set: HashSet<Tcn>,
    capacity: usize,
}

impl GeneratorState {
    fn remember(&mut self, tcn: Tcn) {
        if self.advertised_set.insert(tcn) {
            self.advertised.push_back(tcn);
        }
        while self.advertised.len() > self.capacity {
            if let Some(oldest) = self.advertised.pop_front() {
                self.advertised_set.remove(&oldest);
            }
        }
    }
}

/// Hands out the number to broadcast and remembers recently broadcast ones.
pub struct TcnGenerator {
    state: Mutex<GeneratorState>,
}

impl TcnGenerator {
    /// Start from a persisted key, or from the RAK's initial key.
    pub fn new(rak: &ReportAuthorizationKey, persisted: Option<TemporaryContactKey>) -> Self {
        Self::with_capacity(rak, persisted, MAX_ADVERTISED_TCNS)
    }

    /// Like [`TcnGenerator::new`] with a custom ring buffer capacity.
    pub fn with_capacity(
        rak: &ReportAuthorizationKey,
        persisted: Option<TemporaryContactKey>,
        capacity: usize,
    ) -> Self {
        let rvk = rak.verification_key_bytes();
        let key = match persisted {
            Some(key) if key.rvk_bytes() == &rvk => key,
            Some(_) => {
                warn!("Persisted temporary contact key belongs to another RAK, restarting chain");
                initial_key(rak)
            }
            None => initial_key(rak),
        };
        Self {
            state: Mutex::new(GeneratorState {
                key,
                exhausted: false,
                advertised: VecDeque::new(),
                advertised_set: HashSet::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, GeneratorState>> {
        self.state.lock().map_err(|_| TcnError::StatePoisoned)
    }

    /// Return the number to broadcast now and ratchet the key.
    ///
    /// # Errors
    ///
    /// Returns [`TcnError::RatchetExhausted`] once every index of the current
    /// RAK has been used; call [`TcnGenerator::rekey`] to continue.
    pub fn next_tcn(&self) -> Result<Tcn> {
        let mut state = self.lock()?;
        if state.exhausted {
            return Err(TcnError::RatchetExhausted {
                index: state.key.index(),
            });
        }

        let tcn = state.key.temporary_contact_number();
        match state.key.ratchet() {
            Some(next) => state.key = next,
            None => {
                warn!(index = state.key.index(), "Temporary contact key ratchet exhausted");
                state.exhausted = true;
            }
        }
        state.remember(tcn);

        debug!(
            tcn = %identifier_string(&tcn),
            next_index = state.key.index(),
            "Issued temporary contact number"
        );
        Ok(tcn)
    }

    /// Restart the chain from a new RAK. Recently broadcast numbers are kept.
    pub fn rekey(&self, rak: &ReportAuthorizationKey) -> Result<()> {
        let mut state = self.lock()?;
        state.key = initial_key(rak);
        state.exhausted = false;
        Ok(())
    }

    /// The key whose number will be broadcast next, for persistence.
    pub fn current_key(&self) -> Result<TemporaryContactKey> {
        Ok(self.lock()?.key.clone())
    }

    /// Index of the key whose number will be broadcast next.
    pub fn current_index(&self) -> Result<u16> {
        Ok(self.lock()?.key.index())
    }

    /// Whether `tcn` is one of our own recently broadcast numbers.
    pub fn is_own(&self, tcn: &Tcn) -> Result<bool> {
        Ok(self.lock()?.advertised_set.contains(tcn))
    }

    /// Number of remembered broadcast numbers.
    pub fn advertised_len(&self) -> Result<usize> {
        Ok(self.lock()?.advertised.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rak() -> ReportAuthorizationKey {
        ReportAuthorizationKey::from_bytes(&[3u8; 32])
    }

    #[test]
    fn test_next_tcn_follows_chain() {
        let rak = rak();
        let generator = TcnGenerator::new(&rak, None);
        let mut key = initial_key(&rak);
        for _ in 0..5 {
            assert_eq!(
                generator.next_tcn().expect("tcn"),
                key.temporary_contact_number()
            );
            key = key.ratchet().expect("ratchet");
        }
        assert_eq!(generator.current_index().expect("index"), 5);
    }

    #[test]
    fn test_resumes_from_persisted_key() {
        let rak = rak();
        let persisted = initial_key(&rak).ratchet().expect("ratchet");
        let expected = persisted.temporary_contact_number();
        let generator = TcnGenerator::new(&rak, Some(persisted));
        assert_eq!(generator.next_tcn().expect("tcn"), expected);
    }

    #[test]
    fn test_foreign_persisted_key_ignored() {
        let rak = rak();
        let other = ReportAuthorizationKey::from_bytes(&[4u8; 32]);
        let generator = TcnGenerator::new(&rak, Some(initial_key(&other)));
        assert_eq!(
            generator.next_tcn().expect("tcn"),
            initial_key(&rak).temporary_contact_number()
        );
    }

    #[test]
    fn test_exhaustion_is_reported_not_stale() {
        let rak = rak();
        let last = TemporaryContactKey::from_parts(
            u16::MAX,
            rak.verification_key_bytes(),
            [1u8; 32],
        );
        let generator = TcnGenerator::new(&rak, Some(last.clone()));
        assert_eq!(
            generator.next_tcn().expect("last number"),
            last.temporary_contact_number()
        );
        assert!(matches!(
            generator.next_tcn(),
            Err(TcnError::RatchetExhausted { index: u16::MAX })
        ));

        let fresh = ReportAuthorizationKey::from_bytes(&[8u8; 32]);
        generator.rekey(&fresh).expect("rekey");
        assert_eq!(
            generator.next_tcn().expect("after rekey"),
            initial_key(&fresh).temporary_contact_number()
        );
    }

    #[test]
    fn test_self_observation_ring_buffer_evicts_oldest() {
        let generator = TcnGenerator::with_capacity(&rak(), None, 3);
        let issued: Vec<Tcn> = (0..5)
            .map(|_| generator.next_tcn().expect("tcn"))
            .collect();
        assert_eq!(generator.advertised_len().expect("len"), 3);
        assert!(!generator.is_own(&issued[0]).expect("own"));
        assert!(!generator.is_own(&issued[1]).expect("own"));
        for tcn in &issued[2..] {
            assert!(generator.is_own(tcn).expect("own"));
        }
        assert!(!generator.is_own(&[0u8; 16]).expect("own"));
    }

    #[test]
    fn test_concurrent_callers_never_share_a_number() {
        use std::sync::Arc;

        let generator = Arc::new(TcnGenerator::new(&rak(), None));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| generator.next_tcn().expect("tcn"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for tcn in handle.join().expect("thread") {
                assert!(all.insert(tcn));
            }
        }
        assert_eq!(all.len(), 200);
        assert_eq!(generator.current_index().expect("index"), 200);
    }
}
