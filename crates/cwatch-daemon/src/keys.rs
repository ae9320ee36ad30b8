//! Report authorization key storage and broadcast number pacing.
//!
//! The RAK secret lives in `$data_dir/rak.key` (mode 0600). The current
//! temporary contact key is not secret and is kept in the `settings` table by
//! the caller.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use cwatch_tcn::generator::TcnGenerator;
use cwatch_tcn::ratchet::{ReportAuthorizationKey, TemporaryContactKey};
use cwatch_tcn::report::create_signed_report;
use cwatch_tcn::window::DisclosureWindow;
use cwatch_tcn::TcnError;
use cwatch_types::report::{MemoType, SignedReport};
use cwatch_types::{Tcn, UnixMillis};
use tracing::{info, warn};

/// File name of the RAK secret inside the data directory.
pub const RAK_FILE: &str = "rak.key";

/// Settings key holding the JSON-encoded current temporary contact key.
pub const CURRENT_TCK_SETTING: &str = "current_tck";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tcn(#[from] TcnError),

    #[error("key state poisoned")]
    Poisoned,
}

type Result<T> = std::result::Result<T, KeyError>;

struct Broadcast {
    tcn: Tcn,
    issued_at: UnixMillis,
}

/// Owns the RAK and the broadcast chain.
pub struct KeyManager {
    rak: RwLock<ReportAuthorizationKey>,
    generator: TcnGenerator,
    current: Mutex<Option<Broadcast>>,
    rak_path: PathBuf,
}

impl KeyManager {
    /// Load the RAK from `data_dir`, creating one on first run.
    pub fn load_or_create(data_dir: &Path, persisted: Option<TemporaryContactKey>) -> Result<Self> {
        let rak_path = data_dir.join(RAK_FILE);
        let rak = if rak_path.exists() {
            let bytes = std::fs::read(&rak_path)?;
            ReportAuthorizationKey::from_slice(&bytes)?
        } else {
            info!("Creating report authorization key");
            let rak = ReportAuthorizationKey::generate();
            write_secret(&rak_path, &rak.to_bytes())?;
            rak
        };
        Ok(Self {
            generator: TcnGenerator::new(&rak, persisted),
            rak: RwLock::new(rak),
            current: Mutex::new(None),
            rak_path,
        })
    }

    /// The number to broadcast at `now`.
    ///
    /// Repeats the same number until `rotation_millis` have passed since it
    /// was first handed out, then advances the chain. When the chain is
    /// exhausted a new RAK is created and the chain restarts.
    ///
    /// Returns the number and whether it is new.
    pub fn identifier_to_broadcast(&self, now: UnixMillis, rotation_millis: u64) -> Result<(Tcn, bool)> {
        let mut current = self.current.lock().map_err(|_| KeyError::Poisoned)?;
        if let Some(b) = current.as_ref() {
            if now.saturating_sub(b.issued_at) < rotation_millis {
                return Ok((b.tcn, false));
            }
        }
        let tcn = self.next_tcn()?;
        *current = Some(Broadcast { tcn, issued_at: now });
        Ok((tcn, true))
    }

    fn next_tcn(&self) -> Result<Tcn> {
        match self.generator.next_tcn() {
            Err(TcnError::RatchetExhausted { index }) => {
                warn!(index, "Ratchet exhausted, rotating report authorization key");
                self.rotate_rak()?;
                Ok(self.generator.next_tcn()?)
            }
            other => Ok(other?),
        }
    }

    fn rotate_rak(&self) -> Result<()> {
        let fresh = ReportAuthorizationKey::generate();
        write_secret(&self.rak_path, &fresh.to_bytes())?;
        self.generator.rekey(&fresh)?;
        *self.rak.write().map_err(|_| KeyError::Poisoned)? = fresh;
        Ok(())
    }

    /// Whether `tcn` is one of our own recent broadcasts.
    pub fn is_own(&self, tcn: &Tcn) -> Result<bool> {
        Ok(self.generator.is_own(tcn)?)
    }

    /// The key to persist after a new number was issued.
    pub fn current_key(&self) -> Result<TemporaryContactKey> {
        Ok(self.generator.current_key()?)
    }

    /// Index of the most recently broadcast number.
    pub fn last_broadcast_index(&self) -> Result<u16> {
        Ok(self.generator.current_index()?.saturating_sub(1))
    }

    /// Sign a report covering the disclosure window that ends at the most
    /// recently broadcast number.
    pub fn create_report(
        &self,
        window: &DisclosureWindow,
        memo_type: MemoType,
        memo_data: &[u8],
    ) -> Result<SignedReport> {
        let (start, end) = window.bounds(self.last_broadcast_index()?);
        let rak = self.rak.read().map_err(|_| KeyError::Poisoned)?;
        Ok(create_signed_report(&rak, memo_type, memo_data, start, end)?)
    }
}

/// Write a secret file readable only by the owner, replacing any old one.
fn write_secret(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
}
