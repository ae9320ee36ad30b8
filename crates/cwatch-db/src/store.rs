//! [`ContactStore`] backed by SQLite.

use cwatch_types::contact::{ContactEvent, ContactObservation};
use cwatch_types::now_millis;
use cwatch_types::report::SignedReport;
use cwatch_types::store::{ContactStore, StoreError, StoreResult};
use cwatch_types::{Tcn, UnixMillis};
use rusqlite::Connection;

use crate::queries::{contact_events, observations, signed_reports};
use crate::DbError;

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => StoreError::NotFound(what),
            other => {
                let retryable = other.is_retryable();
                StoreError::backend(other.to_string(), retryable)
            }
        }
    }
}

/// Owns the daemon's database connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> crate::Result<Self> {
        Ok(Self::new(crate::open_memory()?))
    }

    /// The underlying connection, for queries outside the store interface.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl ContactStore for SqliteStore {
    fn persist_contact_event(&mut self, event: &ContactEvent) -> StoreResult<()> {
        contact_events::insert(&self.conn, event)?;
        Ok(())
    }

    fn upsert_observation(
        &mut self,
        identifier: &Tcn,
        last_seen: UnixMillis,
        closest_distance: f64,
    ) -> StoreResult<()> {
        Ok(observations::upsert(
            &self.conn,
            identifier,
            last_seen,
            closest_distance,
        )?)
    }

    fn observation(&self, identifier: &Tcn) -> StoreResult<Option<ContactObservation>> {
        Ok(observations::get(&self.conn, identifier)?)
    }

    fn mark_potentially_infectious(&mut self, identifiers: &[Tcn]) -> StoreResult<usize> {
        Ok(observations::mark_potentially_infectious(
            &self.conn,
            identifiers,
        )?)
    }

    fn enqueue_signed_report_for_upload(&mut self, report: &SignedReport) -> StoreResult<()> {
        Ok(signed_reports::insert_local(&self.conn, report, now_millis())?)
    }

    fn most_recent_exposure(&self) -> StoreResult<Option<ContactObservation>> {
        Ok(observations::most_recent_exposure(&self.conn)?)
    }

    fn save_received_report(&mut self, report: &SignedReport) -> StoreResult<bool> {
        Ok(signed_reports::insert_received(
            &self.conn,
            report,
            now_millis(),
        )?)
    }

    fn is_report_processed(&self, signature: &[u8; 64]) -> StoreResult<bool> {
        Ok(signed_reports::is_processed(&self.conn, signature)?)
    }

    fn mark_report_processed(&mut self, signature: &[u8; 64]) -> StoreResult<()> {
        Ok(signed_reports::mark_processed(&self.conn, signature)?)
    }
}
