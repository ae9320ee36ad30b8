//! Observation query functions.

use cwatch_types::contact::ContactObservation;
use cwatch_types::{Tcn, UnixMillis};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{blob_array, Result};

/// Identifiers bound per `UPDATE ... IN (...)` statement.
pub const MARK_BATCH_SIZE: usize = 500;

const COLUMNS: &str = "tcn, last_seen, closest_distance, was_potentially_infectious";

/// Insert or update an observation, keeping the closest distance as a
/// running minimum.
pub fn upsert(
    conn: &Connection,
    tcn: &Tcn,
    last_seen: UnixMillis,
    closest_distance: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO observations (tcn, last_seen, closest_distance)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(tcn) DO UPDATE SET
             last_seen = excluded.last_seen,
             closest_distance = MIN(closest_distance, excluded.closest_distance)",
        rusqlite::params![tcn.as_slice(), last_seen as i64, closest_distance],
    )?;
    Ok(())
}

/// Get an observation by identifier.
pub fn get(conn: &Connection, tcn: &Tcn) -> Result<Option<ContactObservation>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM observations WHERE tcn = ?1"),
            [tcn.as_slice()],
            ObservationRow::from_row,
        )
        .optional()?;
    row.map(ObservationRow::into_observation).transpose()
}

/// Flag every observation whose identifier is in `tcns`.
///
/// Returns how many rows changed from unflagged to flagged.
pub fn mark_potentially_infectious(conn: &Connection, tcns: &[Tcn]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut newly_flagged = 0;
    for batch in tcns.chunks(MARK_BATCH_SIZE) {
        let placeholders = vec!["?"; batch.len()].join(",");
        let sql = format!(
            "UPDATE observations SET was_potentially_infectious = 1
             WHERE was_potentially_infectious = 0 AND tcn IN ({placeholders})"
        );
        let mut stmt = tx.prepare_cached(&sql)?;
        newly_flagged += stmt.execute(rusqlite::params_from_iter(
            batch.iter().map(|tcn| tcn.as_slice()),
        ))?;
    }
    tx.commit()?;
    Ok(newly_flagged)
}

/// The most recently seen flagged observation.
pub fn most_recent_exposure(conn: &Connection) -> Result<Option<ContactObservation>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM observations
                 WHERE was_potentially_infectious = 1
                 ORDER BY last_seen DESC LIMIT 1"
            ),
            [],
            ObservationRow::from_row,
        )
        .optional()?;
    row.map(ObservationRow::into_observation).transpose()
}

/// Number of stored observations.
pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Number of flagged observations.
pub fn count_flagged(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM observations WHERE was_potentially_infectious = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Delete unflagged observations last seen before `cutoff`.
pub fn prune_before(conn: &Connection, cutoff: UnixMillis) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM observations WHERE was_potentially_infectious = 0 AND last_seen < ?1",
        [cutoff as i64],
    )?)
}

/// A raw observation row from the database.
#[derive(Debug)]
struct ObservationRow {
    tcn: Vec<u8>,
    last_seen: i64,
    closest_distance: f64,
    was_potentially_infectious: bool,
}

impl ObservationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tcn: row.get(0)?,
            last_seen: row.get(1)?,
            closest_distance: row.get(2)?,
            was_potentially_infectious: row.get(3)?,
        })
    }

    fn into_observation(self) -> Result<ContactObservation> {
        Ok(ContactObservation {
            identifier: blob_array(self.tcn, "observation tcn")?,
            last_seen: self.last_seen as u64,
            closest_estimated_distance_meters: self.closest_distance,
            was_potentially_infectious: self.was_potentially_infectious,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn id(n: u8) -> Tcn {
        [n; 16]
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = test_db();
        upsert(&conn, &id(1), 1_000, 3.0).expect("insert");
        upsert(&conn, &id(1), 2_000, 5.0).expect("farther");
        upsert(&conn, &id(1), 3_000, 1.0).expect("closer");

        let obs = get(&conn, &id(1)).expect("get").expect("present");
        assert_eq!(obs.identifier, id(1));
        assert_eq!(obs.last_seen, 3_000);
        assert_eq!(obs.closest_estimated_distance_meters, 1.0);
        assert!(!obs.was_potentially_infectious);
        assert!(get(&conn, &id(2)).expect("get").is_none());
    }

    #[test]
    fn test_mark_counts_newly_flagged_only() {
        let conn = test_db();
        for n in 0..10 {
            upsert(&conn, &id(n), u64::from(n), 2.0).expect("insert");
        }
        let disclosed = [id(2), id(4), id(4), id(200)];
        assert_eq!(mark_potentially_infectious(&conn, &disclosed).expect("mark"), 2);
        assert_eq!(mark_potentially_infectious(&conn, &disclosed).expect("again"), 0);
        assert_eq!(count_flagged(&conn).expect("count"), 2);
    }

    #[test]
    fn test_mark_spans_batches() {
        let conn = test_db();
        let ids: Vec<Tcn> = (0..(MARK_BATCH_SIZE as u32 * 2 + 17))
            .map(|n| {
                let mut tcn = [0u8; 16];
                tcn[..4].copy_from_slice(&n.to_le_bytes());
                tcn
            })
            .collect();
        for (i, tcn) in ids.iter().enumerate().step_by(3) {
            upsert(&conn, tcn, i as u64, 1.0).expect("insert");
        }
        let stored = ids.iter().step_by(3).count();
        assert_eq!(
            mark_potentially_infectious(&conn, &ids).expect("mark"),
            stored
        );
    }

    #[test]
    fn test_flag_survives_upsert() {
        let conn = test_db();
        upsert(&conn, &id(1), 1, 2.0).expect("insert");
        mark_potentially_infectious(&conn, &[id(1)]).expect("mark");
        upsert(&conn, &id(1), 2, 2.0).expect("update");
        assert!(get(&conn, &id(1)).expect("get").expect("obs").was_potentially_infectious);
    }

    #[test]
    fn test_most_recent_exposure() {
        let conn = test_db();
        assert!(most_recent_exposure(&conn).expect("empty").is_none());
        upsert(&conn, &id(1), 500, 2.0).expect("a");
        upsert(&conn, &id(2), 900, 2.0).expect("b");
        upsert(&conn, &id(3), 700, 2.0).expect("c");
        mark_potentially_infectious(&conn, &[id(1), id(3)]).expect("mark");
        let latest = most_recent_exposure(&conn).expect("query").expect("some");
        assert_eq!(latest.identifier, id(3));
        assert_eq!(latest.last_seen, 700);
    }

    #[test]
    fn test_prune_keeps_flagged() {
        let conn = test_db();
        upsert(&conn, &id(1), 100, 2.0).expect("old");
        upsert(&conn, &id(2), 100, 2.0).expect("old flagged");
        upsert(&conn, &id(3), 5_000, 2.0).expect("new");
        mark_potentially_infectious(&conn, &[id(2)]).expect("mark");
        assert_eq!(prune_before(&conn, 1_000).expect("prune"), 1);
        assert_eq!(count(&conn).expect("count"), 2);
    }
}
