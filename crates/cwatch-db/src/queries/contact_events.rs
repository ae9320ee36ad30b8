//! Recorded contact query functions.

use cwatch_types::contact::ContactEvent;
use cwatch_types::UnixMillis;
use rusqlite::Connection;

use crate::{blob_array, Result};

/// Insert a recorded contact.
pub fn insert(conn: &Connection, event: &ContactEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO contact_events (tcn, average_distance, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            event.identifier.as_slice(),
            event.average_distance,
            event.start_time as i64,
            event.end_time as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Contacts that ended at or after `since`, newest first.
pub fn list_since(conn: &Connection, since: UnixMillis) -> Result<Vec<ContactEvent>> {
    let mut stmt = conn.prepare(
        "SELECT tcn, average_distance, start_time, end_time
         FROM contact_events WHERE end_time >= ?1 ORDER BY end_time DESC",
    )?;

    let rows = stmt
        .query_map([since as i64], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(tcn, average_distance, start, end)| {
            Ok(ContactEvent {
                identifier: blob_array(tcn, "contact tcn")?,
                average_distance,
                start_time: start as u64,
                end_time: end as u64,
            })
        })
        .collect()
}

/// Number of recorded contacts.
pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM contact_events", [], |row| row.get(0))?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u8, end_time: u64) -> ContactEvent {
        ContactEvent {
            identifier: [n; 16],
            average_distance: 1.5,
            start_time: end_time - 61_000,
            end_time,
        }
    }

    #[test]
    fn test_insert_and_list() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &event(1, 100_000)).expect("a");
        insert(&conn, &event(2, 300_000)).expect("b");
        insert(&conn, &event(3, 200_000)).expect("c");

        let all = list_since(&conn, 0).expect("list");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], event(2, 300_000));

        let recent = list_since(&conn, 150_000).expect("list");
        assert_eq!(recent.len(), 2);
        assert_eq!(count(&conn).expect("count"), 3);
    }

    #[test]
    fn test_same_identifier_may_record_twice() {
        let conn = crate::open_memory().expect("open");
        insert(&conn, &event(1, 100_000)).expect("first episode");
        insert(&conn, &event(1, 400_000)).expect("second episode");
        assert_eq!(count(&conn).expect("count"), 2);
    }
}
