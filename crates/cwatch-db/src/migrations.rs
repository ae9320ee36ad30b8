//! Forward-only schema migrations.
//!
//! Each step runs in its own transaction together with the `user_version`
//! bump, so a crash mid-upgrade leaves the database at the last complete
//! version.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// One schema step: the version it produces and the SQL that gets there.
struct Step {
    version: u32,
    sql: &'static str,
    seed: fn(&Connection) -> Result<()>,
}

const STEPS: &[Step] = &[Step {
    version: 1,
    sql: schema::SCHEMA_V1,
    seed: seed_v1,
}];

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let current = user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database is at v{current}, this build only knows v{SCHEMA_VERSION}"
        )));
    }

    for step in STEPS.iter().filter(|s| s.version > current) {
        tracing::info!(version = step.version, "Applying schema step");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(step.sql)?;
        (step.seed)(&tx)?;
        tx.pragma_update(None, "user_version", step.version)?;
        tx.commit()?;
    }
    Ok(())
}

/// Settings every fresh database starts with.
fn seed_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO settings (key, value) VALUES ('user_reported_sick', 'false')",
        [],
    )?;
    Ok(())
}
