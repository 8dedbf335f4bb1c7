use crate::constants::ALL_TABLES;
use crate::db::set_foreign_keys;
use crate::error::{LoanAppError, Result};
use crate::schema::quote_ident;
use rusqlite::Connection;
use std::path::Path;
use tracing::{error, info};

/// Drop every known table in the database at `path`.
///
/// Uses its own connection so it can run before any application exists. The connection
/// is closed when this returns.
pub fn clear_database<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let conn = Connection::open(path).map_err(|e| {
        error!("failed to connect to database {}: {}", path.display(), e);
        LoanAppError::Connection {
            message: format!("Failed to open {}: {e}", path.display()),
        }
    })?;

    match clear_tables(&conn) {
        Ok(dropped) => {
            info!(tables = dropped.len(), "All tables dropped successfully!");
            Ok(())
        }
        Err(e) => {
            error!("failed to drop tables: {}", e);
            Err(e)
        }
    }
}

/// Drop every known table through `conn`. Foreign key enforcement is off while dropping
/// and is back on when this returns, whether or not a drop failed.
pub fn clear_tables(conn: &Connection) -> Result<Vec<&'static str>> {
    let _enforcement = SuspendedForeignKeys::new(conn)?;

    let mut dropped = Vec::with_capacity(ALL_TABLES.len());
    for table in ALL_TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .map_err(|e| LoanAppError::schema(*table, e.to_string()))?;
        dropped.push(*table);
    }
    Ok(dropped)
}

struct SuspendedForeignKeys<'a> {
    conn: &'a Connection,
}

impl<'a> SuspendedForeignKeys<'a> {
    fn new(conn: &'a Connection) -> Result<Self> {
        set_foreign_keys(conn, false)?;
        Ok(Self { conn })
    }
}

impl Drop for SuspendedForeignKeys<'_> {
    fn drop(&mut self) {
        if let Err(e) = set_foreign_keys(self.conn, true) {
            error!("failed to re-enable foreign key checks: {}", e);
        }
    }
}
