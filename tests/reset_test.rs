use anyhow::Result;
use loan_app::constants::ALL_TABLES;
use loan_app::db::Database;
use loan_app::migration::{self, FOREIGN_KEYS};
use loan_app::modules::all_modules;
use loan_app::reset;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use tempfile::tempdir;

fn foreign_keys_on(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
}

#[test]
fn test_clear_database_drops_every_table() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("loans.db");
    {
        let db = Database::open(&path, Duration::from_secs(1))?;
        migration::migrate(&db, &all_modules(), FOREIGN_KEYS)?;
        db.execute_batch(
            "INSERT INTO users (id, first_name, last_name, email, role, created_at)
             VALUES ('u1', 'Ada', 'Admin', 'ada@example.com', 'Admin', '2024-01-01T00:00:00Z');
             INSERT INTO login_info (id, user_id, username, password_hash, created_at)
             VALUES ('l1', 'u1', 'ada', 'x', '2024-01-01T00:00:00Z');",
        )?;
    }

    reset::clear_database(&path)?;

    let db = Database::open(&path, Duration::from_secs(1))?;
    let remaining = db.list_tables()?;
    for table in ALL_TABLES {
        assert!(!remaining.iter().any(|t| t == table), "{table} still exists");
    }
    Ok(())
}

#[test]
fn test_clear_empty_database_succeeds() -> Result<()> {
    let dir = tempdir()?;
    reset::clear_database(dir.path().join("empty.db"))?;
    Ok(())
}

#[test]
fn test_enforcement_restored_after_clearing() -> Result<()> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON; CREATE TABLE users (id TEXT PRIMARY KEY);")?;

    let dropped = reset::clear_tables(&conn)?;
    assert_eq!(dropped.len(), ALL_TABLES.len());
    assert!(foreign_keys_on(&conn)?);
    Ok(())
}

#[test]
fn test_enforcement_restored_when_a_drop_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("loans.db");
    {
        let db = Database::open(&path, Duration::from_secs(1))?;
        migration::migrate(&db, &all_modules(), FOREIGN_KEYS)?;
    }

    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    assert!(reset::clear_tables(&conn).is_err());
    assert!(foreign_keys_on(&conn)?);

    let db = Database::open(&path, Duration::from_secs(1))?;
    assert!(db.table_exists("users")?);
    Ok(())
}
