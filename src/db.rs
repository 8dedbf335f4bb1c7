use crate::error::{LoanAppError, Result};
use crate::schema::{quote_ident, ForeignKey, TableSchema};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info};

/// A foreign key as reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub parent_table: String,
    pub from: String,
    pub to: String,
    pub on_update: String,
    pub on_delete: String,
}

/// The persistence handle shared by the application, the repository and migrations.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the SQLite file at `path` with foreign key enforcement on
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        info!("Connecting to database at {}", path.display());

        let conn = Connection::open(path).map_err(|e| {
            error!("Failed to open database {}: {}", path.display(), e);
            LoanAppError::Connection {
                message: format!("Failed to open {}: {e}", path.display()),
            }
        })?;
        conn.busy_timeout(busy_timeout)?;

        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| LoanAppError::Connection {
            message: format!("Failed to open in-memory database: {e}"),
        })?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LoanAppError::Connection {
            message: "database connection lock poisoned".to_string(),
        })
    }

    /// Run `f` with exclusive use of the connection
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(!column_names(&conn, table)?.is_empty())
    }

    pub fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        column_names(&conn, table)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        list_tables(&conn)
    }

    pub fn foreign_keys_enabled(&self) -> Result<bool> {
        let conn = self.lock()?;
        foreign_keys_enabled(&conn)
    }

    pub fn set_foreign_keys(&self, enabled: bool) -> Result<()> {
        let conn = self.lock()?;
        set_foreign_keys(&conn, enabled)
    }

    pub fn foreign_key_list(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let conn = self.lock()?;
        foreign_key_list(&conn, table)
    }

    /// Create the table if missing, otherwise add any declared columns it lacks.
    ///
    /// Columns added to an existing table must be nullable or carry a default.
    pub fn ensure_table(&self, table: &TableSchema) -> Result<()> {
        let conn = self.lock()?;
        let existing = column_names(&conn, table.name)?;

        if existing.is_empty() {
            conn.execute_batch(&table.create_sql())
                .map_err(|e| LoanAppError::schema(table.name, e.to_string()))?;
            info!(table = table.name, "Created table");
        } else {
            for column in &table.columns {
                if existing.iter().any(|c| c.eq_ignore_ascii_case(column.name)) {
                    continue;
                }
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(table.name),
                    quote_ident(column.name),
                    column.definition
                );
                conn.execute_batch(&sql)
                    .map_err(|e| {
                        LoanAppError::schema(
                            table.name,
                            format!("adding column '{}': {e}", column.name),
                        )
                    })?;
                info!(table = table.name, column = column.name, "Added column");
            }
        }

        for index in &table.indexes {
            conn.execute_batch(&index.create_sql(table.name))
                .map_err(|e| {
                    LoanAppError::schema(table.name, format!("index '{}': {e}", index.name))
                })?;
        }
        Ok(())
    }

    /// Declare `fk` on its child table. Returns `false` when the constraint already exists.
    ///
    /// SQLite cannot add a constraint to an existing table, so the child table is
    /// rebuilt with the constraint appended, rows copied across and indexes recreated.
    /// Enforcement is switched off for the rebuild and restored afterwards on every path.
    pub fn add_foreign_key(&self, fk: &ForeignKey) -> Result<bool> {
        let mut conn = self.lock()?;
        let declaration = fk.to_string();
        let fk_err = |message: String| LoanAppError::ForeignKey {
            declaration: declaration.clone(),
            message,
        };

        if let Some(existing) = foreign_key_list(&conn, fk.child_table)?
            .into_iter()
            .find(|info| same_columns(info, fk))
        {
            if !same_actions(&existing, fk) {
                return Err(fk_err(format!(
                    "existing constraint uses ON DELETE {} ON UPDATE {}, \
                     declared ON DELETE {} ON UPDATE {}",
                    existing.on_delete,
                    existing.on_update,
                    fk.on_delete.as_sql(),
                    fk.on_update.as_sql()
                )));
            }
            debug!(%declaration, "Foreign key already present");
            return Ok(false);
        }

        for (table, column) in [
            (fk.child_table, fk.child_column),
            (fk.parent_table, fk.parent_column),
        ] {
            let columns = column_names(&conn, table)?;
            if columns.is_empty() {
                return Err(fk_err(format!("table '{table}' does not exist")));
            }
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                return Err(fk_err(format!("column '{table}.{column}' does not exist")));
            }
        }

        let create_sql: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![fk.child_table],
            |row| row.get(0),
        )?;
        let body = table_body(&create_sql)
            .ok_or_else(|| fk_err(format!("unrecognised definition for '{}'", fk.child_table)))?
            .to_string();

        let index_sql = {
            let mut stmt = conn.prepare(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![fk.child_table], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let enforcement_was_on = foreign_keys_enabled(&conn)?;
        set_foreign_keys(&conn, false)?;
        let rebuilt = rebuild_with_constraint(&mut conn, fk, &body, &index_sql);
        let restored = if enforcement_was_on {
            set_foreign_keys(&conn, true)
        } else {
            Ok(())
        };

        rebuilt.map_err(|e| fk_err(e.to_string()))?;
        restored?;
        info!(%declaration, on_delete = fk.on_delete.as_sql(), "Added foreign key");
        Ok(true)
    }
}

fn same_columns(info: &ForeignKeyInfo, fk: &ForeignKey) -> bool {
    info.parent_table.eq_ignore_ascii_case(fk.parent_table)
        && info.from.eq_ignore_ascii_case(fk.child_column)
        && info.to.eq_ignore_ascii_case(fk.parent_column)
}

fn same_actions(info: &ForeignKeyInfo, fk: &ForeignKey) -> bool {
    info.on_delete.eq_ignore_ascii_case(fk.on_delete.as_sql())
        && info.on_update.eq_ignore_ascii_case(fk.on_update.as_sql())
}

/// Text between the outermost parentheses of a `CREATE TABLE` statement
fn table_body(create_sql: &str) -> Option<&str> {
    let start = create_sql.find('(')?;
    let end = create_sql.rfind(')')?;
    (end > start).then(|| create_sql[start + 1..end].trim())
}

fn rebuild_with_constraint(
    conn: &mut Connection,
    fk: &ForeignKey,
    body: &str,
    index_sql: &[String],
) -> Result<()> {
    let child = quote_ident(fk.child_table);
    let staging = quote_ident(&format!("{}__rebuild", fk.child_table));

    let tx = conn.transaction()?;
    tx.execute_batch(&format!("CREATE TABLE {staging} ({body}, {})", fk.constraint_sql()))?;
    tx.execute_batch(&format!("INSERT INTO {staging} SELECT * FROM {child}"))?;
    tx.execute_batch(&format!("DROP TABLE {child}"))?;
    tx.execute_batch(&format!("ALTER TABLE {staging} RENAME TO {child}"))?;
    for sql in index_sql {
        tx.execute_batch(sql)?;
    }

    let violations = {
        let mut stmt = tx.prepare(&format!("PRAGMA foreign_key_check({child})"))?;
        let rows = stmt.query_map([], |_| Ok(()))?;
        rows.count()
    };
    if violations > 0 {
        // Dropping the transaction rolls the rebuild back
        return Err(LoanAppError::schema(
            fk.child_table,
            format!("{violations} existing row(s) violate {fk}"),
        ));
    }

    tx.commit()?;
    Ok(())
}

pub(crate) fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub(crate) fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub(crate) fn foreign_keys_enabled(conn: &Connection) -> Result<bool> {
    let enabled: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    Ok(enabled == 1)
}

pub(crate) fn set_foreign_keys(conn: &Connection, enabled: bool) -> Result<()> {
    let sql = if enabled {
        "PRAGMA foreign_keys = ON;"
    } else {
        "PRAGMA foreign_keys = OFF;"
    };
    conn.execute_batch(sql)?;
    Ok(())
}

pub(crate) fn foreign_key_list(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(ForeignKeyInfo {
            parent_table: row.get(2)?,
            from: row.get(3)?,
            to: row.get(4)?,
            on_update: row.get(5)?,
            on_delete: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}
