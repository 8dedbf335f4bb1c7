use crate::db::{column_names, Database};
use crate::error::{LoanAppError, Result};
use crate::schema::quote_ident;
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::{Number, Value};
use std::sync::Arc;
use tracing::debug;

/// A row as a JSON object keyed by column name
pub type Record = serde_json::Map<String, Value>;

/// Generic row access used by the feature modules' handlers
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_all(&self, table: &str) -> Result<Vec<Record>>;
    async fn count(&self, table: &str) -> Result<u64>;

    /// Insert every row or none of them
    async fn insert_all(&self, rows: &[(&'static str, Record)]) -> Result<()>;

    async fn insert(&self, table: &'static str, record: &Record) -> Result<()> {
        self.insert_all(&[(table, record.clone())]).await
    }
}

/// Repository backed by the application's SQLite handle
pub struct SqliteRepository {
    db: Arc<Database>,
}

impl SqliteRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.with_connection(f))
            .await
            .map_err(|e| LoanAppError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn find_all(&self, table: &str) -> Result<Vec<Record>> {
        let table = table.to_string();
        self.blocking(move |conn| select_all(conn, &table)).await
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let table = table.to_string();
        self.blocking(move |conn| {
            require_columns(conn, &table)?;
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&table)),
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn insert_all(&self, rows: &[(&'static str, Record)]) -> Result<()> {
        let rows = rows.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            for (table, record) in &rows {
                insert_record(&tx, table, record)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn require_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let columns = column_names(conn, table)?;
    if columns.is_empty() {
        return Err(LoanAppError::schema(table, "table does not exist"));
    }
    Ok(columns)
}

fn select_all(conn: &Connection, table: &str) -> Result<Vec<Record>> {
    let columns = require_columns(conn, table)?;
    let select = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {select} FROM {} ORDER BY rowid",
        quote_ident(table)
    ))?;

    let mut rows = stmt.query([])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (i, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        records.push(record);
    }
    Ok(records)
}

fn insert_record(conn: &Connection, table: &str, record: &Record) -> Result<()> {
    let columns = require_columns(conn, table)?;
    if record.is_empty() {
        return Err(LoanAppError::Validation(format!("empty record for '{table}'")));
    }
    if let Some(unknown) = record.keys().find(|k| !columns.iter().any(|c| c == *k)) {
        return Err(LoanAppError::Validation(format!(
            "unknown column '{unknown}' for '{table}'"
        )));
    }

    let names = record.keys().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ");
    let placeholders = (1..=record.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT INTO {} ({names}) VALUES ({placeholders})", quote_ident(table));
    let values: Vec<SqlValue> = record.values().map(to_sql).collect();

    conn.execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                LoanAppError::Validation(format!("'{table}' constraint violated: {e}"))
            }
            other => other.into(),
        })?;
    debug!(table, "Inserted row");
    Ok(())
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use serde_json::json;

    fn repository() -> SqliteRepository {
        let db = Database::open_in_memory().unwrap();
        db.ensure_table(
            &TableSchema::new("things")
                .column("id", "TEXT PRIMARY KEY")
                .column("amount", "REAL NOT NULL")
                .column("active", "INTEGER"),
        )
        .unwrap();
        SqliteRepository::new(Arc::new(db))
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_find_all() {
        let repo = repository();
        repo.insert("things", &record(json!({"id": "a", "amount": 12.5, "active": true})))
            .await
            .unwrap();

        let rows = repo.find_all("things").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "a");
        assert_eq!(rows[0]["amount"], 12.5);
        assert_eq!(rows[0]["active"], 1);
        assert_eq!(repo.count("things").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected() {
        let repo = repository();
        let err = repo
            .insert("things", &record(json!({"id": "a", "amount": 1, "nope": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, LoanAppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_insert_all_is_atomic() {
        let repo = repository();
        let rows = [
            ("things", record(json!({"id": "a", "amount": 1}))),
            ("things", record(json!({"id": "a", "amount": 2}))),
        ];
        let err = repo.insert_all(&rows).await.unwrap_err();
        assert!(matches!(err, LoanAppError::Validation(_)));
        assert_eq!(repo.count("things").await.unwrap(), 0);
    }
}
