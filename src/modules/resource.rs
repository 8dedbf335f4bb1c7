//! Handlers shared by modules that expose a table as a plain list/create resource.

use crate::app::context::AppContext;
use crate::cache::CachedEntity;
use crate::constants::TOTAL_COUNT_HEADER;
use crate::error::Result;
use crate::storage::Record;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

pub async fn list(ctx: &AppContext, table: &'static str) -> Result<Response> {
    let records = ctx.repository.find_all(table).await?;
    Ok(with_total_count(&records))
}

pub async fn list_cached(ctx: &AppContext, kind: CachedEntity) -> Result<Response> {
    let records = ctx.cache.get(kind, ctx.repository.as_ref()).await?;
    Ok(with_total_count(&records))
}

pub async fn create(
    ctx: &AppContext,
    table: &'static str,
    mut record: Record,
) -> Result<(StatusCode, Json<Record>)> {
    stamp(&mut record);
    ctx.repository.insert(table, &record).await?;
    ctx.cache.invalidate_table(table).await;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Fill in `id` and `created_at` when the caller did not supply them
pub fn stamp(record: &mut Record) {
    record
        .entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    record
        .entry("created_at")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
}

fn with_total_count(records: &[Record]) -> Response {
    (
        [(TOTAL_COUNT_HEADER, records.len().to_string())],
        Json(records),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_keeps_supplied_id() {
        let mut record = Record::new();
        record.insert("id".to_string(), Value::String("fixed".to_string()));
        stamp(&mut record);
        assert_eq!(record["id"], "fixed");
        assert!(record["created_at"].is_string());
    }
}
