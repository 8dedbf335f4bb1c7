use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoanAppError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema error on table '{table}': {message}")]
    Schema { table: String, message: String },

    #[error("Migration failed for module '{module}': {source}")]
    ModuleMigration {
        module: String,
        #[source]
        source: Box<LoanAppError>,
    },

    #[error("Foreign key {declaration} failed: {message}")]
    ForeignKey { declaration: String, message: String },

    #[error("Migration phase '{phase}' timed out after {secs}s")]
    MigrationTimeout { phase: &'static str, secs: u64 },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Application not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoanAppError {
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoanAppError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LoanAppError::Validation(_) => StatusCode::BAD_REQUEST,
            LoanAppError::NotInitialized(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LoanAppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, LoanAppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_migration_error_names_module() {
        let err = LoanAppError::ModuleMigration {
            module: "documents".to_string(),
            source: Box::new(LoanAppError::schema("documents", "near \"(\": syntax error")),
        };
        let msg = err.to_string();
        assert!(msg.contains("documents"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let resp = LoanAppError::Validation("unknown column 'foo'".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = LoanAppError::Server("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
