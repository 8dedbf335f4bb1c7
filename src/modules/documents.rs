use super::resource;
use crate::app::context::AppContext;
use crate::app::module::{Module, RouteRegistrar};
use crate::constants::DOCUMENTS_TABLE;
use crate::schema::TableSchema;
use crate::storage::Record;
use axum::extract::State;
use axum::Json;

/// Documents attached to a loan application
pub struct DocumentModule;

impl Module for DocumentModule {
    fn name(&self) -> &'static str {
        "documents"
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(DOCUMENTS_TABLE)
            .column("id", "TEXT PRIMARY KEY")
            .column("loan_application_id", "TEXT NOT NULL")
            .column("document_type", "TEXT NOT NULL")
            .column("file_path", "TEXT NOT NULL")
            .column("created_at", "TEXT NOT NULL")
            .index("idx_documents_loan_application_id", &["loan_application_id"])]
    }

    fn register_routes(&self, routes: &mut RouteRegistrar) {
        routes
            .get("/documents", |State(ctx): State<AppContext>| async move {
                resource::list(&ctx, DOCUMENTS_TABLE).await
            })
            .post(
                "/documents",
                |State(ctx): State<AppContext>, Json(body): Json<Record>| async move {
                    resource::create(&ctx, DOCUMENTS_TABLE, body).await
                },
            );
    }
}
