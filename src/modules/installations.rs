use super::resource;
use crate::app::context::AppContext;
use crate::app::module::{Module, RouteRegistrar};
use crate::constants::INSTALLATIONS_TABLE;
use crate::schema::TableSchema;
use crate::storage::Record;
use axum::extract::State;
use axum::Json;

/// Repayment installments scheduled for a loan application
pub struct InstallationModule;

impl Module for InstallationModule {
    fn name(&self) -> &'static str {
        "installations"
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(INSTALLATIONS_TABLE)
            .column("id", "TEXT PRIMARY KEY")
            .column("loan_application_id", "TEXT NOT NULL")
            .column("due_date", "TEXT NOT NULL")
            .column("amount", "REAL NOT NULL")
            .column("status", "TEXT NOT NULL DEFAULT 'Due'")
            .column("paid_at", "TEXT")
            .column("created_at", "TEXT NOT NULL")
            .index("idx_installations_loan_application_id", &["loan_application_id"])]
    }

    fn register_routes(&self, routes: &mut RouteRegistrar) {
        routes
            .get("/installations", |State(ctx): State<AppContext>| async move {
                resource::list(&ctx, INSTALLATIONS_TABLE).await
            })
            .post(
                "/installations",
                |State(ctx): State<AppContext>, Json(body): Json<Record>| async move {
                    resource::create(&ctx, INSTALLATIONS_TABLE, body).await
                },
            );
    }
}
