use super::resource;
use crate::app::context::AppContext;
use crate::app::module::{Module, RouteRegistrar};
use crate::constants::LOAN_APPLICATIONS_TABLE;
use crate::schema::TableSchema;
use crate::storage::Record;
use axum::extract::State;
use axum::Json;

pub struct LoanApplicationModule;

impl Module for LoanApplicationModule {
    fn name(&self) -> &'static str {
        "loan-applications"
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(LOAN_APPLICATIONS_TABLE)
            .column("id", "TEXT PRIMARY KEY")
            .column("customer_id", "TEXT NOT NULL")
            .column("loan_scheme_id", "TEXT NOT NULL")
            // Assigned once an officer picks the application up
            .column("loan_officer_id", "TEXT")
            .column("amount", "REAL NOT NULL CHECK (amount > 0)")
            .column("status", "TEXT NOT NULL DEFAULT 'Pending'")
            .column("created_at", "TEXT NOT NULL")
            .index("idx_loan_applications_customer_id", &["customer_id"])
            .index("idx_loan_applications_loan_scheme_id", &["loan_scheme_id"])]
    }

    fn register_routes(&self, routes: &mut RouteRegistrar) {
        routes
            .get("/loan-applications", |State(ctx): State<AppContext>| async move {
                resource::list(&ctx, LOAN_APPLICATIONS_TABLE).await
            })
            .post(
                "/loan-applications",
                |State(ctx): State<AppContext>, Json(body): Json<Record>| async move {
                    resource::create(&ctx, LOAN_APPLICATIONS_TABLE, body).await
                },
            );
    }
}
