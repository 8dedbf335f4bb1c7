use super::resource;
use crate::app::context::AppContext;
use crate::app::module::{Module, RouteRegistrar};
use crate::cache::CachedEntity;
use crate::constants::LOAN_SCHEMES_TABLE;
use crate::schema::TableSchema;
use crate::storage::Record;
use axum::extract::State;
use axum::Json;

pub struct LoanSchemeModule;

impl Module for LoanSchemeModule {
    fn name(&self) -> &'static str {
        "loan-schemes"
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(LOAN_SCHEMES_TABLE)
            .column("id", "TEXT PRIMARY KEY")
            .column("name", "TEXT NOT NULL UNIQUE")
            .column("interest_rate", "REAL NOT NULL CHECK (interest_rate >= 0)")
            .column("max_amount", "REAL NOT NULL CHECK (max_amount > 0)")
            .column("tenure_months", "INTEGER NOT NULL")
            .column("admin_id", "TEXT NOT NULL")
            .column("created_at", "TEXT NOT NULL")
            .index("idx_loan_schemes_admin_id", &["admin_id"])]
    }

    fn register_routes(&self, routes: &mut RouteRegistrar) {
        routes
            .get("/loan-schemes", |State(ctx): State<AppContext>| async move {
                resource::list_cached(&ctx, CachedEntity::LoanSchemes).await
            })
            .post(
                "/loan-schemes",
                |State(ctx): State<AppContext>, Json(body): Json<Record>| async move {
                    resource::create(&ctx, LOAN_SCHEMES_TABLE, body).await
                },
            );
    }
}
