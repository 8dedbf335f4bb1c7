use crate::app::module::{Module, RouteRegistrar};
use crate::constants::LOGIN_INFO_TABLE;
use crate::schema::TableSchema;
use tracing::debug;

/// Credentials per user. Login endpoints belong to the auth layer, so no routes here.
pub struct LoginInfoModule;

impl Module for LoginInfoModule {
    fn name(&self) -> &'static str {
        "login-info"
    }

    fn tables(&self) -> Vec<TableSchema> {
        vec![TableSchema::new(LOGIN_INFO_TABLE)
            .column("id", "TEXT PRIMARY KEY")
            .column("user_id", "TEXT NOT NULL")
            .column("username", "TEXT NOT NULL UNIQUE")
            .column("password_hash", "TEXT NOT NULL")
            .column("last_login_at", "TEXT")
            .column("created_at", "TEXT NOT NULL")
            .index("idx_login_info_user_id", &["user_id"])]
    }

    fn register_routes(&self, _routes: &mut RouteRegistrar) {
        debug!("login-info exposes no routes");
    }
}
