use super::resource;
use crate::app::context::AppContext;
use crate::app::module::{Module, RouteRegistrar};
use crate::cache::CachedEntity;
use crate::constants::{ADMINS_TABLE, CUSTOMERS_TABLE, LOAN_OFFICERS_TABLE, USERS_TABLE};
use crate::error::Result;
use crate::schema::TableSchema;
use crate::storage::Record;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "Admin")]
    Admin,
    #[serde(rename = "Loan Officer")]
    LoanOfficer,
    #[serde(rename = "Customer")]
    Customer,
}

impl UserRole {
    pub const ALL: [UserRole; 3] = [UserRole::Admin, UserRole::LoanOfficer, UserRole::Customer];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "Admin",
            UserRole::LoanOfficer => "Loan Officer",
            UserRole::Customer => "Customer",
        }
    }

    /// Table holding the role-specific columns, keyed by the user's id
    pub fn table(&self) -> &'static str {
        match self {
            UserRole::Admin => ADMINS_TABLE,
            UserRole::LoanOfficer => LOAN_OFFICERS_TABLE,
            UserRole::Customer => CUSTOMERS_TABLE,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            UserRole::Admin => "/admins",
            UserRole::LoanOfficer => "/loan-officers",
            UserRole::Customer => "/customers",
        }
    }

    fn cache(&self) -> CachedEntity {
        match self {
            UserRole::Admin => CachedEntity::Admins,
            UserRole::LoanOfficer => CachedEntity::LoanOfficers,
            UserRole::Customer => CachedEntity::Customers,
        }
    }
}

fn users_table() -> TableSchema {
    TableSchema::new(USERS_TABLE)
        .column("id", "TEXT PRIMARY KEY")
        .column("first_name", "TEXT NOT NULL")
        .column("last_name", "TEXT NOT NULL")
        .column("email", "TEXT NOT NULL UNIQUE")
        .column(
            "role",
            "TEXT NOT NULL CHECK (role IN ('Admin', 'Loan Officer', 'Customer'))",
        )
        .column("created_at", "TEXT NOT NULL")
}

fn role_table(role: UserRole) -> TableSchema {
    let table = TableSchema::new(role.table()).column("id", "TEXT PRIMARY KEY");
    let table = match role {
        UserRole::Admin => table.column("department", "TEXT"),
        UserRole::LoanOfficer => table
            .column("created_by_admin_id", "TEXT NOT NULL")
            .column("branch", "TEXT")
            .index("idx_loan_officers_created_by_admin_id", &["created_by_admin_id"]),
        UserRole::Customer => table
            .column("phone", "TEXT")
            .column("address", "TEXT")
            .column("monthly_income", "REAL"),
    };
    table.column("created_at", "TEXT NOT NULL")
}

/// Users and their three role tables
pub struct UserModule;

impl Module for UserModule {
    fn name(&self) -> &'static str {
        "users"
    }

    fn tables(&self) -> Vec<TableSchema> {
        let mut tables = vec![users_table()];
        tables.extend(UserRole::ALL.into_iter().map(role_table));
        tables
    }

    fn register_routes(&self, routes: &mut RouteRegistrar) {
        routes.get("/users", |State(ctx): State<AppContext>| async move {
            resource::list(&ctx, USERS_TABLE).await
        });

        for role in UserRole::ALL {
            routes
                .get(role.path(), move |State(ctx): State<AppContext>| async move {
                    resource::list_cached(&ctx, role.cache()).await
                })
                .post(
                    role.path(),
                    move |State(ctx): State<AppContext>, Json(body): Json<Record>| async move {
                        create_account(&ctx, role, body).await
                    },
                );
        }
    }
}

/// Insert the shared user row and the role row together
async fn create_account(
    ctx: &AppContext,
    role: UserRole,
    body: Record,
) -> Result<(StatusCode, Json<Record>)> {
    let user_columns: Vec<&str> = users_table().columns.iter().map(|c| c.name).collect();

    let mut user = Record::new();
    let mut profile = Record::new();
    for (key, value) in body {
        if key == "role" {
            continue;
        }
        if user_columns.contains(&key.as_str()) {
            user.insert(key, value);
        } else {
            profile.insert(key, value);
        }
    }

    resource::stamp(&mut user);
    user.insert("role".to_string(), Value::String(role.as_str().to_string()));
    for shared in ["id", "created_at"] {
        profile.insert(shared.to_string(), user[shared].clone());
    }

    ctx.repository
        .insert_all(&[(USERS_TABLE, user.clone()), (role.table(), profile.clone())])
        .await?;
    ctx.cache.invalidate(role.cache()).await;

    user.extend(profile);
    Ok((StatusCode::CREATED, Json(user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_with_display_name() {
        assert_eq!(serde_json::to_string(&UserRole::LoanOfficer).unwrap(), "\"Loan Officer\"");
        let role: UserRole = serde_json::from_str("\"Customer\"").unwrap();
        assert_eq!(role, UserRole::Customer);
    }

    #[test]
    fn test_module_owns_user_and_role_tables() {
        let names: Vec<_> = UserModule.tables().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![USERS_TABLE, ADMINS_TABLE, LOAN_OFFICERS_TABLE, CUSTOMERS_TABLE]);
    }
}
