//! Two-phase schema migration.
//!
//! Phase 1 lets every module create or update its own tables with no cross-table
//! constraints. Phase 2 then declares the foreign keys in one fixed global order. Module
//! registration order never has to respect table dependencies because no constraint is
//! declared until every parent table exists.

use crate::app::module::Module;
use crate::constants::{
    LOAN_APPLICATIONS_TABLE, LOAN_OFFICERS_TABLE, LOAN_SCHEMES_TABLE, LOGIN_INFO_TABLE,
    DOCUMENTS_TABLE, INSTALLATIONS_TABLE, USERS_TABLE,
};
use crate::db::Database;
use crate::error::{LoanAppError, Result};
use crate::schema::{ForeignKey, ReferentialAction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span};

const fn fk(
    child_table: &'static str,
    child_column: &'static str,
    parent_table: &'static str,
    action: ReferentialAction,
) -> ForeignKey {
    ForeignKey {
        child_table,
        child_column,
        parent_table,
        parent_column: "id",
        on_delete: action,
        on_update: action,
    }
}

/// Cross-module constraints, applied in this order after every module's tables exist.
///
/// Admin-owned references restrict deletion; application-owned dependents cascade.
pub const FOREIGN_KEYS: &[ForeignKey] = &[
    fk(LOGIN_INFO_TABLE, "user_id", USERS_TABLE, ReferentialAction::Cascade),
    fk(LOAN_OFFICERS_TABLE, "created_by_admin_id", USERS_TABLE, ReferentialAction::Restrict),
    fk(LOAN_SCHEMES_TABLE, "admin_id", USERS_TABLE, ReferentialAction::Restrict),
    fk(LOAN_APPLICATIONS_TABLE, "loan_scheme_id", LOAN_SCHEMES_TABLE, ReferentialAction::Cascade),
    fk(LOAN_APPLICATIONS_TABLE, "customer_id", USERS_TABLE, ReferentialAction::Cascade),
    fk(LOAN_APPLICATIONS_TABLE, "loan_officer_id", USERS_TABLE, ReferentialAction::Cascade),
    fk(
        INSTALLATIONS_TABLE,
        "loan_application_id",
        LOAN_APPLICATIONS_TABLE,
        ReferentialAction::Cascade,
    ),
    fk(DOCUMENTS_TABLE, "loan_application_id", LOAN_APPLICATIONS_TABLE, ReferentialAction::Cascade),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub modules_migrated: Vec<&'static str>,
    pub foreign_keys_added: Vec<ForeignKey>,
    pub foreign_keys_present: Vec<ForeignKey>,
    /// Declarations naming a table no registered module owns
    pub foreign_keys_skipped: Vec<ForeignKey>,
}

/// Phase 1: each module's own tables, in the supplied order. Stops at the first failure.
pub fn run_local_migrations(
    db: &Database,
    modules: &[Arc<dyn Module>],
) -> Result<Vec<&'static str>> {
    let mut migrated = Vec::with_capacity(modules.len());

    for module in modules {
        let span = info_span!("table_migration", module = module.name());
        let _enter = span.enter();

        module.table_migration(db).map_err(|e| {
            error!(error = %e, "Table migration failed, aborting remaining migrations");
            LoanAppError::ModuleMigration {
                module: module.name().to_string(),
                source: Box::new(e),
            }
        })?;
        debug!("Module tables up to date");
        migrated.push(module.name());
    }

    Ok(migrated)
}

pub fn owned_tables(modules: &[Arc<dyn Module>]) -> HashSet<&'static str> {
    modules
        .iter()
        .flat_map(|m| m.tables())
        .map(|t| t.name)
        .collect()
}

/// Phase 2: declare `declarations` in order, skipping those outside `owned`.
pub fn apply_foreign_keys(
    db: &Database,
    declarations: &[ForeignKey],
    owned: &HashSet<&'static str>,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for declaration in declarations {
        if !owned.contains(declaration.child_table) || !owned.contains(declaration.parent_table) {
            debug!(%declaration, "Skipping foreign key for unregistered module");
            report.foreign_keys_skipped.push(*declaration);
            continue;
        }

        match db.add_foreign_key(declaration) {
            Ok(true) => report.foreign_keys_added.push(*declaration),
            Ok(false) => report.foreign_keys_present.push(*declaration),
            Err(e) => {
                error!(%declaration, error = %e, "Foreign key declaration failed");
                return Err(e);
            }
        }
    }

    Ok(report)
}

/// Both phases, synchronously. Phase 2 only starts once every module's phase 1 succeeded.
pub fn migrate(
    db: &Database,
    modules: &[Arc<dyn Module>],
    declarations: &[ForeignKey],
) -> Result<MigrationReport> {
    let migrated = run_local_migrations(db, modules)?;
    let mut report = apply_foreign_keys(db, declarations, &owned_tables(modules))?;
    report.modules_migrated = migrated;

    info!(
        modules = report.modules_migrated.len(),
        added = report.foreign_keys_added.len(),
        present = report.foreign_keys_present.len(),
        skipped = report.foreign_keys_skipped.len(),
        "Schema migration complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ALL_TABLES;

    #[test]
    fn test_every_declaration_names_known_tables() {
        for declaration in FOREIGN_KEYS {
            assert!(ALL_TABLES.contains(&declaration.child_table), "{declaration}");
            assert!(ALL_TABLES.contains(&declaration.parent_table), "{declaration}");
        }
    }

    #[test]
    fn test_admin_references_restrict() {
        let restricted: Vec<_> = FOREIGN_KEYS
            .iter()
            .filter(|d| d.on_delete == ReferentialAction::Restrict)
            .map(|d| d.child_table)
            .collect();
        assert_eq!(restricted, vec![LOAN_OFFICERS_TABLE, LOAN_SCHEMES_TABLE]);
    }
}
