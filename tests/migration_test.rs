use anyhow::Result;
use loan_app::app::module::{Module, RouteRegistrar};
use loan_app::config::AppConfig;
use loan_app::constants::ALL_TABLES;
use loan_app::db::Database;
use loan_app::error::LoanAppError;
use loan_app::migration::{self, FOREIGN_KEYS};
use loan_app::modules::{all_modules, LoanSchemeModule, UserModule};
use loan_app::schema::TableSchema;
use loan_app::storage::SqliteRepository;
use loan_app::Application;
use rusqlite::params;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct BrokenModule;

impl Module for BrokenModule {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn tables(&self) -> Vec<TableSchema> {
        Vec::new()
    }

    fn register_routes(&self, _routes: &mut RouteRegistrar) {}

    fn table_migration(&self, _db: &Database) -> loan_app::Result<()> {
        Err(LoanAppError::schema("broken", "disk on fire"))
    }
}

struct ObservedModule {
    ran: Arc<AtomicBool>,
}

impl Module for ObservedModule {
    fn name(&self) -> &'static str {
        "observed"
    }

    fn tables(&self) -> Vec<TableSchema> {
        Vec::new()
    }

    fn register_routes(&self, _routes: &mut RouteRegistrar) {}

    fn table_migration(&self, _db: &Database) -> loan_app::Result<()> {
        self.ran.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct StalledModule;

impl Module for StalledModule {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn tables(&self) -> Vec<TableSchema> {
        Vec::new()
    }

    fn register_routes(&self, _routes: &mut RouteRegistrar) {}

    fn table_migration(&self, _db: &Database) -> loan_app::Result<()> {
        std::thread::sleep(Duration::from_secs(2));
        Ok(())
    }
}

fn seed_admin(db: &Database, id: &str, email: &str) -> loan_app::Result<()> {
    db.with_connection(|conn| {
        conn.execute(
            "INSERT INTO users (id, first_name, last_name, email, role, created_at)
             VALUES (?1, 'Ada', 'Admin', ?2, 'Admin', '2024-01-01T00:00:00Z')",
            params![id, email],
        )?;
        Ok(())
    })
}

#[test]
fn test_full_migration_creates_tables_and_constraints() -> Result<()> {
    let db = Database::open_in_memory()?;
    let report = migration::migrate(&db, &all_modules(), FOREIGN_KEYS)?;

    let tables = db.list_tables()?;
    for table in ALL_TABLES {
        assert!(tables.iter().any(|t| t == table), "missing table {table}");
    }
    assert_eq!(report.foreign_keys_added.len(), FOREIGN_KEYS.len());
    assert!(report.foreign_keys_skipped.is_empty());
    assert_eq!(db.foreign_key_list("loan_applications")?.len(), 3);
    assert!(db.foreign_keys_enabled()?);
    Ok(())
}

#[test]
fn test_second_run_is_a_no_op() -> Result<()> {
    let db = Database::open_in_memory()?;
    migration::migrate(&db, &all_modules(), FOREIGN_KEYS)?;
    seed_admin(&db, "admin-1", "ada@example.com")?;

    let report = migration::migrate(&db, &all_modules(), FOREIGN_KEYS)?;
    assert!(report.foreign_keys_added.is_empty());
    assert_eq!(report.foreign_keys_present.len(), FOREIGN_KEYS.len());
    assert_eq!(db.foreign_key_list("login_info")?.len(), 1);

    let users: i64 = db.with_connection(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    })?;
    assert_eq!(users, 1);
    Ok(())
}

#[test]
fn test_registration_order_does_not_matter() -> Result<()> {
    let db = Database::open_in_memory()?;
    let mut modules = all_modules();
    modules.reverse();

    let report = migration::migrate(&db, &modules, FOREIGN_KEYS)?;
    assert_eq!(report.modules_migrated.first(), Some(&"installations"));
    assert_eq!(report.foreign_keys_added.len(), FOREIGN_KEYS.len());
    Ok(())
}

#[test]
fn test_referential_actions_are_enforced() -> Result<()> {
    let db = Database::open_in_memory()?;
    migration::migrate(&db, &all_modules(), FOREIGN_KEYS)?;
    seed_admin(&db, "admin-1", "ada@example.com")?;
    seed_admin(&db, "admin-2", "bob@example.com")?;

    db.with_connection(|conn| {
        conn.execute(
            "INSERT INTO login_info (id, user_id, username, password_hash, created_at)
             VALUES ('login-1', 'admin-2', 'bob', 'x', '2024-01-01T00:00:00Z')",
            [],
        )?;
        conn.execute(
            "INSERT INTO loan_schemes
                 (id, name, interest_rate, max_amount, tenure_months, admin_id, created_at)
             VALUES ('scheme-1', 'Home', 7.5, 100000, 240, 'admin-1', '2024-01-01T00:00:00Z')",
            [],
        )?;
        Ok(())
    })?;

    // Cascade: dropping the user removes its login
    db.with_connection(|conn| {
        conn.execute("DELETE FROM users WHERE id = 'admin-2'", [])?;
        let logins: i64 = conn.query_row("SELECT COUNT(*) FROM login_info", [], |row| row.get(0))?;
        assert_eq!(logins, 0);
        Ok(())
    })?;

    // Restrict: an admin owning a scheme cannot be deleted
    let restricted = db.with_connection(|conn| {
        Ok(conn.execute("DELETE FROM users WHERE id = 'admin-1'", [])?)
    });
    assert!(restricted.is_err());

    let orphan = db.with_connection(|conn| {
        Ok(conn.execute(
            "INSERT INTO loan_applications (id, customer_id, loan_scheme_id, amount, created_at)
             VALUES ('app-1', 'nobody', 'scheme-1', 500, '2024-01-01T00:00:00Z')",
            [],
        )?)
    });
    assert!(orphan.is_err());
    Ok(())
}

#[test]
fn test_failing_module_aborts_migration() -> Result<()> {
    let db = Database::open_in_memory()?;
    let ran = Arc::new(AtomicBool::new(false));
    let modules: Vec<Arc<dyn Module>> = vec![
        Arc::new(UserModule),
        Arc::new(BrokenModule),
        Arc::new(ObservedModule { ran: ran.clone() }),
    ];

    let err = migration::migrate(&db, &modules, FOREIGN_KEYS).unwrap_err();
    match &err {
        LoanAppError::ModuleMigration { module, .. } => assert_eq!(module, "broken"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("broken"));
    assert!(!ran.load(Ordering::SeqCst));
    // Phase 2 never started
    assert!(db.foreign_key_list("loan_officers")?.is_empty());
    Ok(())
}

#[test]
fn test_partial_module_set_skips_unowned_constraints() -> Result<()> {
    let db = Database::open_in_memory()?;
    let modules: Vec<Arc<dyn Module>> = vec![Arc::new(LoanSchemeModule), Arc::new(UserModule)];

    let report = migration::migrate(&db, &modules, FOREIGN_KEYS)?;
    let added: Vec<_> = report.foreign_keys_added.iter().map(|d| d.child_table).collect();
    assert_eq!(added, vec!["loan_officers", "loan_schemes"]);
    assert_eq!(
        report.foreign_keys_skipped.len(),
        FOREIGN_KEYS.len() - report.foreign_keys_added.len()
    );
    assert!(!db.table_exists("login_info")?);
    Ok(())
}

#[tokio::test]
async fn test_application_migrates_file_database() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("loans.db");

    let mut config = AppConfig::default();
    config.database.path = path.display().to_string();
    config.server.port = 0;

    let db = Arc::new(Database::open(
        &path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?);
    let repository = Arc::new(SqliteRepository::new(db.clone()));
    let app = Application::new("test", config, db.clone(), repository)?;

    let report = app.table_migration(&all_modules()).await?;
    assert_eq!(report.modules_migrated.len(), 6);
    assert_eq!(report.foreign_keys_added.len(), FOREIGN_KEYS.len());

    app.load_caches().await?;
    drop(app);
    drop(db);

    let reopened = Database::open(&path, Duration::from_secs(1))?;
    assert_eq!(reopened.foreign_key_list("documents")?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stalled_migration_times_out() -> Result<()> {
    let mut config = AppConfig::default();
    config.database.migration_timeout_secs = 1;

    let db = Arc::new(Database::open_in_memory()?);
    let repository = Arc::new(SqliteRepository::new(db.clone()));
    let app = Application::new("test", config, db.clone(), repository)?;

    let modules: Vec<Arc<dyn Module>> = vec![Arc::new(UserModule), Arc::new(StalledModule)];
    let started = std::time::Instant::now();
    let err = app.table_migration(&modules).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(1800));
    match err {
        LoanAppError::MigrationTimeout { phase, secs } => {
            assert_eq!(phase, "local tables");
            assert_eq!(secs, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Phase 2 never ran
    assert!(db.foreign_key_list("loan_officers")?.is_empty());
    Ok(())
}
