//! Application lifecycle: `init → register routes / migrate → serve → shutdown`.

pub mod context;
pub mod module;

use crate::cache::EntityCache;
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{LoanAppError, Result};
use crate::migration::{self, MigrationReport, FOREIGN_KEYS};
use crate::server::{AppService, CorsPolicy, HttpServer};
use crate::storage::Repository;
use context::AppContext;
use module::{Module, RegisteredRoute, RouteRegistrar};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request and tracked task finished within the grace period
    Graceful,
    /// The grace period elapsed and remaining requests were terminated
    Forced,
    NotRunning,
}

#[derive(Clone)]
struct ServerControl {
    graceful: CancellationToken,
    force: CancellationToken,
    finished: CancellationToken,
}

impl ServerControl {
    fn new() -> Self {
        Self {
            graceful: CancellationToken::new(),
            force: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }
}

/// Fields mutated during startup and shutdown, only touched with the lock held
#[derive(Default)]
struct AppState {
    routes: Option<RouteRegistrar>,
    server: Option<HttpServer>,
    running: Option<ServerControl>,
    local_addr: Option<SocketAddr>,
}

pub struct Application {
    name: String,
    config: AppConfig,
    addr: SocketAddr,
    db: Arc<Database>,
    context: AppContext,
    cors: CorsPolicy,
    tasks: TaskTracker,
    state: Mutex<AppState>,
}

impl Application {
    /// All dependencies are injected; a bad bind address is reported here rather than at `init`.
    pub fn new(
        name: impl Into<String>,
        config: AppConfig,
        db: Arc<Database>,
        repository: Arc<dyn Repository>,
    ) -> Result<Self> {
        let addr = config.server.bind_addr()?;
        let cors = CorsPolicy::from_config(&config.cors);
        let context = AppContext::new(repository, Arc::new(EntityCache::new()));

        Ok(Self {
            name: name.into(),
            config,
            addr,
            db,
            context,
            cors,
            tasks: TaskTracker::new(),
            state: Mutex::new(AppState::default()),
        })
    }

    /// Replace the origin policy, e.g. with a production predicate
    pub fn with_cors_policy(mut self, cors: CorsPolicy) -> Self {
        self.cors = cors;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Wait-group for background work that shutdown should drain
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn spawn_background<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    pub fn check_origin(&self, origin: &str) -> bool {
        self.cors.origin_allowed(origin)
    }

    /// Build the router and the server around it.
    pub async fn init(&self) {
        let mut state = self.state.lock().await;

        info!("{} App Route initializing", self.name);
        let routes = RouteRegistrar::new();
        state.server = Some(self.build_server(&routes, CancellationToken::new()));
        state.routes = Some(routes);

        if self.cors.is_permissive() {
            warn!(
                app = %self.name,
                "CORS accepts every origin; configure cors.allowed_origins for production"
            );
        }
        info!(
            app = %self.name,
            prefix = %self.config.server.path_prefix,
            read_timeout = ?self.config.server.read_timeout(),
            write_timeout = ?self.config.server.write_timeout(),
            idle_timeout = ?Duration::from_secs(self.config.server.idle_timeout_secs),
            "Server ready on {}",
            self.addr
        );
    }

    fn build_server(&self, routes: &RouteRegistrar, force: CancellationToken) -> HttpServer {
        HttpServer::build(
            self.addr,
            &self.config.server,
            routes.router(),
            self.context.clone(),
            &self.cors,
            force,
        )
    }

    /// Register each module's routes in the given order. Earlier modules win on overlap.
    pub async fn register_all_controller_routes(
        &self,
        modules: &[Arc<dyn Module>],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let routes = state
            .routes
            .as_mut()
            .ok_or(LoanAppError::NotInitialized("init() must run before registering routes"))?;

        for module in modules {
            routes.for_module(module.name());
            module.register_routes(routes);
        }
        info!(
            routes = routes.routes().len(),
            skipped = routes.skipped().len(),
            "Registered controller routes"
        );
        Ok(())
    }

    pub async fn registered_routes(&self) -> Vec<RegisteredRoute> {
        self.state
            .lock()
            .await
            .routes
            .as_ref()
            .map(|r| r.routes().to_vec())
            .unwrap_or_default()
    }

    /// Run both migration phases, each on a blocking thread under the configured timeout.
    pub async fn table_migration(&self, modules: &[Arc<dyn Module>]) -> Result<MigrationReport> {
        let _state = self.state.lock().await;
        let limit = self.config.database.migration_timeout_secs;

        let (db, phase_modules) = (self.db.clone(), modules.to_vec());
        let migrated = run_phase("local tables", limit, move || {
            migration::run_local_migrations(&db, &phase_modules)
        })
        .await?;

        let db = self.db.clone();
        let owned = migration::owned_tables(modules);
        let mut report = run_phase("foreign keys", limit, move || {
            migration::apply_foreign_keys(&db, FOREIGN_KEYS, &owned)
        })
        .await?;

        report.modules_migrated = migrated;
        info!(
            app = %self.name,
            modules = report.modules_migrated.len(),
            added = report.foreign_keys_added.len(),
            present = report.foreign_keys_present.len(),
            skipped = report.foreign_keys_skipped.len(),
            "Schema migration complete"
        );
        Ok(report)
    }

    /// Populate the entity cache; call after migration
    pub async fn load_caches(&self) -> Result<()> {
        self.context
            .cache
            .load_all(self.context.repository.as_ref())
            .await
    }

    /// The service `start_server` would serve right now
    pub async fn service(&self) -> Result<AppService> {
        let state = self.state.lock().await;
        let routes = state
            .routes
            .as_ref()
            .ok_or(LoanAppError::NotInitialized("init() must run before building the service"))?;
        Ok(self.build_server(routes, CancellationToken::new()).service())
    }

    /// Address the server built by `init` will bind
    pub async fn server_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.server.as_ref().map(|s| s.addr)
    }

    /// Address actually bound while serving
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.local_addr
    }

    /// Rebuild the server over the current routes and serve until stopped.
    ///
    /// Returns `Ok(())` after a shutdown requested by [`Application::stop_server`], including
    /// a forced one; a bind failure is returned as the terminal error.
    pub async fn start_server(&self) -> Result<()> {
        let span = info_span!("app", name = %self.name);

        let (listener, server, control) = {
            let mut state = self.state.lock().await;
            if state.running.is_some() {
                return Err(LoanAppError::Server("server already running".to_string()));
            }
            let routes = state
                .routes
                .as_ref()
                .ok_or(LoanAppError::NotInitialized("init() must run before start_server()"))?;

            let control = ServerControl::new();
            let server = self.build_server(routes, control.force.clone());
            let listener = TcpListener::bind(server.addr).await.map_err(|e| {
                error!(parent: &span, "Failed to bind {}: {}", server.addr, e);
                LoanAppError::Server(format!("failed to bind {}: {e}", server.addr))
            })?;

            state.local_addr = Some(listener.local_addr()?);
            state.server = Some(server.clone());
            state.running = Some(control.clone());
            self.tasks.reopen();
            (listener, server, control)
        };

        info!(parent: &span, "Server exposed on {}", self.addr);
        server
            .serve(listener, control.graceful.clone(), control.force.clone())
            .instrument(span.clone())
            .await;
        control.finished.cancel();

        let mut state = self.state.lock().await;
        state.running = None;
        state.local_addr = None;
        info!(parent: &span, "Server stopped");
        Ok(())
    }

    /// Stop accepting connections and drain in-flight requests and tracked tasks.
    ///
    /// Requests still running when the grace period elapses are terminated. Never waits
    /// longer than the grace period.
    pub async fn stop_server(&self) -> ShutdownOutcome {
        let grace = self.config.server.shutdown_grace();
        let control = self.state.lock().await.running.take();
        self.tasks.close();

        let Some(control) = control else {
            info!(app = %self.name, "Server not running, nothing to stop");
            return ShutdownOutcome::NotRunning;
        };

        control.graceful.cancel();
        let drained = tokio::time::timeout(grace, async {
            control.finished.cancelled().await;
            self.tasks.wait().await;
        })
        .await;

        match drained {
            Ok(()) => {
                info!(app = %self.name, "Server shut down gracefully");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                control.force.cancel();
                warn!(app = %self.name, "Server forced to shutdown after {:?} grace period", grace);
                ShutdownOutcome::Forced
            }
        }
    }
}

async fn run_phase<T, F>(phase: &'static str, limit_secs: u64, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let limit = Duration::from_secs(limit_secs);
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(LoanAppError::Task(format!("{phase}: {e}"))),
        Err(_) => {
            error!(phase, "Migration phase timed out");
            Err(LoanAppError::MigrationTimeout {
                phase,
                secs: limit_secs,
            })
        }
    }
}
