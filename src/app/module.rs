use super::context::AppContext;
use crate::server::health;
use crate::db::Database;
use crate::error::Result;
use crate::schema::TableSchema;
use axum::handler::Handler;
use axum::http::Method;
use axum::routing::{self, MethodRouter};
use axum::Router;
use tracing::{debug, warn};

/// A feature unit composed into the application: it owns its tables and its routes.
///
/// The application only ever talks to features through this trait, so features can be
/// registered in any order and added without touching the orchestrator.
pub trait Module: Send + Sync {
    /// Identity used in logs and migration errors
    fn name(&self) -> &'static str;

    /// Tables owned by this module, without cross-module constraints
    fn tables(&self) -> Vec<TableSchema>;

    /// Attach this module's handlers to the shared router
    fn register_routes(&self, routes: &mut RouteRegistrar);

    /// Create or update this module's own tables. Must be idempotent.
    fn table_migration(&self, db: &Database) -> Result<()> {
        for table in self.tables() {
            db.ensure_table(&table)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredRoute {
    pub module: &'static str,
    pub method: Method,
    pub path: String,
}

/// Collects routes from modules in registration order.
///
/// Precedence follows registration order. A later route is skipped and recorded when it
/// repeats an earlier `(method, pattern)` pair, or when the router would hand it requests
/// an earlier pattern already matches (a static `/users/me` registered after
/// `/users/:id`), or when the two patterns cannot coexist in the router.
pub struct RouteRegistrar {
    router: Router<AppContext>,
    routes: Vec<RegisteredRoute>,
    skipped: Vec<RegisteredRoute>,
    module: &'static str,
}

impl Default for RouteRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteRegistrar {
    /// A registrar that already owns `GET /health`
    pub fn new() -> Self {
        let mut registrar = Self {
            router: Router::new(),
            routes: Vec::new(),
            skipped: Vec::new(),
            module: "app",
        };
        registrar.get("/health", health);
        registrar
    }

    /// Attribute subsequent registrations to `module`
    pub fn for_module(&mut self, module: &'static str) -> &mut Self {
        self.module = module;
        self
    }

    pub fn get<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        self.add(Method::GET, path, routing::get(handler))
    }

    pub fn post<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        self.add(Method::POST, path, routing::post(handler))
    }

    pub fn put<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        self.add(Method::PUT, path, routing::put(handler))
    }

    pub fn delete<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        self.add(Method::DELETE, path, routing::delete(handler))
    }

    fn add(
        &mut self,
        method: Method,
        path: &str,
        method_router: MethodRouter<AppContext>,
    ) -> &mut Self {
        let taken = self.routes.iter().find(|r| match overlap(&r.path, path) {
            Overlap::Same => r.method == method,
            Overlap::Shadows => true,
            Overlap::Disjoint => false,
        });

        if let Some(existing) = taken {
            warn!(
                module = self.module,
                %method,
                path,
                owner = existing.module,
                owner_path = %existing.path,
                "Route overlaps one registered by an earlier module, skipping"
            );
            self.skipped.push(RegisteredRoute {
                module: self.module,
                method,
                path: path.to_string(),
            });
            return self;
        }

        let canonical = self.canonical_path(path);
        debug!(module = self.module, %method, path = %canonical, "Registering route");
        let router = std::mem::take(&mut self.router);
        self.router = router.route(&canonical, method_router);
        self.routes.push(RegisteredRoute {
            module: self.module,
            method,
            path: canonical,
        });
        self
    }

    /// Reuse the parameter names of earlier routes that share a prefix with `path`; the
    /// router rejects two names for the same parameter position.
    fn canonical_path(&self, path: &str) -> String {
        let raw = split(path);
        let mut canonical: Vec<&str> = raw.clone();

        for (i, part) in raw.iter().enumerate() {
            let kind = Segment::parse(part);
            if matches!(kind, Segment::Static(_)) {
                continue;
            }
            let earlier = self.routes.iter().find_map(|r| {
                let existing = split(&r.path);
                let shared_prefix = existing.len() > i
                    && (0..i).all(|j| Segment::parse(existing[j]) == Segment::parse(canonical[j]));
                (shared_prefix && Segment::parse(existing[i]) == kind).then_some(existing[i])
            });
            if let Some(name) = earlier {
                canonical[i] = name;
            }
        }

        if canonical.len() <= 1 {
            return "/".to_string();
        }
        canonical.join("/")
    }

    pub fn routes(&self) -> &[RegisteredRoute] {
        &self.routes
    }

    pub fn skipped(&self) -> &[RegisteredRoute] {
        &self.skipped
    }

    pub(crate) fn router(&self) -> Router<AppContext> {
        self.router.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Static(&'a str),
    Param,
    CatchAll,
}

impl<'a> Segment<'a> {
    fn parse(segment: &'a str) -> Self {
        match segment.chars().next() {
            Some(':') => Segment::Param,
            Some('*') => Segment::CatchAll,
            _ => Segment::Static(segment),
        }
    }
}

fn split(path: &str) -> Vec<&str> {
    path.trim_end_matches('/').split('/').collect()
}

/// How a later pattern relates to an earlier one
#[derive(Debug, PartialEq, Eq)]
enum Overlap {
    Disjoint,
    /// Same pattern up to parameter names
    Same,
    /// Some request matches both and the router would pick the later pattern, or the
    /// router cannot hold both
    Shadows,
}

fn overlap(earlier: &str, later: &str) -> Overlap {
    let (earlier, later) = (split(earlier), split(later));
    // Decided at the first position where the segment kinds differ
    let mut later_wins = None;

    for (a, b) in earlier.iter().zip(&later) {
        let (a, b) = (Segment::parse(a), Segment::parse(b));
        let verdict = match (a, b) {
            (Segment::Static(x), Segment::Static(y)) if x != y => return Overlap::Disjoint,
            (Segment::Static(_), Segment::Static(_)) | (Segment::Param, Segment::Param) => None,
            (Segment::Static(_), Segment::Param) => Some(false),
            (Segment::Param, Segment::Static(_)) => Some(true),
            // Catch-alls only coexist with identical prefixes
            (Segment::CatchAll, _) | (_, Segment::CatchAll) => {
                return match later_wins {
                    Some(false) => Overlap::Disjoint,
                    Some(true) => Overlap::Shadows,
                    None if a == b => Overlap::Same,
                    None => Overlap::Shadows,
                };
            }
        };
        later_wins = later_wins.or(verdict);
    }

    if earlier.len() != later.len() {
        return Overlap::Disjoint;
    }
    match later_wins {
        None => Overlap::Same,
        Some(true) => Overlap::Shadows,
        Some(false) => Overlap::Disjoint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_by_segment() {
        assert_eq!(overlap("/users/:id", "/users/:user_id"), Overlap::Same);
        assert_eq!(overlap("/admins/", "/admins"), Overlap::Same);
        assert_eq!(overlap("/users/:id", "/users/me"), Overlap::Shadows);
        assert_eq!(overlap("/users/me", "/users/:id"), Overlap::Disjoint);
        assert_eq!(overlap("/users/:id/posts", "/users/me/comments"), Overlap::Disjoint);
        assert_eq!(overlap("/files/*rest", "/files/readme"), Overlap::Shadows);
        assert_eq!(overlap("/users", "/users/:id"), Overlap::Disjoint);
    }

    #[test]
    fn test_first_registration_wins() {
        let mut routes = RouteRegistrar::new();
        routes.for_module("first").get("/items/:id", || async { "first" });
        routes.for_module("second").get("/items/:item_id", || async { "second" });
        routes.for_module("second").post("/items/:item_id", || async { "created" });

        let items: Vec<_> = routes
            .routes()
            .iter()
            .filter(|r| r.path.starts_with("/items"))
            .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].module, "first");
        assert_eq!(items[1].path, "/items/:id");
        assert_eq!(routes.skipped().len(), 1);
        assert_eq!(routes.skipped()[0].module, "second");
    }

    #[test]
    fn test_later_static_route_cannot_take_over_parameter() {
        let mut routes = RouteRegistrar::new();
        routes.for_module("first").get("/users/:id", || async { "first" });
        routes.for_module("second").post("/users/me", || async { "second" });
        routes.for_module("second").get("/users/:id/loans", || async { "loans" });

        assert_eq!(routes.skipped().len(), 1);
        assert_eq!(routes.skipped()[0].path, "/users/me");
        assert!(routes.routes().iter().any(|r| r.path == "/users/:id/loans"));
    }

    #[test]
    fn test_parameter_names_follow_earlier_routes() {
        let mut routes = RouteRegistrar::new();
        routes.for_module("first").get("/users/:id", || async { "first" });
        routes.for_module("second").get("/users/:user_id/loans", || async { "loans" });

        assert_eq!(routes.routes().last().unwrap().path, "/users/:id/loans");
    }

    #[test]
    fn test_health_is_reserved() {
        let mut routes = RouteRegistrar::new();
        routes.for_module("ops").get("/health", || async { "mine" });

        assert_eq!(routes.routes()[0].module, "app");
        assert_eq!(routes.skipped()[0].module, "ops");
    }
}
