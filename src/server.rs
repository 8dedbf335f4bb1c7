use crate::app::context::AppContext;
use crate::config::{CorsConfig, ServerConfig};
use crate::constants::{TOKEN_HEADER, TOTAL_COUNT_HEADER};
use axum::extract::{Request, State};
use axum::http::header::{ACCESS_CONTROL_REQUEST_METHOD, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, ServiceExt};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub type OriginPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The service handed to the listener
pub type AppService = NormalizePath<Router>;

/// Cross-origin policy: allowed headers, allowed methods and an origin predicate.
#[derive(Clone)]
pub struct CorsPolicy {
    allowed_headers: Vec<HeaderName>,
    allowed_methods: Vec<Method>,
    check_origin: OriginPredicate,
    permissive: bool,
}

impl fmt::Debug for CorsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorsPolicy")
            .field("allowed_headers", &self.allowed_headers)
            .field("allowed_methods", &self.allowed_methods)
            .field("permissive", &self.permissive)
            .finish()
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl CorsPolicy {
    /// Accepts every origin. Only suitable for development.
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::with_origin_predicate(|_| true)
        }
    }

    pub fn with_origin_predicate<F>(check_origin: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            allowed_headers: vec![
                CONTENT_TYPE,
                HeaderName::from_static(TOTAL_COUNT_HEADER),
                HeaderName::from_static(TOKEN_HEADER),
            ],
            allowed_methods: vec![
                Method::POST,
                Method::PUT,
                Method::GET,
                Method::DELETE,
                Method::OPTIONS,
            ],
            check_origin: Arc::new(check_origin),
            permissive: false,
        }
    }

    /// Allow-list of origins when configured, the permissive default otherwise
    pub fn from_config(config: &CorsConfig) -> Self {
        if config.allowed_origins.is_empty() {
            return Self::permissive();
        }
        let allowed = config.allowed_origins.clone();
        Self::with_origin_predicate(move |origin| {
            allowed.iter().any(|a| a.eq_ignore_ascii_case(origin))
        })
    }

    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        (self.check_origin)(origin)
    }

    pub fn method_allowed(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    fn layer(&self) -> CorsLayer {
        let check_origin = self.check_origin.clone();
        CorsLayer::new()
            .allow_headers(self.allowed_headers.clone())
            .allow_methods(self.allowed_methods.clone())
            .expose_headers([HeaderName::from_static(TOTAL_COUNT_HEADER)])
            .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
                origin.to_str().map(|o| check_origin(o)).unwrap_or(false)
            }))
    }
}

/// Rejects a cross-origin request, or a preflight, whose method the policy does not allow.
async fn reject_disallowed_methods(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    if let Some(origin) = headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        let method = if request.method() == Method::OPTIONS {
            headers
                .get(ACCESS_CONTROL_REQUEST_METHOD)
                .and_then(|v| Method::from_bytes(v.as_bytes()).ok())
        } else {
            Some(request.method().clone())
        };

        if let Some(method) = method {
            if policy.origin_allowed(origin) && !policy.method_allowed(&method) {
                debug!(%method, origin, "Rejected cross-origin request method");
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
        }
    }
    next.run(request).await
}

/// Drops a still-running request once `force` is cancelled at the end of the grace period.
async fn force_close(
    State(force): State<CancellationToken>,
    request: Request,
    next: Next,
) -> Response {
    tokio::select! {
        response = next.run(request) => response,
        _ = force.cancelled() => {
            (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response()
        }
    }
}

pub(crate) async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "loan_app",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Extra time a force-closed connection gets to flush the 503s written by `force_close`
const FORCE_FLUSH: Duration = Duration::from_millis(100);

/// Pause after a failed `accept`, e.g. when the process is out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A fully assembled HTTP server, ready to be bound
#[derive(Clone)]
pub struct HttpServer {
    pub addr: SocketAddr,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    service: AppService,
}

impl HttpServer {
    /// The single construction path for the server.
    ///
    /// Module routes (including `/health`) are nested under the configured prefix, then wrapped
    /// with (outermost first) tracing, the method guard, CORS, the read and write timeouts
    /// and the force-close switch. Trailing slashes are trimmed before routing.
    pub fn build(
        addr: SocketAddr,
        config: &ServerConfig,
        routes: Router<AppContext>,
        context: AppContext,
        cors: &CorsPolicy,
        force: CancellationToken,
    ) -> Self {
        let api = routes.with_state(context);

        let prefix = config.path_prefix.trim_end_matches('/');
        let router = if prefix.is_empty() {
            api
        } else {
            Router::new().nest(prefix, api)
        };

        let router = router
            .layer(middleware::from_fn_with_state(force, force_close))
            .layer(TimeoutLayer::new(config.write_timeout()))
            .layer(RequestBodyTimeoutLayer::new(config.read_timeout()))
            .layer(cors.layer())
            .layer(middleware::from_fn_with_state(
                Arc::new(cors.clone()),
                reject_disallowed_methods,
            ))
            .layer(TraceLayer::new_for_http());

        Self {
            addr,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            service: NormalizePathLayer::trim_trailing_slash().layer(router),
        }
    }

    pub fn service(&self) -> AppService {
        self.service.clone()
    }

    /// Accept connections until `graceful` is cancelled, then drain the open ones.
    ///
    /// Request headers must arrive within the read timeout and a connection with no request
    /// for the idle timeout is closed. Once `force` is cancelled every remaining connection
    /// is dropped, so this returns shortly after.
    pub async fn serve(
        &self,
        listener: TcpListener,
        graceful: CancellationToken,
        force: CancellationToken,
    ) {
        let connections = TaskTracker::new();

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
                _ = graceful.cancelled() => break,
            };

            connections.spawn(serve_connection(
                stream,
                peer,
                self.service(),
                self.read_timeout,
                self.idle_timeout,
                graceful.clone(),
                force.clone(),
            ));
        }

        drop(listener);
        connections.close();
        debug!(open = connections.len(), "Stopped accepting, draining connections");
        connections.wait().await;
    }
}

/// Request bookkeeping for one connection, used to detect idleness
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    last_active_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_active_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.opened.elapsed().as_millis() as u64;
        self.last_active_ms.store(elapsed, Ordering::SeqCst);
    }

    fn begin(self: &Arc<Self>) -> ActiveRequest {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ActiveRequest(self.clone())
    }

    fn last_active(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_active_ms.load(Ordering::SeqCst))
    }

    /// Resolves once no request has been in flight for `limit`
    async fn idle_for(&self, limit: Duration) {
        loop {
            let busy = self.in_flight.load(Ordering::SeqCst) > 0;
            let wake = if busy {
                Instant::now() + limit
            } else {
                self.last_active() + limit
            };
            if !busy && Instant::now() >= wake {
                return;
            }
            tokio::time::sleep_until(wake).await;
        }
    }
}

struct ActiveRequest(Arc<Activity>);

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: AppService,
    header_read_timeout: Duration,
    idle_timeout: Duration,
    graceful: CancellationToken,
    force: CancellationToken,
) {
    let activity = Arc::new(Activity::new());
    let hyper_service = {
        let activity = activity.clone();
        service_fn(move |request: Request<Incoming>| {
            let active = activity.begin();
            let call = service.clone().oneshot(request);
            async move {
                let response = call.await;
                drop(active);
                response
            }
        })
    };

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout)
        .keep_alive(true);
    let conn = builder.serve_connection(TokioIo::new(stream), hyper_service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(%peer, "Connection closed with error: {}", e);
                }
                return;
            }
            _ = graceful.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = activity.idle_for(idle_timeout), if !draining => {
                debug!(%peer, "Closing idle connection");
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = force.cancelled() => {
                let _ = tokio::time::timeout(FORCE_FLUSH, conn.as_mut()).await;
                debug!(%peer, "Connection force-closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_accepts_any_origin() {
        let policy = CorsPolicy::default();
        assert!(policy.is_permissive());
        assert!(policy.origin_allowed("https://anything.example"));
        assert!(policy.method_allowed(&Method::DELETE));
        assert!(!policy.method_allowed(&Method::PATCH));
    }

    #[test]
    fn test_configured_origins_restrict() {
        let policy = CorsPolicy::from_config(&CorsConfig {
            allowed_origins: vec!["https://loans.example.com".to_string()],
        });
        assert!(!policy.is_permissive());
        assert!(policy.origin_allowed("https://loans.example.com"));
        assert!(!policy.origin_allowed("https://evil.example"));
    }
}
