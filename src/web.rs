//! Management web interface.
use std::{
    net::{self, SocketAddr},
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{net::TcpListener, runtime::Runtime, sync::oneshot};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{config::Config, error::ServiceError, service::Service, store::DataStore, vars};

/// Upper bound for handling one request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest request body accepted. No route reads a body.
const MAX_BODY_BYTES: usize = 16 * 1024;

const WORKER_THREADS: usize = 2;

const DEFAULT_GREETING: &str =
    "<h1>mailhub</h1>\n<p>A disposable mail server for development and testing.</p>\n";

/// Build and listener details reported at `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub version: String,
    pub build_date: String,
    pub smtp_listener: String,
    pub pop3_listener: String,
    pub web_listener: String,
}

impl StatusInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_date: option_env!("MAILHUB_BUILD_DATE")
                .unwrap_or("undefined")
                .to_string(),
            smtp_listener: config.smtp.address.to_string(),
            pop3_listener: config.pop3.address.to_string(),
            web_listener: config.web.address.to_string(),
        }
    }
}

struct WebState {
    greeting_file: Option<PathBuf>,
    status: StatusInfo,
    store: Arc<DataStore>,
}

#[allow(deprecated)]
fn router(state: Arc<WebState>) -> Router {
    Router::new()
        .route("/", get(greeting))
        .route("/status", get(status))
        .route("/debug/vars", get(debug_vars))
        .fallback(not_found)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

async fn greeting(State(state): State<Arc<WebState>>) -> Response {
    let Some(path) = &state.greeting_file else {
        return Html(DEFAULT_GREETING).into_response();
    };

    match tokio::fs::read_to_string(path).await {
        Ok(greeting) => Html(greeting).into_response(),
        Err(err) => {
            warn!("Failed to load greeting {}: {err}", path.display());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error\n",
            )
                .into_response()
        }
    }
}

async fn status(State(state): State<Arc<WebState>>) -> Json<Value> {
    let mailboxes = match state.store.mailbox_count() {
        Ok(count) => json!(count),
        Err(err) => {
            warn!("Failed to count mailboxes: {err}");
            Value::Null
        }
    };

    Json(json!({
        "version": state.status.version,
        "build_date": state.status.build_date,
        "started": vars::started_at().to_rfc3339(),
        "retention_minutes": state.store.retention_minutes(),
        "smtp_listener": state.status.smtp_listener,
        "pop3_listener": state.status.pop3_listener,
        "web_listener": state.status.web_listener,
        "mailboxes": mailboxes,
    }))
}

async fn debug_vars() -> Json<Value> {
    Json(vars::snapshot())
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 Not Found\n")
}

/// Web listener on its own small tokio runtime. Supports start and stop only; `stop`
/// begins a graceful shutdown and returns without waiting for requests in flight.
pub struct WebServer {
    addr: SocketAddr,
    state: Arc<WebState>,
    runtime: Runtime,
    local_addr: OnceLock<SocketAddr>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl WebServer {
    pub fn new(config: &Config, store: Arc<DataStore>) -> Result<Self, ServiceError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("web-worker")
            .enable_all()
            .build()
            .map_err(|source| ServiceError::Listener {
                service: "web".into(),
                source,
            })?;

        Ok(Self {
            addr: config.web.address,
            state: Arc::new(WebState {
                greeting_file: config.web.greeting_file.clone(),
                status: StatusInfo::from_config(config),
                store,
            }),
            runtime,
            local_addr: OnceLock::new(),
            shutdown: Mutex::new(None),
        })
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    fn bind(&self) -> Result<TcpListener, ServiceError> {
        let listener = net::TcpListener::bind(self.addr).map_err(|source| ServiceError::Bind {
            service: "web".into(),
            addr: self.addr,
            source,
        })?;
        let listener_error = |source| ServiceError::Listener {
            service: "web".into(),
            source,
        };
        listener.set_nonblocking(true).map_err(listener_error)?;
        let local = listener.local_addr().map_err(listener_error)?;

        let _guard = self.runtime.enter();
        let listener = TcpListener::from_std(listener).map_err(listener_error)?;
        let _ = self.local_addr.set(local);
        info!("web listening on {local}");
        Ok(listener)
    }
}

impl Service for WebServer {
    fn start(&self) -> Result<(), ServiceError> {
        let listener = self.bind()?;
        let (tx, rx) = oneshot::channel();
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let app = router(Arc::clone(&self.state));
        self.runtime.spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("web server failed: {err}");
            }
            info!("web listener closed");
        });
        Ok(())
    }

    fn stop(&self) {
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
    }
}
