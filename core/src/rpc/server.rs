use super::{ErrorBody, ScanRequest, ScanResponse, HEALTH_PATH, SCAN_PATH};
use crate::auth::AuthGuard;
use crate::cache::Origin;
use crate::error::{KuraError, Result};
use crate::scanner::Scanner;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const MAX_REQUEST_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    scanner: Scanner,
    guard: AuthGuard,
    request_timeout: Duration,
    sessions: Arc<AtomicU64>,
}

pub struct ScanServer {
    state: AppState,
}

impl ScanServer {
    pub fn new(scanner: Scanner, guard: AuthGuard) -> Self {
        Self {
            state: AppState {
                scanner,
                guard,
                request_timeout: Duration::from_secs(10 * 60),
                sessions: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.state.request_timeout = timeout;
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(SCAN_PATH, post(scan))
            .route(HEALTH_PATH, get(health))
            .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
            .with_state(self.state.clone())
    }

    pub async fn bind(listen: &str) -> Result<TcpListener> {
        TcpListener::bind(listen)
            .await
            .map_err(|e| KuraError::config(format!("failed to listen on {}: {}", listen, e)))
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().map_err(|e| KuraError::Transport {
            message: format!("listener has no local address: {}", e),
        })?;
        if self.state.guard.is_open() {
            tracing::warn!("no token configured; accepting unauthenticated requests");
        }
        tracing::info!(%addr, "scan server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| KuraError::Transport {
                message: format!("server on {} failed: {}", addr, e),
            })?;

        tracing::info!("scan server stopped");
        Ok(())
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Received,
    Authenticated,
    Resolved(Origin),
    Matched,
    Responded,
    Rejected,
}

/// One scan request moving through authentication, resolution and matching.
struct Session {
    id: u64,
    state: SessionState,
}

impl Session {
    fn new(id: u64) -> Self {
        tracing::debug!(session = id, state = ?SessionState::Received, "session started");
        Self {
            id,
            state: SessionState::Received,
        }
    }

    fn advance(&mut self, next: SessionState) {
        tracing::debug!(session = self.id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }

    async fn run(&mut self, state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<ScanResponse> {
        if let Err(e) = state.guard.check(headers) {
            self.advance(SessionState::Rejected);
            return Err(e);
        }
        self.advance(SessionState::Authenticated);

        let request: ScanRequest =
            serde_json::from_slice(body).map_err(|e| KuraError::InvalidRequest {
                message: format!("malformed scan request: {}", e),
            })?;
        tracing::info!(
            session = self.id,
            target = %request.target,
            digest = %request.digest,
            uploaded = request.blob.is_some(),
            "scan requested"
        );

        let mut warnings = Vec::new();
        let (info, origin) = state
            .scanner
            .resolve(&request.digest, request.blob.map(Arc::new), &mut warnings)
            .await?;
        self.advance(SessionState::Resolved(origin));

        let report = state
            .scanner
            .matched(&request.target, &request.digest, info, &request.options)
            .await?;
        self.advance(SessionState::Matched);

        Ok(ScanResponse { report, warnings })
    }
}

async fn scan(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let mut session = Session::new(state.sessions.fetch_add(1, Ordering::Relaxed));

    let result = match tokio::time::timeout(
        state.request_timeout,
        session.run(&state, &headers, &body),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(KuraError::Transport {
            message: format!("request deadline of {:?} exceeded", state.request_timeout),
        }),
    };

    match result {
        Ok(response) => {
            session.advance(SessionState::Responded);
            Json(response).into_response()
        }
        Err(e) => {
            if session.state != SessionState::Rejected {
                session.advance(SessionState::Responded);
            }
            ApiError(e).into_response()
        }
    }
}

struct ApiError(KuraError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KuraError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            KuraError::MissingBlob { .. } => StatusCode::NOT_FOUND,
            KuraError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match status {
            StatusCode::INTERNAL_SERVER_ERROR => tracing::error!("scan failed: {}", self.0),
            StatusCode::NOT_FOUND => tracing::debug!("{}", self.0),
            _ => tracing::warn!("scan rejected: {}", self.0),
        }

        (status, Json(ErrorBody::from_error(&self.0))).into_response()
    }
}
