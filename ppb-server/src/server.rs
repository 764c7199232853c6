use crate::config::{ServerConfig, TokenIssuancePolicy};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use ppb_core::token_gate::parse_bearer;
use ppb_core::{
    AuthDecision, BlobMeta, BlobStore, MetadataStore, PpbError, ReadBlobOperation,
    ReadBlobOperationOutcome, ReadBlobOperationRequest, Result, SaveBlobOperation,
    SaveBlobOperationRequest, TokenGate, TokenIssuer,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub config: ServerConfig,
    pub save_blob: SaveBlobOperation,
    pub read_blob: ReadBlobOperation,
    pub token_gate: TokenGate,
    pub token_issuer: TokenIssuer,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let layout = config.layout();
        let blob_store = BlobStore::new(&layout, config.max_upload_bytes);
        let metadata_store = MetadataStore::new(&layout);

        Self {
            save_blob: SaveBlobOperation::new(blob_store.clone(), metadata_store),
            read_blob: ReadBlobOperation::new(blob_store),
            token_gate: TokenGate::new(&config.tokens_path),
            token_issuer: TokenIssuer::new(&config.tokens_path),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    meta: BlobMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let layout = config.layout();
    layout.ensure()?;
    layout.clear_staging().await?;

    if config.token_issuance_policy() == TokenIssuancePolicy::Open {
        tracing::warn!("POST /token is open: any client can mint upload tokens");
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(ServerState::new(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_handler))
        .route("/upload", post(upload_handler))
        .route("/raw/:identifier", get(raw_handler))
        .route("/token", post(token_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn upload_handler(
    State(state): State<Arc<ServerState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let remote = remote_addr(&connect_info);

    if let Err(error) = authorize(&state.token_gate, &headers).await {
        tracing::warn!("Rejected upload from {}: {}", remote, error);
        return error_response(&error, "upload failed");
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(
                "Upload rejected: body from {} exceeds max {}",
                remote,
                state.config.max_upload_bytes
            );
            return json_error(StatusCode::PAYLOAD_TOO_LARGE, "file too large");
        }
        Err(rejection) => {
            tracing::warn!("Failed to read upload body from {}: {}", remote, rejection);
            return json_error(rejection.status(), "invalid request body");
        }
    };

    let request = SaveBlobOperationRequest {
        body,
        base_url: base_url(&state.config, &headers),
    };

    match state.save_blob.run(request).await {
        Ok(result) => {
            tracing::info!("Upload successful from {}", remote);
            let response = UploadResponse {
                meta: result.meta,
                url: result.url,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => error_response(&error, "upload failed"),
    }
}

async fn raw_handler(
    State(state): State<Arc<ServerState>>,
    Path(identifier): Path<String>,
) -> Response {
    let request = ReadBlobOperationRequest { identifier };

    match state.read_blob.run(request).await {
        Ok(ReadBlobOperationOutcome::Found(result)) => {
            let content_type = if std::str::from_utf8(&result.body).is_ok() {
                "text/plain; charset=utf-8"
            } else {
                "application/octet-stream"
            };
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                result.body,
            )
                .into_response()
        }
        Ok(ReadBlobOperationOutcome::NotFound) => json_error(StatusCode::NOT_FOUND, "not found"),
        Err(error) => error_response(&error, "read failed"),
    }
}

async fn token_handler(
    State(state): State<Arc<ServerState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let remote = remote_addr(&connect_info);

    match state.config.token_issuance_policy() {
        TokenIssuancePolicy::Disabled => {
            tracing::warn!("Token issuance attempt from {} while disabled", remote);
            return json_error(StatusCode::FORBIDDEN, "token issuance disabled");
        }
        TokenIssuancePolicy::Admin(admin_token) => {
            let presented = headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            match presented.and_then(parse_bearer) {
                None => {
                    tracing::warn!("Unauthorized token request from {}", remote);
                    return json_error(StatusCode::UNAUTHORIZED, "unauthorized");
                }
                Some(token) if !admin_token_matches(token, &admin_token) => {
                    tracing::warn!("Invalid admin token from {}", remote);
                    return json_error(StatusCode::UNAUTHORIZED, "invalid token");
                }
                Some(_) => {}
            }
        }
        TokenIssuancePolicy::Open => {}
    }

    match state.token_issuer.issue().await {
        Ok(token) => {
            tracing::info!("Generated new token from {}", remote);
            (StatusCode::CREATED, Json(TokenResponse { token })).into_response()
        }
        Err(error) => {
            tracing::error!("Token issuance failed: {}", error);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "token issuance failed")
        }
    }
}

async fn authorize(token_gate: &TokenGate, headers: &HeaderMap) -> Result<()> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let decision = token_gate.authorize(authorization).await;
    if decision != AuthDecision::Allowed {
        tracing::debug!("Authorization decision: {:?}", decision);
    }
    decision.into_result()
}

/// Constant-time comparison of a presented issuance credential.
fn admin_token_matches(presented: &str, admin_token: &str) -> bool {
    presented.as_bytes().ct_eq(admin_token.as_bytes()).into()
}

fn base_url(config: &ServerConfig, headers: &HeaderMap) -> Option<String> {
    if let Some(public_url) = &config.public_url {
        return Some(public_url.trim_end_matches('/').to_string());
    }

    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(|host| format!("http://{}", host))
}

fn remote_addr(connect_info: &Option<ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .as_ref()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Map a core error to its status code and fixed public message.
///
/// Client errors carry their `kind`; server errors are logged and answered
/// with the generic `failure` message.
fn error_response(error: &PpbError, failure: &str) -> Response {
    if !error.is_client_error() {
        tracing::error!("{} ({}): {}", failure, error.kind(), error);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, failure);
    }

    let (status, message) = match error {
        PpbError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "file too large"),
        PpbError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        PpbError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid token"),
        PpbError::AmbiguousShortHash(_) => (StatusCode::BAD_REQUEST, "ambiguous short hash"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    };
    let body = serde_json::json!({ "error": message, "kind": error.kind() });
    (status, Json(body)).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    (status, Json(body)).into_response()
}
