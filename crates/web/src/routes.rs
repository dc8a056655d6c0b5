//! HTTP API routes

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use peergate_common::validate::{validate_name, validate_public_key};
use peergate_common::{AuthMethod, Error, Peer, PoolStatus, UnauthorizedReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::{AuthPolicy, CredentialAuthority};
use crate::provisioner::{ClientConfig, Provisioner};

// ============================================================================
// State
// ============================================================================

pub struct AppState {
    pub authority: CredentialAuthority,
    pub provisioner: Provisioner,
}

impl AppState {
    fn authorize(&self, headers: &HeaderMap, policy: AuthPolicy) -> Result<AuthMethod, ApiError> {
        let header = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Ok(self.authority.authorize(header, policy)?)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/peers", get(list_peers_handler).post(create_peer_handler))
        .route(
            "/api/peers/:name",
            get(get_peer_handler).delete(delete_peer_handler),
        )
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// `Error` rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidInput(rejection.body_text()))
    }
}

pub fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized {
            reason: UnauthorizedReason::MasterRequired,
        } => StatusCode::FORBIDDEN,
        Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::PoolExhausted { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });

        match &self.0 {
            Error::Unauthorized { reason } => {
                body["reason"] = serde_json::json!(reason);
            }
            Error::ExternalFailure(failure) => {
                body["exit_status"] = serde_json::json!(failure.exit_status);
                body["output"] = serde_json::json!(failure.output);
            }
            Error::Io(_) | Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                error!("Request failed: {}", self.0);
            }
            _ => {}
        }

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Bearer")], Json(body)).into_response();
        }
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePeerRequest {
    pub name: String,
    #[serde(alias = "pubkey")]
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePeerResponse {
    pub name: String,
    pub public_key: String,
    pub created: bool,
    pub auth_method: AuthMethod,
    #[serde(flatten)]
    pub config: ClientConfig,
}

#[derive(Debug, Serialize)]
pub struct PeerResponse {
    pub name: String,
    pub public_key: String,
    pub pool_id: u32,
    pub created_at: i64,
    #[serde(flatten)]
    pub config: ClientConfig,
}

#[derive(Debug, Serialize)]
pub struct PeerListResponse {
    pub peers: Vec<Peer>,
    pub pool: PoolStatus,
}

#[derive(Debug, Serialize)]
pub struct DeletePeerResponse {
    pub deleted: bool,
    pub name: String,
    pub address: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "peergated",
        "version": peergate_common::VERSION,
    }))
}

/// Body is validated before authorization so a bad request never spends
/// an enrollment token.
async fn create_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreatePeerRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    validate_name(&req.name).map_err(Error::from)?;
    validate_public_key(&req.public_key).map_err(Error::from)?;

    let auth_method = state.authorize(&headers, AuthPolicy::MasterOrEnrollment)?;

    let provisioned = state
        .provisioner
        .create_peer(&req.name, &req.public_key)
        .await?;
    let config = state.provisioner.client_config(&provisioned.peer);
    let status = if provisioned.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let response = CreatePeerResponse {
        name: provisioned.peer.name,
        public_key: provisioned.peer.public_key,
        created: provisioned.created,
        auth_method,
        config,
    };
    Ok((status, Json(response)).into_response())
}

async fn list_peers_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PeerListResponse>, ApiError> {
    state.authorize(&headers, AuthPolicy::MasterOnly)?;
    Ok(Json(PeerListResponse {
        peers: state.provisioner.list_peers()?,
        pool: state.provisioner.pool_status()?,
    }))
}

async fn get_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<PeerResponse>, ApiError> {
    state.authorize(&headers, AuthPolicy::MasterOnly)?;
    let peer = state.provisioner.get_peer(&name)?;
    let config = state.provisioner.client_config(&peer);
    Ok(Json(PeerResponse {
        name: peer.name,
        public_key: peer.public_key,
        pool_id: peer.pool_id,
        created_at: peer.created_at,
        config,
    }))
}

async fn delete_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<DeletePeerResponse>, ApiError> {
    state.authorize(&headers, AuthPolicy::MasterOnly)?;
    let peer = state.provisioner.delete_peer(&name).await?;
    Ok(Json(DeletePeerResponse {
        deleted: true,
        name: peer.name,
        address: peer.address,
    }))
}

async fn not_found_handler() -> ApiError {
    ApiError(Error::NotFound {
        kind: "route".to_string(),
        id: "unknown".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use peergate_common::ExternalFailure;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (
                Error::unauthorized(UnauthorizedReason::Missing),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::unauthorized(UnauthorizedReason::InvalidOrExpired),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::unauthorized(UnauthorizedReason::MasterRequired),
                StatusCode::FORBIDDEN,
            ),
            (Error::peer_not_found("x"), StatusCode::NOT_FOUND),
            (Error::Conflict("dup".into()), StatusCode::CONFLICT),
            (Error::PoolExhausted { max_id: 15 }, StatusCode::CONFLICT),
            (
                Error::ExternalFailure(ExternalFailure {
                    exit_status: Some(1),
                    output: String::new(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Error::Inconsistent("diverged".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{:?}", err);
        }
    }

    #[test]
    fn test_create_request_shape() {
        let req: CreatePeerRequest =
            serde_json::from_str(r#"{"name":"laptop","pubkey":"abc"}"#).unwrap();
        assert_eq!(req.public_key, "abc");

        assert!(serde_json::from_str::<CreatePeerRequest>(
            r#"{"name":"laptop","public_key":"abc","admin":true}"#
        )
        .is_err());
        assert!(serde_json::from_str::<CreatePeerRequest>(r#"{"name":"laptop"}"#).is_err());
    }
}
