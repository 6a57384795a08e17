//! HTTP API for health checks, swap queries and operator actions

use crate::admin::AdminOps;
use crate::chain::ChainManager;
use crate::config::ApiConfig;
use crate::coordination::SwapIntake;
use crate::error::{RelayerError, RelayerResult};
use crate::state::{StateManager, SwapInfo, SwapKey, SwapRecord, SwapResultRecord};
use crate::status::VerifyStatus;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub state_manager: Arc<StateManager>,
    pub chain_manager: Arc<ChainManager>,
    pub admin: Arc<AdminOps>,
    pub intake: Arc<SwapIntake>,
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/swap/:chain_id/:tx_id/:log_index", get(get_swap))
        .route("/swapresult/:chain_id/:tx_id/:log_index", get(get_swap_result))
        .route("/swapresults", get(list_swap_results))
        .route("/swaps", post(register_swap))
        .route("/admin/passbigvalue", post(pass_big_value))
        .route("/admin/reswap", post(reswap))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("api bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

pub enum ApiError {
    Relayer(RelayerError),
    Unauthorized(&'static str),
}

impl From<RelayerError> for ApiError {
    fn from(e: RelayerError) -> Self {
        ApiError::Relayer(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.to_string()),
            ApiError::Relayer(e) => {
                let status = match &e {
                    RelayerError::NotFound { .. } | RelayerError::ChainNotFound { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    RelayerError::DuplicateKey { .. } | RelayerError::GuardViolation(_) => {
                        StatusCode::CONFLICT
                    }
                    RelayerError::InvalidKey(_) | RelayerError::InvalidSwap(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    e if e.is_store_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
                    e if e.is_retryable() => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .admin_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized("admin endpoints are disabled"))?;

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized("missing bearer token"))?;

    if !tokens_match(presented, expected) {
        return Err(ApiError::Unauthorized("invalid bearer token"));
    }
    Ok(())
}

/// Compare fixed-length digests without an early exit on the first mismatch
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = Keccak256::digest(presented.as_bytes());
    let expected = Keccak256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify store and chains
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.state_manager.health_check().await.is_ok();
    let chain_health = state.chain_manager.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if db_ok && chains_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: db_ok && chains_ok,
            database: db_ok,
            chains: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
                .collect(),
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: state.chain_manager.connected_chains(),
    })
}

async fn get_swap(
    State(state): State<AppState>,
    Path((chain_id, tx_id, log_index)): Path<(String, String, u32)>,
) -> Result<Json<SwapRecord>, ApiError> {
    let key = SwapKey::new(chain_id, tx_id, log_index)?;
    Ok(Json(state.state_manager.find_swap(&key).await?))
}

async fn get_swap_result(
    State(state): State<AppState>,
    Path((chain_id, tx_id, log_index)): Path<(String, String, u32)>,
) -> Result<Json<SwapResultRecord>, ApiError> {
    let key = SwapKey::new(chain_id, tx_id, log_index)?;
    Ok(Json(state.state_manager.find_swap_result(&key).await?))
}

/// Paginated listing; a negative limit lists the most recent first
async fn list_swap_results(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SwapResultRecord>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(-MAX_PAGE_SIZE, MAX_PAGE_SIZE);

    let results = state
        .state_manager
        .find_swap_results(
            query.chain_id.as_deref().unwrap_or_default(),
            query.address.as_deref().unwrap_or_default(),
            query.offset.unwrap_or_default(),
            limit,
        )
        .await?;
    Ok(Json(results))
}

async fn register_swap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(info): Json<SwapInfo>,
) -> Result<Json<RegisterResponse>, ApiError> {
    authorize(&state, &headers)?;
    let status = state.intake.register(&info).await?;
    Ok(Json(RegisterResponse { status }))
}

async fn pass_big_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdminRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state, &headers)?;
    state
        .admin
        .approve_big_value(&req.chain_id, &req.tx_id, req.log_index)
        .await?;
    Ok(Json(AdminResponse::success()))
}

async fn reswap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdminRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state, &headers)?;
    state
        .admin
        .force_reswap(&req.chain_id, &req.tx_id, req.log_index)
        .await?;
    Ok(Json(AdminResponse::success()))
}

// Request and response types

#[derive(Deserialize)]
struct ListQuery {
    chain_id: Option<String>,
    address: Option<String>,
    offset: Option<usize>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AdminRequest {
    pub chain_id: String,
    pub tx_id: String,
    pub log_index: u32,
}

#[derive(Serialize)]
struct AdminResponse {
    result: &'static str,
}

impl AdminResponse {
    fn success() -> Self {
        Self { result: "success" }
    }
}

#[derive(Serialize)]
struct RegisterResponse {
    status: VerifyStatus,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: String,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeBridge;
    use crate::chain::ChainBridge;
    use crate::coordination::results::fixtures::swap_info;
    use crate::state::MemorySwapStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn app() -> Router {
        let state_manager = Arc::new(StateManager::new(Arc::new(MemorySwapStore::new()), 100));
        let bridges: Vec<Arc<dyn ChainBridge>> = vec![Arc::new(FakeBridge::new("250"))];
        let chain_manager = Arc::new(ChainManager::from_bridges(bridges));

        router(AppState {
            admin: Arc::new(AdminOps::new(state_manager.clone(), chain_manager.clone())),
            intake: Arc::new(SwapIntake::with_thresholds(
                state_manager.clone(),
                HashMap::new(),
            )),
            state_manager,
            chain_manager,
            admin_token: Some("s3cret".to_string()),
        })
    }

    fn post_json(uri: &str, token: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_then_query() {
        let app = app();

        let response = app.clone().oneshot(get("/swap/56/0xabc/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = serde_json::to_string(&swap_info("56", "0xabc", 1)).unwrap();
        let response = app
            .clone()
            .oneshot(post_json("/swaps", Some("s3cret"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "not_swapped");

        // Index 0 matches any log of the source tx
        let response = app.clone().oneshot(get("/swap/56/0xabc/0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["key"], "56:0xabc:1");

        let response = app
            .oneshot(get("/swapresults?chain_id=56&address=0xalice&limit=-5"))
            .await
            .unwrap();
        let listed = json_body(response).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(listed[0]["status"], "empty");
    }

    #[test]
    fn test_token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cre", "s3cret"));
        assert!(!tokens_match("s3creT", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let app = app();
        let body = r#"{"chain_id":"chain1","tx_id":"0xabc","log_index":0}"#.to_string();

        let response = app
            .clone()
            .oneshot(post_json("/admin/passbigvalue", None, body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(post_json("/admin/passbigvalue", Some("wrong"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_guard_violation_is_conflict() {
        let app = app();
        let info = swap_info("56", "0xabc", 1);
        app.clone()
            .oneshot(post_json(
                "/swaps",
                Some("s3cret"),
                serde_json::to_string(&info).unwrap(),
            ))
            .await
            .unwrap();

        let body = r#"{"chain_id":"56","tx_id":"0xabc","log_index":1}"#.to_string();
        let response = app
            .clone()
            .oneshot(post_json("/admin/passbigvalue", Some("s3cret"), body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error = json_body(response).await;
        assert!(error["error"].as_str().unwrap().contains("not_swapped"));

        let response = app
            .oneshot(post_json("/admin/reswap", Some("s3cret"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_key_is_bad_request() {
        let response = app().oneshot(get("/swapresult/56/0x:bad/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
