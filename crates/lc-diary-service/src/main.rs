use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use clap::Parser;
use lc_diary_api::{AccountView, Credentials, DiaryApi, API_CONTRACT_VERSION};
use lc_diary_auth::{IssuedToken, TokenService};
use lc_diary_core::{
    ActivityDay, Caller, DiaryError, NewProblem, Problem, ProblemPatch, MAX_ACTIVITY_DAYS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Args, ServiceConfig};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct ServiceState {
    api: Arc<DiaryApi>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    kind: &'static str,
    error: String,
    #[serde(skip)]
    status: StatusCode,
}

#[derive(Debug, Clone, Deserialize)]
struct ActivityQuery {
    days: Option<i64>,
}

impl ActivityQuery {
    fn window(&self) -> Option<u16> {
        self.days.map(|days| {
            u16::try_from(days.clamp(1, i64::from(MAX_ACTIVITY_DAYS))).unwrap_or(MAX_ACTIVITY_DAYS)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct DeletedResponse {
    deleted: String,
}

impl From<DiaryError> for ServiceError {
    fn from(err: DiaryError) -> Self {
        let status = match &err {
            DiaryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DiaryError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            DiaryError::Forbidden(_) => StatusCode::FORBIDDEN,
            DiaryError::Conflict(_) => StatusCode::CONFLICT,
            DiaryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let (DiaryError::BadRequest(message)
        | DiaryError::Unauthenticated(message)
        | DiaryError::Forbidden(message)
        | DiaryError::Conflict(message)
        | DiaryError::Internal(message)) = &err;

        Self {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            kind: err.as_str(),
            error: message.clone(),
            status,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ServiceError {
    DiaryError::BadRequest(message.into()).into()
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

/// The identity behind a request. Resolved from the `Authorization` header
/// before any body extractor runs, so a bad token never reaches the store.
#[derive(Debug, Clone, Copy)]
struct ResolvedCaller(Caller);

#[axum::async_trait]
impl FromRequestParts<ServiceState> for ResolvedCaller {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(header::AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| {
                tracing::debug!("authorization header is not visible ASCII");
                ServiceError::from(DiaryError::Unauthenticated(
                    "invalid authorization header".to_string(),
                ))
            })?),
            None => None,
        };
        Ok(Self(state.api.resolve_caller(header)?))
    }
}

/// Run one API call on the blocking pool; store access and password hashing
/// are synchronous.
async fn run_api<T, F>(state: &ServiceState, op: F) -> Result<T, ServiceError>
where
    F: FnOnce(&DiaryApi) -> Result<T, DiaryError> + Send + 'static,
    T: Send + 'static,
{
    let api = Arc::clone(&state.api);
    let joined = tokio::task::spawn_blocking(move || op(&api)).await.map_err(|err| {
        tracing::error!(error = %err, "api task failed");
        ServiceError::from(DiaryError::Internal("internal server error".to_string()))
    })?;
    Ok(joined?)
}

fn cors_layer(config: &ServiceConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(config.allowed_origins.clone()))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
}

fn app(state: ServiceState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/me", get(me))
        .route("/api/problems", get(list_problems).post(create_problem))
        .route("/api/problems/activity", get(activity))
        .route("/api/problems/export", get(export_csv))
        .route("/api/problems/:id", patch(update_problem).delete(delete_problem))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_args(Args::parse())?;
    let api = DiaryApi::new(config.db.clone(), TokenService::new(&config.secret), config.token_ttl);
    let schema = api.migrate()?;
    tracing::info!(
        db = %config.db.display(),
        schema_version = schema.current_version,
        "database ready"
    );

    let state = ServiceState { api: Arc::new(api) };
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(bind = %config.bind, "listening");
    axum::serve(listener, app(state, cors_layer(&config))).await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn signup(
    State(state): State<ServiceState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceEnvelope<AccountView>>), ServiceError> {
    let Json(request) = body.map_err(|err| bad_request(err.body_text()))?;
    let account = run_api(&state, move |api| api.signup(&request)).await?;
    Ok((StatusCode::CREATED, Json(envelope(account))))
}

async fn login(
    State(state): State<ServiceState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<IssuedToken>>, ServiceError> {
    let Json(request) = body.map_err(|err| bad_request(err.body_text()))?;
    let issued = run_api(&state, move |api| api.login(&request)).await?;
    Ok(Json(envelope(issued)))
}

async fn me(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
) -> Result<Json<ServiceEnvelope<AccountView>>, ServiceError> {
    let account = run_api(&state, move |api| api.me(caller)).await?;
    Ok(Json(envelope(account)))
}

async fn list_problems(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
) -> Result<Json<ServiceEnvelope<Vec<Problem>>>, ServiceError> {
    let problems = run_api(&state, move |api| api.list_problems(caller)).await?;
    Ok(Json(envelope(problems)))
}

async fn create_problem(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
    body: Result<Json<NewProblem>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceEnvelope<Problem>>), ServiceError> {
    let Json(input) = body.map_err(|err| bad_request(err.body_text()))?;
    let problem = run_api(&state, move |api| api.create_problem(caller, input)).await?;
    Ok((StatusCode::CREATED, Json(envelope(problem))))
}

async fn update_problem(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<Problem>>, ServiceError> {
    let Json(raw) = body.map_err(|err| bad_request(err.body_text()))?;
    let patch = ProblemPatch::from_json(raw)?;
    let problem = run_api(&state, move |api| api.update_problem(caller, &id, &patch)).await?;
    Ok(Json(envelope(problem)))
}

async fn delete_problem(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<DeletedResponse>>, ServiceError> {
    let deleted = run_api(&state, move |api| api.delete_problem(caller, &id)).await?;
    Ok(Json(envelope(DeletedResponse { deleted: deleted.to_string() })))
}

async fn activity(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
    query: Result<Query<ActivityQuery>, QueryRejection>,
) -> Result<Json<ServiceEnvelope<Vec<ActivityDay>>>, ServiceError> {
    let Query(query) = query.map_err(|err| bad_request(err.body_text()))?;
    let window = query.window();
    let days = run_api(&state, move |api| api.activity(caller, window)).await?;
    Ok(Json(envelope(days)))
}

async fn export_csv(
    State(state): State<ServiceState>,
    ResolvedCaller(caller): ResolvedCaller,
) -> Result<Response, ServiceError> {
    let csv = run_api(&state, move |api| api.export_csv(caller)).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"lc-diary-export.csv\""),
        ],
        csv,
    )
        .into_response())
}
