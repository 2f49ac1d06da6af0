use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tabshelf_api::{
    CreateRequest, CreateResourceRequest, Created, MoveOutcome, MoveRequest, Position,
    RenameRequest, Session, ShelfApi, StoredEntity, API_CONTRACT_VERSION,
};
use tabshelf_core::{
    ErrorKind, Resource, ResourceId, ResourcePatch, Section, SectionId, ShelfError, Space,
    SpaceId, Workspace, WorkspaceId,
};
use tracing_subscriber::EnvFilter;

mod auth;

use auth::{Authenticator, HeaderAuthenticator};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Clone)]
struct ServiceState {
    api: ShelfApi,
    auth: Arc<dyn Authenticator>,
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
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    kind: ErrorKind,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "tabshelf-service")]
#[command(about = "HTTP service for TabShelf workspaces, spaces, sections and resources")]
struct Args {
    #[arg(long, env = "TABSHELF_DB", default_value = "./tabshelf.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "TABSHELF_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientFailure => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl ServiceError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: status_for(kind),
            service_contract_version: SERVICE_CONTRACT_VERSION,
            kind,
            error: message.into(),
        }
    }

    fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            ..Self::new(ErrorKind::Unauthorized, "missing caller identity")
        }
    }
}

impl From<ShelfError> for ServiceError {
    fn from(err: ShelfError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<ShelfError>())
            .map_or(ErrorKind::TransientFailure, ShelfError::kind);
        let message = format!("{err:#}");
        if kind == ErrorKind::TransientFailure {
            tracing::error!(error = %message, "request failed");
        }
        Self::new(kind, message)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
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

type Reply<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn parse_id<T>(raw: &str) -> Result<T, ServiceError>
where
    T: FromStr<Err = ShelfError>,
{
    raw.parse::<T>().map_err(ServiceError::from)
}

/// Authenticate, then run `work` against a fresh session on the blocking pool.
async fn with_session<T, F>(state: &ServiceState, headers: &HeaderMap, work: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce(&ShelfApi, Session) -> Result<T> + Send + 'static,
{
    let Some(user) = state.auth.current_user(headers) else {
        return Err(ServiceError::unauthenticated());
    };
    let api = state.api.clone();
    match tokio::task::spawn_blocking(move || {
        let session = api.open_session(user)?;
        work(&api, session)
    })
    .await
    {
        Ok(result) => result.map_err(ServiceError::from),
        Err(err) => Err(ServiceError::new(
            ErrorKind::TransientFailure,
            format!("request worker failed: {err}"),
        )),
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/session", get(session))
        .route("/v1/workspaces", get(list_workspaces).post(create_workspace))
        .route("/v1/workspaces/:id", patch(rename_entity::<Workspace>).delete(delete_entity::<Workspace>))
        .route("/v1/workspaces/:id/reorder", post(reorder_entity::<Workspace>))
        .route("/v1/workspaces/:id/spaces", get(list_children::<Space>).post(create_space))
        .route("/v1/spaces/:id", patch(rename_entity::<Space>).delete(delete_entity::<Space>))
        .route("/v1/spaces/:id/reorder", post(reorder_entity::<Space>))
        .route("/v1/spaces/:id/move", post(move_entity::<Space>))
        .route("/v1/spaces/:id/activate", post(activate_space))
        .route("/v1/spaces/:id/sections", get(list_children::<Section>).post(create_section))
        .route("/v1/sections/:id", patch(rename_entity::<Section>).delete(delete_entity::<Section>))
        .route("/v1/sections/:id/reorder", post(reorder_entity::<Section>))
        .route("/v1/sections/:id/move", post(move_entity::<Section>))
        .route("/v1/sections/:id/resources", get(list_children::<Resource>).post(create_resource))
        .route("/v1/resources/:id", patch(update_resource).delete(delete_entity::<Resource>))
        .route("/v1/resources/:id/reorder", post(reorder_entity::<Resource>))
        .route("/v1/resources/:id/move", post(move_entity::<Resource>))
        .with_state(state)
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log);

    let state = ServiceState {
        api: ShelfApi::new(args.db.clone()),
        auth: Arc::new(HeaderAuthenticator::default()),
    };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "tabshelf service listening");
    axum::serve(listener, app(state)).await.context("service terminated")?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn session(State(state): State<ServiceState>, headers: HeaderMap) -> Reply<Session> {
    let session = with_session(&state, &headers, |_, session| Ok(session)).await?;
    Ok(Json(envelope(session)))
}

async fn list_workspaces(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Reply<Vec<Workspace>> {
    let workspaces =
        with_session(&state, &headers, |api, session| api.list_workspaces(&session)).await?;
    Ok(Json(envelope(workspaces)))
}

async fn create_workspace(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Reply<Created<Workspace>> {
    let created = with_session(&state, &headers, move |api, session| {
        api.create_workspace(&session, &request)
    })
    .await?;
    tracing::debug!(id = %created.created.id, "workspace created");
    Ok(Json(envelope(created)))
}

async fn create_space(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(workspace_id): Path<String>,
    Json(request): Json<CreateRequest>,
) -> Reply<Created<Space>> {
    let workspace_id = parse_id::<WorkspaceId>(&workspace_id)?;
    let created = with_session(&state, &headers, move |api, session| {
        api.create_space(&session, workspace_id, &request)
    })
    .await?;
    tracing::debug!(id = %created.created.id, workspace = %workspace_id, "space created");
    Ok(Json(envelope(created)))
}

async fn create_section(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(space_id): Path<String>,
    Json(request): Json<CreateRequest>,
) -> Reply<Created<Section>> {
    let space_id = parse_id::<SpaceId>(&space_id)?;
    let created = with_session(&state, &headers, move |api, session| {
        api.create_section(&session, space_id, &request)
    })
    .await?;
    tracing::debug!(id = %created.created.id, space = %space_id, "section created");
    Ok(Json(envelope(created)))
}

async fn create_resource(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(section_id): Path<String>,
    Json(request): Json<CreateResourceRequest>,
) -> Reply<Created<Resource>> {
    let section_id = parse_id::<SectionId>(&section_id)?;
    let created = with_session(&state, &headers, move |api, session| {
        api.create_resource(&session, section_id, request)
    })
    .await?;
    tracing::debug!(id = %created.created.id, section = %section_id, "resource created");
    Ok(Json(envelope(created)))
}

async fn update_resource(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<ResourcePatch>,
) -> Reply<Resource> {
    let id = parse_id::<ResourceId>(&id)?;
    let resource = with_session(&state, &headers, move |api, session| {
        api.update_resource(&session, id, &patch)
    })
    .await?;
    tracing::debug!(id = %id, "resource updated");
    Ok(Json(envelope(resource)))
}

async fn activate_space(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Session> {
    let id = parse_id::<SpaceId>(&id)?;
    let session = with_session(&state, &headers, move |api, mut session| {
        api.set_last_active_space(&mut session, id)?;
        Ok(session)
    })
    .await?;
    Ok(Json(envelope(session)))
}

async fn list_children<E>(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(parent): Path<String>,
) -> Reply<Vec<E>>
where
    E: StoredEntity + Serialize + Send + 'static,
    E::ParentId: FromStr<Err = ShelfError> + Send + 'static,
{
    let parent = parse_id::<E::ParentId>(&parent)?;
    let items =
        with_session(&state, &headers, move |api, session| api.list::<E>(&session, &parent))
            .await?;
    Ok(Json(envelope(items)))
}

async fn rename_entity<E>(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Reply<E>
where
    E: StoredEntity + Serialize + Send + 'static,
    E::Id: FromStr<Err = ShelfError> + Send + 'static,
{
    let id = parse_id::<E::Id>(&id)?;
    let renamed = with_session(&state, &headers, move |api, session| {
        api.rename::<E>(&session, id, &request)
    })
    .await?;
    tracing::debug!(kind = %E::KIND, id = %id, "renamed");
    Ok(Json(envelope(renamed)))
}

async fn delete_entity<E>(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Vec<E>>
where
    E: StoredEntity + Serialize + Send + 'static,
    E::Id: FromStr<Err = ShelfError> + Send + 'static,
{
    let id = parse_id::<E::Id>(&id)?;
    let remaining =
        with_session(&state, &headers, move |api, session| api.delete::<E>(&session, id)).await?;
    tracing::debug!(kind = %E::KIND, id = %id, remaining = remaining.len(), "deleted");
    Ok(Json(envelope(remaining)))
}

async fn reorder_entity<E>(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(position): Json<Position<E::Id>>,
) -> Reply<Vec<E>>
where
    E: StoredEntity + Serialize + Send + 'static,
    E::Id: FromStr<Err = ShelfError> + DeserializeOwned + Send + 'static,
{
    let id = parse_id::<E::Id>(&id)?;
    let siblings = with_session(&state, &headers, move |api, session| {
        api.reorder::<E>(&session, id, &position)
    })
    .await?;
    tracing::debug!(kind = %E::KIND, id = %id, "reordered");
    Ok(Json(envelope(siblings)))
}

async fn move_entity<E>(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<MoveRequest<E::ParentId, E::Id>>,
) -> Reply<MoveOutcome<E>>
where
    E: StoredEntity + Serialize + Send + 'static,
    E::Id: FromStr<Err = ShelfError> + DeserializeOwned + Send + 'static,
    E::ParentId: DeserializeOwned + Send + 'static,
{
    let id = parse_id::<E::Id>(&id)?;
    let outcome = with_session(&state, &headers, move |api, session| {
        api.move_to::<E>(&session, id, &request)
    })
    .await?;
    tracing::debug!(kind = %E::KIND, id = %id, order = outcome.moved.order(), "moved");
    Ok(Json(envelope(outcome)))
}
