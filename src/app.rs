use std::path::Path;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::SqliteDirectory;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::perms::{InMemoryBackend, PermissionService, PermissionStore};
use crate::routes::{health, perms, residents};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub service: Arc<PermissionService>,
    pub directory: Arc<SqliteDirectory>,
    pub backend: Arc<InMemoryBackend>,
    pub event_bus: EventBus,
}

impl AppState {
    /// Wire the permission service over `store` and run its second startup
    /// phase. The audit listener is spawned on the current runtime.
    pub fn new(pool: SqlitePool, jwt: JwtConfig, store: PermissionStore) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let directory = Arc::new(SqliteDirectory::new(pool.clone()));
        let service = Arc::new(PermissionService::new(Arc::new(store), backend.clone(), directory.clone()));
        service.register_rank_permissions();

        let (event_bus, rx) = init_event_bus();
        tokio::spawn(start_audit_listener(rx, pool.clone()));

        Self {
            pool,
            jwt: Arc::new(jwt),
            service,
            directory,
            backend,
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool, perms_file: impl AsRef<Path>) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let store = PermissionStore::open(perms_file)?;
    Ok(router(AppState::new(pool, jwt_config, store)))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let perms_routes = Router::new()
        .route("/groups", get(perms::list_groups))
        .route("/groups/:group", get(perms::group_nodes))
        .route("/groups/:group/nodes", post(perms::add_node))
        .route("/groups/:group/nodes/:node", delete(perms::remove_node))
        .route("/ranks/:scope", get(perms::list_ranks))
        .route("/ranks/:scope", post(perms::create_rank))
        .route("/ranks/:scope/:name", delete(perms::delete_rank))
        .route("/reload", post(perms::reload))
        .route("/residents/:id/effective", get(perms::effective_permissions));

    let resident_routes = Router::new()
        .route("/:id", put(residents::upsert_resident))
        .route("/:id/session", post(residents::start_session))
        .route("/:id/session", delete(residents::end_session))
        .route("/:id/attachment", get(residents::attachment));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/perms", perms_routes)
        .nest("/residents", resident_routes)
        .route("/towns/:name", put(residents::upsert_town))
        .route("/sessions/:session_id/check", get(residents::check_session))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
