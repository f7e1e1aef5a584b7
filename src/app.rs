use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{
    AssignmentStore, AuthzMode, DefaultPolicyEvaluator, PermissionCatalog, PolicyEvaluator, Session,
    ToggleReconciler,
};
use crate::db::SqliteAssignmentStore;
use crate::errors::{AppError, AppResult};
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::{AuthUser, JwtConfig};
use crate::models::rbac::PrincipalRef;
use crate::routes::{auth, health, rbac};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub catalog: Arc<PermissionCatalog>,
    pub store: SqliteAssignmentStore,
    pub reconciler: Arc<ToggleReconciler<SqliteAssignmentStore>>,
    pub evaluator: Arc<dyn PolicyEvaluator>,
    pub authz_mode: AuthzMode,
}

impl AppState {
    pub async fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        event_bus: EventBus,
        authz_mode: AuthzMode,
    ) -> AppResult<Self> {
        let store = SqliteAssignmentStore::new(pool.clone());
        let catalog = Arc::new(store.load_catalog().await?);
        tracing::info!(permissions = catalog.len(), "permission catalog loaded");

        let reconciler = Arc::new(ToggleReconciler::new(store.clone(), catalog.clone()));
        let evaluator: Arc<dyn PolicyEvaluator> = Arc::new(DefaultPolicyEvaluator::new(catalog.clone()));

        Ok(Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
            catalog,
            store,
            reconciler,
            evaluator,
            authz_mode,
        })
    }

    /// Builds the caller's session from their current grants.
    pub async fn session(&self, auth: &AuthUser) -> AppResult<Session> {
        let grants = self.store.load_grants(PrincipalRef::user(auth.user_id)).await?;
        Ok(Session::from_grants(auth.user_id, &grants))
    }

    /// Checks `permission` for the caller according to the configured mode.
    pub async fn authorize(&self, auth: &AuthUser, permission: &str) -> AppResult<()> {
        if self.authz_mode == AuthzMode::Off {
            return Ok(());
        }

        let session = self.session(auth).await?;
        if self.evaluator.can(&session, permission).await {
            return Ok(());
        }

        match self.authz_mode {
            AuthzMode::Advisory => {
                tracing::warn!(
                    user_id = %auth.user_id,
                    permission = %permission,
                    "authorization denied (advisory mode, allowing)"
                );
                Ok(())
            }
            _ => Err(AppError::forbidden(format!("missing permission {permission}"))),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus, AuthzMode::from_env()).await?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", axum::routing::post(auth::register))
        .route("/login", axum::routing::post(auth::login))
        .route("/me", get(auth::me));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/rbac", rbac::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
