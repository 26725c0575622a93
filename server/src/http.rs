use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use api::auth::{Principal, RequestContext};
use api::metrics::MetricsCache;
use api::schema::SchemaType;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::{self, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use chrono::{Duration, Utc};
use entity::{sessions, users};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, Statement,
};
use serde::{Deserialize, Serialize};
use time::Duration as TimeDuration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;

const SESSION_COOKIE: &str = "__Host-sf_session";
const ACT_AS_HEADER: &str = "x-act-as";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub schema: SchemaType,
    pub config: Arc<AppConfig>,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.config.cookie_key.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "skillforge server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([http::header::CONTENT_TYPE, HeaderName::from_static(ACT_AS_HEADER)])
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/logout", post(logout_handler))
        .route("/graphql", post(graphql_handler));
    if state.config.dev_login_enabled {
        router = router.route("/dev/login", post(dev_login_handler));
    }
    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

/// Local-development bootstrap: exchange a known user email for a session.
/// Credential verification proper is an upstream concern and stays out of
/// this service.
#[derive(Deserialize)]
struct DevLoginRequest {
    email: String,
}

async fn dev_login_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(body): Json<DevLoginRequest>,
) -> HttpResult<(PrivateCookieJar, StatusCode)> {
    let user = users::Entity::find()
        .filter(users::Column::Email.eq(body.email.trim().to_lowercase()))
        .one(state.db.as_ref())
        .await
        .map_err(|err| HttpError::internal(err.into()))?
        .ok_or_else(|| HttpError::new(StatusCode::NOT_FOUND, "unknown user"))?;

    let session_id = Uuid::new_v4();
    let now = Utc::now();
    let model = sessions::ActiveModel {
        id: Set(session_id),
        user_id: Set(user.id),
        created_at: Set(now.into()),
        expires_at: Set((now + Duration::days(30)).into()),
        ip: Set(None),
        user_agent: Set(None),
    };
    model
        .insert(state.db.as_ref())
        .await
        .map_err(|err| HttpError::internal(err.into()))?;

    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::days(30))
        .build();
    Ok((jar.add(cookie), StatusCode::NO_CONTENT))
}

async fn logout_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> HttpResult<(PrivateCookieJar, StatusCode)> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Ok(session_id) = Uuid::parse_str(cookie.value()) {
            let _ = sessions::Entity::delete_by_id(session_id)
                .exec(state.db.as_ref())
                .await;
        }
    }
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    Ok((jar, StatusCode::NO_CONTENT))
}

async fn graphql_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
    request: GraphQLRequest,
) -> HttpResult<GraphQLResponse> {
    let request_ctx = resolve_request_context(&state, &jar, &headers).await?;
    let mut req = request.into_inner();
    req = req.data(request_ctx).data(MetricsCache::default());
    let response = state.schema.execute(req).await;
    Ok(GraphQLResponse::from(response))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state
        .db
        .execute(Statement::from_string(
            DatabaseBackend::Postgres,
            "SELECT 1".to_string(),
        ))
        .await
        .is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

type HttpResult<T> = Result<T, HttpError>;

/// Resolve the identity pair for one request. Missing or expired sessions
/// yield an anonymous context; the GraphQL guards own the UNAUTHENTICATED
/// failure so the error taxonomy stays in one place.
async fn resolve_request_context(
    state: &AppState,
    jar: &PrivateCookieJar,
    headers: &HeaderMap,
) -> HttpResult<RequestContext> {
    let Some(authenticated) = load_session(state, jar).await? else {
        return Ok(RequestContext::anonymous());
    };

    let act_as = headers
        .get(ACT_AS_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok());
    match act_as {
        Some(target_id)
            if state.config.impersonation_enabled
                && authenticated.is_system_admin()
                && target_id != authenticated.id =>
        {
            let target = users::Entity::find_by_id(target_id)
                .one(state.db.as_ref())
                .await
                .map_err(|err| HttpError::internal(err.into()))?
                .ok_or_else(|| {
                    HttpError::new(StatusCode::BAD_REQUEST, "unknown act-as target")
                })?;
            Ok(RequestContext::impersonating(
                authenticated,
                Principal::from_user(&target),
            ))
        }
        _ => Ok(RequestContext::for_principal(authenticated)),
    }
}

async fn load_session(
    state: &AppState,
    jar: &PrivateCookieJar,
) -> HttpResult<Option<Principal>> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };
    let Ok(session_id) = Uuid::parse_str(cookie.value()) else {
        return Ok(None);
    };
    let Some(session) = sessions::Entity::find_by_id(session_id)
        .one(state.db.as_ref())
        .await
        .map_err(|err| HttpError::internal(err.into()))?
    else {
        return Ok(None);
    };
    if session.expires_at.with_timezone(&Utc) < Utc::now() {
        let _ = sessions::Entity::delete_by_id(session_id)
            .exec(state.db.as_ref())
            .await;
        return Ok(None);
    }
    let user = users::Entity::find_by_id(session.user_id)
        .one(state.db.as_ref())
        .await
        .map_err(|err| HttpError::internal(err.into()))?;
    Ok(user.map(|user| Principal::from_user(&user)))
}

#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}
