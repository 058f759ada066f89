use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{auth_middleware, AuthService};
use crate::config::CorsConfig;

use super::handlers::{
    create_exhibit, create_exhibition, create_news, delete_exhibit, delete_exhibition,
    delete_news, get_exhibition, get_news, list_exhibitions, list_news, ping,
    set_exhibition_preview, update_exhibit, update_exhibition, update_news, AppState,
};
use super::visits::{
    analytics_info, get_stats, record_visit, relay_status, visitor_context_middleware,
};

pub fn create_router(state: Arc<AppState>, auth_service: Arc<AuthService>, cors: &CorsConfig) -> Router {
    let museum_routes = Router::new()
        .route("/ping", get(ping))
        .route("/news", get(list_news))
        .route("/news/{id}", get(get_news))
        .route("/exhibitions", get(list_exhibitions))
        .route("/exhibitions/{id}", get(get_exhibition))
        .route("/visit", post(record_visit))
        .route("/analytics", get(analytics_info))
        .layer(middleware::from_fn(visitor_context_middleware))
        .with_state(Arc::clone(&state));

    let admin_routes = Router::new()
        .route("/ping", get(ping))
        .route("/stats", get(get_stats))
        .route("/relay", get(relay_status))
        .route("/news", post(create_news))
        .route("/news/{id}", put(update_news).delete(delete_news))
        .route("/exhibitions", post(create_exhibition))
        .route(
            "/exhibitions/{id}",
            put(update_exhibition).delete(delete_exhibition),
        )
        .route("/exhibitions/{id}/preview", put(set_exhibition_preview))
        .route("/exhibits", post(create_exhibit))
        .route("/exhibits/{id}", put(update_exhibit).delete(delete_exhibit))
        .route_layer(middleware::from_fn_with_state(auth_service, auth_middleware))
        .with_state(state);

    Router::new()
        .route("/ping", get(ping))
        .nest("/museum", museum_routes)
        .nest("/admin", admin_routes)
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}
