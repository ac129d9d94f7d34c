//! API routes

pub mod health;
pub mod messages;
pub mod presence;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Protected API routes (auth required) - under /api
    let protected_api_routes = Router::new()
        // Static segments take precedence over `:partner_id`
        .route("/message/contacts", get(messages::list_contacts))
        .route("/message/chats", get(messages::list_chats))
        .route("/message/mark-read", post(messages::mark_read))
        .route("/message/unread/:partner_id", get(messages::get_unread_count))
        .route("/message/send/:receiver_id", post(messages::send_message))
        .route("/message/:partner_id", get(messages::get_conversation))
        .route("/presence", get(presence::get_presence))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    // WebSocket route (auth handled in handler, token may come via query)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let api_routes = Router::new()
        .merge(protected_api_routes)
        .merge(websocket_routes);

    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        // Image references are URLs, so bodies stay small
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the browser client; cookies require an explicit origin list
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}
