//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Account routes
    let account_routes = Router::new()
        .route("/session", get(handlers::get_session))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/register", post(handlers::register))
        .route("/change-password", post(handlers::change_password))
        .route("/add-user", post(handlers::add_user))
        .route("/delete-user", post(handlers::delete_user));

    // Catalogue and ledger routes
    let store_routes = Router::new()
        .route(
            "/books",
            get(handlers::list_books).post(handlers::search_books),
        )
        .route("/buy", post(handlers::buy))
        .route("/select", post(handlers::select))
        .route("/modify", post(handlers::modify))
        .route("/import", post(handlers::import))
        .route(
            "/finance",
            get(handlers::get_finance).post(handlers::post_finance),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(account_routes)
        .merge(store_routes)
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
///
/// With no configured origins every cross-origin request is denied.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN];

    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        if !state.allowed_origins.is_empty() {
            tracing::error!("CORS: All configured origins are invalid!");
        }
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    tracing::info!("CORS: Allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}
