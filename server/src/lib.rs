use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod analytics;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod link_config;
pub mod models;
pub mod store;
pub mod subscription;

use analytics::ClickCounter;
use auth::AdminGate;
use link_config::ConfigStore;
use store::DocumentStore;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: config::AppConfig,
    pub links: ConfigStore,
    pub clicks: ClickCounter,
    pub admin: AdminGate,
}

impl AppState {
    pub fn new(config: config::AppConfig, store: Arc<dyn DocumentStore>) -> Self {
        let links = ConfigStore::new(store.clone(), config.link_policy, config.default_link.as_str());
        let clicks = ClickCounter::new(store, config.calendar_offset);
        let admin = AdminGate::new(config.admin_password.clone(), config.session_duration_hours);

        Self {
            config,
            links,
            clicks,
            admin,
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    let admin_router = Router::new()
        // Root of /admin → dashboard (or the login page via Admin)
        .route(
            "/",
            get(|| async { axum::response::Redirect::to("/admin/dashboard") }),
        )
        .route(
            "/login",
            get(handlers::admin::login_page).post(handlers::admin::login),
        )
        .route("/logout", get(handlers::admin::logout))
        .route("/dashboard", get(handlers::admin::dashboard))
        .route("/link", post(handlers::admin::update_link))
        .route("/link/format", post(handlers::admin::format_link))
        .route("/analytics", get(handlers::admin::analytics))
        .route("/analytics/events", get(handlers::admin::analytics_events));

    Router::new()
        .route("/", get(handlers::public::index))
        .route("/go", get(handlers::public::go))
        .route("/api/link", get(handlers::public::current_link))
        .route("/api/link/events", get(handlers::public::link_events))
        // Health check — returns 200 OK with no auth required
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        .nest("/admin", admin_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
