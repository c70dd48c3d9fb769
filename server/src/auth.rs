use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::Redirect,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_id";

// ── Admin gate ─────────────────────────────────────────────────────────────

/// Single-password gate in front of the admin pages.
///
/// A correct `ADMIN_PASSWORD` buys a session cookie holding a random token.
/// Tokens live in memory only, so a restart logs the admin out.
pub struct AdminGate {
    password: String,
    sessions: DashMap<String, Instant>,
    ttl: Duration,
}

impl AdminGate {
    pub fn new(password: impl Into<String>, session_duration_hours: u64) -> Self {
        Self {
            password: password.into(),
            sessions: DashMap::new(),
            ttl: Duration::from_secs(session_duration_hours * 3600),
        }
    }

    /// Check `password` and, when it matches, open a session and return the
    /// cookie that carries it.
    pub fn login(&self, password: &str) -> Option<Cookie<'static>> {
        if password != self.password {
            tracing::warn!("Rejected admin login attempt");
            return None;
        }

        self.sessions.retain(|_, opened| opened.elapsed() < self.ttl);
        let token = Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), Instant::now());
        tracing::info!("Admin session opened");

        Some(
            Cookie::build((SESSION_COOKIE, token))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::seconds(self.ttl.as_secs() as i64))
                .build(),
        )
    }

    /// Close the session carried by `jar`, if any, and expire its cookie.
    pub fn logout(&self, jar: CookieJar) -> CookieJar {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            self.sessions.remove(cookie.value());
        }
        jar.remove(Cookie::build(SESSION_COOKIE).path("/").build())
    }

    pub fn is_admin(&self, jar: &CookieJar) -> bool {
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return false;
        };
        self.sessions
            .get(cookie.value())
            .is_some_and(|opened| opened.elapsed() < self.ttl)
    }
}

// ── Extractor ──────────────────────────────────────────────────────────────

/// Present on every admin handler; requests without a live session are sent
/// to the login page before the handler runs.
pub struct Admin;

#[async_trait]
impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        if state.admin.is_admin(&CookieJar::from_headers(&parts.headers)) {
            Ok(Admin)
        } else {
            Err(Redirect::to("/admin/login"))
        }
    }
}
