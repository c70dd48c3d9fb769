use crate::{
    auth::Admin,
    link_config::{format_whatsapp_link, normalize_link},
    models::ClickAnalytics,
    AppState,
};
use askama::Template;
use axum::{
    extract::{Form, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Redirect, Response,
    },
    Json,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};

// ── Template structs ───────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    error: Option<String>,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    link: String,
    updated_at: Option<String>,
    policy: String,
    analytics: ClickAnalytics,
    last_clicked_at: String,
    flash_success: Option<String>,
    flash_error: Option<String>,
}

// ── Form types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginForm {
    password: String,
}

#[derive(Deserialize)]
pub struct LinkForm {
    link: String,
    /// Checkbox: rewrite api/web.whatsapp.com links to wa.me before saving.
    normalize: Option<String>,
}

#[derive(Deserialize)]
pub struct FormatLinkForm {
    phone: String,
    message: Option<String>,
}

// ── Login / Logout ─────────────────────────────────────────────────────────

/// GET /admin/login
pub async fn login_page(jar: CookieJar, State(state): State<Arc<AppState>>) -> Response {
    // Already signed in: skip straight to the dashboard.
    if state.admin.is_admin(&jar) {
        return Redirect::to("/admin/dashboard").into_response();
    }
    LoginTemplate { error: None }.into_response()
}

/// POST /admin/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.admin.login(&form.password) {
        Some(session) => (jar.add(session), Redirect::to("/admin/dashboard")).into_response(),
        None => LoginTemplate {
            error: Some("Incorrect password.".into()),
        }
        .into_response(),
    }
}

/// GET /admin/logout
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    (state.admin.logout(jar), Redirect::to("/admin/login")).into_response()
}

// ── Dashboard ──────────────────────────────────────────────────────────────

/// GET /admin/dashboard
pub async fn dashboard(
    _admin: Admin,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Response {
    // Read and clear flash cookies
    let flash_success = jar.get("flash_success").map(|c| c.value().to_owned());
    let flash_error = jar.get("flash_error").map(|c| c.value().to_owned());

    let clear_success = Cookie::build(("flash_success", ""))
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build();
    let clear_error = Cookie::build(("flash_error", ""))
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build();

    let (config, analytics) = tokio::join!(state.links.get_config(), state.clicks.get_analytics());

    let tmpl = DashboardTemplate {
        link: config.link,
        updated_at: config.updated_at.map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string()),
        policy: state.links.policy().to_string(),
        last_clicked_at: if analytics.total_clicks == 0 {
            "never".into()
        } else {
            analytics.last_clicked_at.format("%Y-%m-%d %H:%M UTC").to_string()
        },
        analytics,
        flash_success,
        flash_error,
    };

    (jar.remove(clear_success).remove(clear_error), tmpl).into_response()
}

// ── Edit link ──────────────────────────────────────────────────────────────

/// POST /admin/link
pub async fn update_link(
    _admin: Admin,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LinkForm>,
) -> Response {
    let candidate = if form.normalize.is_some() {
        normalize_link(form.link.trim())
    } else {
        form.link
    };

    save_link(&state, jar, &candidate).await
}

/// POST /admin/link/format
/// Build a wa.me link from a phone number and optional message, then save it.
pub async fn format_link(
    _admin: Admin,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<FormatLinkForm>,
) -> Response {
    if !form.phone.chars().any(|c| c.is_ascii_digit()) {
        return set_flash_and_redirect(
            jar,
            None,
            Some("Phone number must contain digits."),
            "/admin/dashboard",
        );
    }

    let link = format_whatsapp_link(&form.phone, form.message.as_deref());
    save_link(&state, jar, &link).await
}

async fn save_link(state: &AppState, jar: CookieJar, candidate: &str) -> Response {
    if !state.links.is_valid_link(candidate) {
        let msg = format!(
            "That link is not accepted by the {} link policy.",
            state.links.policy()
        );
        return set_flash_and_redirect(jar, None, Some(&msg), "/admin/dashboard");
    }

    if state.links.set_link(candidate).await {
        set_flash_and_redirect(jar, Some("Link updated."), None, "/admin/dashboard")
    } else {
        set_flash_and_redirect(
            jar,
            None,
            Some("Failed to save the link. Please try again."),
            "/admin/dashboard",
        )
    }
}

// ── Analytics ──────────────────────────────────────────────────────────────

/// GET /admin/analytics
pub async fn analytics(_admin: Admin, State(state): State<Arc<AppState>>) -> Json<ClickAnalytics> {
    Json(state.clicks.get_analytics().await)
}

/// GET /admin/analytics/events
/// Server-sent `analytics` events: the counters now, then after every click.
pub async fn analytics_events(
    _admin: Admin,
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state
        .clicks
        .subscribe(move |analytics| {
            let _ = tx.send(analytics);
        })
        .await;

    let stream = UnboundedReceiverStream::new(rx).map(move |analytics: ClickAnalytics| {
        let _ = &subscription;
        Event::default().event("analytics").json_data(analytics)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Private helpers ────────────────────────────────────────────────────────

/// Set a flash cookie and redirect to the given path.
fn set_flash_and_redirect(
    jar: CookieJar,
    success: Option<&str>,
    error: Option<&str>,
    destination: &str,
) -> Response {
    let mut jar = jar;

    for (name, msg) in [("flash_success", success), ("flash_error", error)] {
        if let Some(msg) = msg {
            let c = Cookie::build((name, msg.to_owned()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::seconds(30))
                .build();
            jar = jar.add(c);
        }
    }

    (jar, Redirect::to(destination)).into_response()
}
