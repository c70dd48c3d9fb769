use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::FixedOffset;
use contact_link::{
    config::AppConfig,
    link_config::{LinkPolicy, DEFAULT_LINK},
    models::ClickAnalytics,
    store::MemoryStore,
    AppState,
};
use serde::Deserialize;
use tower::ServiceExt;

const PASSWORD: &str = "let-me-in";

#[derive(Debug, Deserialize)]
struct LinkResponse {
    link: String,
}

fn test_config(policy: LinkPolicy) -> AppConfig {
    AppConfig {
        database_url: "memory".into(),
        admin_password: PASSWORD.into(),
        host: "127.0.0.1".into(),
        port: 0,
        session_duration_hours: 1,
        default_link: DEFAULT_LINK.into(),
        link_policy: policy,
        calendar_offset: FixedOffset::east_opt(0).unwrap(),
        change_poll_interval: Duration::from_millis(100),
    }
}

fn app_with(policy: LinkPolicy) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(test_config(policy), Arc::new(MemoryStore::new())));
    (contact_link::router(state.clone()), state)
}

fn app() -> (Router, Arc<AppState>) {
    app_with(LinkPolicy::Permissive)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_owned())).unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

/// Log in and return the `session_id=…` cookie pair.
async fn login(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(form("/admin/login", &format!("password={PASSWORD}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_owned()
}

#[tokio::test]
async fn health_is_open() {
    let (app, _) = app();
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_link_starts_with_default() {
    let (app, _) = app();
    let response = app
        .oneshot(Request::get("/api/link").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: LinkResponse = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body.link, DEFAULT_LINK);
}

#[tokio::test]
async fn landing_page_shows_current_link() {
    let (app, state) = app();
    assert!(state.links.set_link("https://wa.me/5550001").await);

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains(r#"id="contact-link""#));
    assert!(body.contains("5550001"));
}

#[tokio::test]
async fn go_redirects_and_counts_the_click() {
    let (app, state) = app();
    assert!(state.links.set_link("https://wa.me/777").await);

    let response = app
        .oneshot(Request::get("/go").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://wa.me/777");

    // The click is recorded in the background.
    let mut analytics = state.clicks.get_analytics().await;
    for _ in 0..50 {
        if analytics.total_clicks == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        analytics = state.clicks.get_analytics().await;
    }
    assert_eq!(analytics.total_clicks, 1);
    assert_eq!(analytics.clicks_today, 1);
}

#[tokio::test]
async fn admin_pages_require_login() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(Request::get("/admin/dashboard").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/admin/login");

    let response = app
        .oneshot(form("/admin/link", "link=https%3A%2F%2Fwa.me%2F1", None))
        .await
        .unwrap();
    assert_eq!(location(&response), "/admin/login");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (app, _) = app();
    let response = app
        .oneshot(form("/admin/login", "password=nope", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(body_string(response).await.contains("Incorrect password."));
}

#[tokio::test]
async fn admin_can_change_the_link() {
    let (app, state) = app();
    let cookie = login(&app).await;

    let response = app
        .clone()
        .oneshot(form("/admin/link", "link=https%3A%2F%2Fwa.me%2F4242", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(location(&response), "/admin/dashboard");
    assert_eq!(state.links.get_link().await, "https://wa.me/4242");

    let response = app
        .oneshot(
            Request::get("/admin/dashboard")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("4242"));
}

#[tokio::test]
async fn blank_link_leaves_previous_value() {
    let (app, state) = app();
    let cookie = login(&app).await;
    assert!(state.links.set_link("https://wa.me/1").await);

    let response = app
        .oneshot(form("/admin/link", "link=+++", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(location(&response), "/admin/dashboard");
    assert_eq!(state.links.get_link().await, "https://wa.me/1");
}

#[tokio::test]
async fn admin_link_can_be_normalized() {
    let (app, state) = app();
    let cookie = login(&app).await;

    let body = "link=https%3A%2F%2Fapi.whatsapp.com%2Fsend%3Fphone%3D1234567890%26text%3Dhi&normalize=on";
    app.oneshot(form("/admin/link", body, Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(state.links.get_link().await, "https://wa.me/1234567890?text=hi");
}

#[tokio::test]
async fn admin_can_build_link_from_phone_number() {
    let (app, state) = app_with(LinkPolicy::Strict);
    let cookie = login(&app).await;

    let body = "phone=%28123%29+456-7890&message=hello";
    let response = app
        .oneshot(form("/admin/link/format", body, Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(location(&response), "/admin/dashboard");
    assert_eq!(state.links.get_link().await, "https://wa.me/1234567890?text=hello");
}

#[tokio::test]
async fn strict_policy_rejects_free_text() {
    let (app, state) = app_with(LinkPolicy::Strict);
    let cookie = login(&app).await;

    app.oneshot(form("/admin/link", "link=call+me", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(state.links.get_link().await, DEFAULT_LINK);
}

#[tokio::test]
async fn admin_analytics_reports_counters() {
    let (app, state) = app();
    let cookie = login(&app).await;
    assert!(state.clicks.record_click().await);
    assert!(state.clicks.record_click().await);

    let response = app
        .oneshot(
            Request::get("/admin/analytics")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let analytics: ClickAnalytics = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(analytics.total_clicks, 2);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let (app, _) = app();
    let cookie = login(&app).await;

    app.clone()
        .oneshot(
            Request::get("/admin/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::get("/admin/dashboard")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(location(&response), "/admin/login");
}
