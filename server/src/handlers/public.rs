use crate::AppState;
use askama::Template;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    link: String,
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub link: String,
}

/// GET /
/// Landing page. The link on the page keeps itself current through
/// `/api/link/events`; the button goes through `/go` so the click is counted.
pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    IndexTemplate {
        link: state.links.get_link().await,
    }
    .into_response()
}

/// GET /go
///
/// 1. Resolve the current link from the store.
/// 2. Spawn a background task to record the click so the redirect is not
///    blocked by the analytics write.
/// 3. Return a 303 redirect to the link.
pub async fn go(State(state): State<Arc<AppState>>) -> Response {
    let link = state.links.get_link().await;

    let state_bg = state.clone();
    tokio::spawn(async move {
        // Failures are logged inside record_click; an uncounted click is
        // acceptable.
        state_bg.clicks.record_click().await;
    });

    redirect_to(&link)
}

/// Free-text links are allowed by the permissive policy, so the stored value
/// may not fit in a `Location` header.
fn redirect_to(link: &str) -> Response {
    match HeaderValue::from_str(link) {
        Ok(location) => (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response(),
        Err(_) => {
            tracing::warn!("Stored link {:?} is not usable as a redirect target", link);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                "The contact link is not a valid URL",
            )
                .into_response()
        }
    }
}

/// GET /api/link
pub async fn current_link(State(state): State<Arc<AppState>>) -> Json<LinkResponse> {
    Json(LinkResponse {
        link: state.links.get_link().await,
    })
}

/// GET /api/link/events
/// Server-sent `link` events carrying `{"link": …}`: the current link first,
/// then every change.
pub async fn link_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state
        .links
        .subscribe(move |link| {
            // The receiver goes away with the client; nothing to do then.
            let _ = tx.send(link);
        })
        .await;

    // The stream owns the subscription, so a disconnect unsubscribes.
    let stream = UnboundedReceiverStream::new(rx).map(move |link: String| {
        let _ = &subscription;
        Event::default()
            .event("link")
            .json_data(LinkResponse { link })
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uses_see_other() {
        let response = redirect_to("https://wa.me/1");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "https://wa.me/1");
    }

    #[test]
    fn unusable_link_is_not_a_redirect() {
        let response = redirect_to("écrivez-nous");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.headers().get(header::LOCATION).is_none());
    }
}
