use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use pixfeed_common::feed::{image_data_uri, FeedView, PLACEHOLDER_BASE64};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

const INDEX_HTML: &str = include_str!("../assets/index.html");

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    feed: watch::Receiver<FeedView>,
}

pub fn router(feed: watch::Receiver<FeedView>) -> Router {
    let state = Arc::new(AppState { feed });
    Router::new()
        .route("/", get(index))
        .route("/feed", get(get_feed))
        .route("/feed/events", get(feed_events))
        .route("/latest.jpg", get(latest_image))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / serves the page that renders the feed. The placeholder image is
/// baked in so the page shows it before the first snapshot exists.
async fn index() -> Html<String> {
    Html(INDEX_HTML.replace("__PLACEHOLDER_SRC__", &image_data_uri(PLACEHOLDER_BASE64)))
}

/// GET /feed returns the current view as JSON
async fn get_feed(State(state): State<Arc<AppState>>) -> Json<FeedView> {
    Json(state.feed.borrow().clone())
}

/// GET /feed/events streams the current view, then one `feed` event per change
async fn feed_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.feed.clone();
    let current = rx.borrow_and_update().clone();

    let changes = stream::unfold(rx, |mut rx| async move {
        if rx.changed().await.is_err() {
            debug!("feed closed, ending event stream");
            return None;
        }
        let view = rx.borrow_and_update().clone();
        Some((view, rx))
    });

    let events = stream::once(async move { current })
        .chain(changes)
        .filter_map(|view| async move {
            match Event::default().event("feed").json_data(&view) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    error!(error = %e, "failed to serialize feed view");
                    None
                }
            }
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /latest.jpg returns the decoded bytes of the newest image
async fn latest_image(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bytes = state
        .feed
        .borrow()
        .latest()
        .and_then(|snapshot| snapshot.image_bytes());

    match bytes {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pixfeed_common::feed::{FeedLayout, FeedState};
    use tower::ServiceExt;

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn feed_reflects_latest_state() {
        let mut feed = FeedState::new(FeedLayout::Multi);
        let app = router(feed.subscribe());

        feed.create_snapshot();
        feed.update_latest("iVBORw==").unwrap();

        let (status, body) = get(app, "/feed").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["layout"], "multi");
        assert_eq!(json["snapshots"][0]["image_src"], "data:image/jpg;base64,iVBORw==");
    }

    #[tokio::test]
    async fn empty_feed_serializes_without_image() {
        let feed = FeedState::new(FeedLayout::Single);
        let (status, body) = get(router(feed.subscribe()), "/feed").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["layout"], "single");
        assert!(json["current"].is_null());
    }

    #[tokio::test]
    async fn latest_image_is_404_until_a_frame_arrives() {
        let mut feed = FeedState::new(FeedLayout::Single);
        let app = router(feed.subscribe());

        let (status, _) = get(app.clone(), "/latest.jpg").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        feed.create_snapshot();
        let (status, _) = get(app.clone(), "/latest.jpg").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        feed.update_latest("/9j/4A==").unwrap();
        let (status, body) = get(app, "/latest.jpg").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, [0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[tokio::test]
    async fn index_serves_page() {
        let feed = FeedState::new(FeedLayout::Single);
        let (status, body) = get(router(feed.subscribe()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("/feed/events"));
    }

    #[tokio::test]
    async fn index_shows_placeholder_before_first_snapshot() {
        let feed = FeedState::new(FeedLayout::Multi);
        assert!(feed.is_empty());
        let (_, body) = get(router(feed.subscribe()), "/").await;
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains(&image_data_uri(PLACEHOLDER_BASE64)));
        assert!(!page.contains("__PLACEHOLDER_SRC__"));
    }
}
