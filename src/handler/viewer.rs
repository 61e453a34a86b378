use axum::{
    body::Body,
    extract::Query,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::manager;
use crate::media::broadcast::{viewer_stream, MJPEG_CONTENT_TYPE};

/// Browser shell around the MJPEG stream, with a reconnect loop for when
/// the feed drops.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Camera Live Stream</title>
    <style>
        html, body {
            margin: 0;
            padding: 0;
            height: 100vh;
            width: 100vw;
            overflow: hidden;
            background-color: #1a1a1a;
            color: #fff;
            font-family: Arial, sans-serif;
            display: flex;
            flex-direction: column;
        }
        h1 {
            text-align: center;
            margin: 10px 0;
            flex-shrink: 0;
            font-size: 1.5em;
        }
        #video-container {
            flex: 1;
            display: flex;
            align-items: center;
            justify-content: center;
            background-color: #000;
            margin: 0 10px 10px 10px;
            border-radius: 8px;
            min-height: 0;
            overflow: hidden;
        }
        img {
            max-width: 100%;
            max-height: 100%;
            object-fit: contain;
            border-radius: 4px;
        }
    </style>
</head>
<body>
    <h1>Camera Live Stream</h1>
    <div id="video-container">
        <img id="video-stream" src="/video_feed" alt="live stream">
    </div>
    <script>
        const img = document.getElementById('video-stream');
        let reconnectTimeout;

        img.onerror = function() {
            clearTimeout(reconnectTimeout);
            reconnectTimeout = setTimeout(() => {
                img.src = '/video_feed?t=' + new Date().getTime();
            }, 2000);
        };

        img.onload = function() {
            clearTimeout(reconnectTimeout);
        };
    </script>
</body>
</html>
"#;

pub fn viewer_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Deserialize)]
struct FeedQuery {
    session: Option<String>,
}

/// One long-lived MJPEG stream per connection. Each viewer runs its own
/// paced loop over the session's latest-frame cache; a disconnect drops
/// just this stream, and session cancellation ends every viewer.
async fn video_feed(Query(query): Query<FeedQuery>) -> Response {
    let session = match &query.session {
        Some(id) => manager::get_session(id).await,
        None => manager::first_broadcast_session().await,
    };
    let Some(session) = session else {
        return (StatusCode::NOT_FOUND, "no broadcast session").into_response();
    };
    let Some(cache) = session.frame_cache() else {
        return (
            StatusCode::BAD_REQUEST,
            "session has no broadcast sink",
        )
            .into_response();
    };

    log::debug!("viewer: connected to session {}", session.id());
    let stream = viewer_stream(cache, session.viewer_cancel());
    (
        [(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)],
        Body::from_stream(stream),
    )
        .into_response()
}
