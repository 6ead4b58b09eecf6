//! HTTP API tests.
//!
//! Most tests drive the router directly with `oneshot`; the disconnect test
//! runs a real server on a random port.

#![cfg(unix)]

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::*;
use tubetone::config::Config;
use tubetone::search::SearchResult;
use tubetone::server::{create_router, create_temp_dir, AppContext};
use tubetone::TubetoneError;

fn router(config: Config, source: MockSource, search: MockSearch) -> Router {
    let scratch = create_temp_dir(None).expect("failed to create scratch dir");
    create_router(AppContext::with_sources(
        config,
        Arc::new(source),
        Arc::new(search),
        scratch,
    ))
    .expect("failed to build router")
}

async fn get(app: Router, uri: &str) -> axum::response::Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_from(app: Router, uri: &str, origin: &str) -> axum::response::Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn search_result(id: &str, title: &str) -> SearchResult {
    SearchResult {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        thumbnail: None,
        channel_title: "Channel".to_string(),
        duration: 215,
        timestamp: "3:35".to_string(),
        views: 1_000,
        ago: None,
    }
}

#[tokio::test]
async fn test_health() {
    let app = router(Config::default(), MockSource::new(), MockSearch::new());
    let response = get(app, "/api/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "OK");
    assert!(json["timestamp"].as_str().unwrap().contains('T'));
    assert!(json["tempDir"].as_str().unwrap().contains("tubetone-"));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = router(Config::default(), MockSource::new(), MockSearch::new());
    let response = get(app, "/api/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Not found");
}

#[tokio::test]
async fn test_cors_allows_only_configured_origin() {
    let mut config = Config::default();
    config.server.cors_origin = Some("https://good.example".to_string());

    let app = router(config, MockSource::new(), MockSearch::new());
    let response = get_from(app.clone(), "/api/health", "https://good.example").await;
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://good.example"
    );

    let response = get_from(app, "/api/health", "https://evil.example").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .map(|v| v.as_bytes()),
        Some(&b"*"[..])
    );
    assert_ne!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .map(|v| v.as_bytes()),
        Some(&b"https://evil.example"[..])
    );
}

#[tokio::test]
async fn test_cors_without_origin_allows_any() {
    let app = router(Config::default(), MockSource::new(), MockSearch::new());
    let response = get_from(app, "/api/health", "https://anywhere.example").await;
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_unparsable_cors_origin_is_rejected() {
    let mut config = Config::default();
    config.server.cors_origin = Some("https://good.example\n".to_string());

    let scratch = create_temp_dir(None).unwrap();
    let ctx = AppContext::with_sources(
        config,
        Arc::new(MockSource::new()),
        Arc::new(MockSearch::new()),
        scratch,
    );

    let err = create_router(ctx).unwrap_err();
    assert!(err.to_string().contains("Invalid CORS origin"));
}

#[tokio::test]
async fn test_search_requires_query() {
    let mut search = MockSearch::new();
    search.expect_search().never();
    let app = router(Config::default(), MockSource::new(), search);

    for uri in ["/api/search", "/api/search?query=", "/api/search?query=%20%20"] {
        let response = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["error"], "Search query is required");
    }
}

#[tokio::test]
async fn test_search_returns_results() {
    let mut search = MockSearch::new();
    search
        .expect_search()
        .withf(|query, limit| query == "lofi beats" && *limit == 10)
        .times(1)
        .returning(|_, _| Ok(vec![search_result("a1", "First"), search_result("b2", "Second")]));
    let app = router(Config::default(), MockSource::new(), search);

    let response = get(app, "/api/search?query=lofi%20beats").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let results = json.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], "a1");
    assert_eq!(results[1]["channelTitle"], "Channel");
}

#[tokio::test]
async fn test_search_failure_is_500() {
    let mut search = MockSearch::new();
    search
        .expect_search()
        .returning(|_, _| Err(TubetoneError::SearchFailed("yt-dlp failed with exit code 1".into())));
    let app = router(Config::default(), MockSource::new(), search);

    let response = get(app, "/api/search?query=anything").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Search failed");
    assert!(json.get("details").is_none());
}

#[tokio::test]
async fn test_video_info() {
    let app = router(
        Config::default(),
        source_returning(metadata("Song", 215)),
        MockSearch::new(),
    );

    let response = get(app, "/api/video/dQw4w9WgXcQ").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["title"], "Song");
    assert_eq!(json["duration"], 215);
    assert_eq!(json["author"], "Some Artist");
    assert_eq!(json["formats"][0]["format_id"], "251");
}

#[tokio::test]
async fn test_invalid_video_id_is_rejected() {
    let mut source = MockSource::new();
    source.expect_fetch().never();
    let app = router(Config::default(), source, MockSearch::new());

    for uri in ["/api/video/--exec=rm", "/api/download/a%20b", "/api/download/x.y"] {
        let response = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["error"], "Invalid video id");
    }
}

#[tokio::test]
async fn test_metadata_failure_is_500_with_details() {
    let mut source = MockSource::new();
    source
        .expect_fetch()
        .returning(|_| Err(TubetoneError::MetadataFetchFailed("ERROR: Private video".into())));
    let app = router(Config::default(), source, MockSearch::new());

    let response = get(app, "/api/video/private1").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Failed to get video info");
    assert!(json["details"].as_str().unwrap().contains("Private video"));
}

#[tokio::test]
async fn test_download_too_long_is_400() {
    let tools = FakeTools::new();
    let marker = tools.path("spawned");
    let ytdlp = tools.script("yt-dlp", &format!("touch {}", marker.display()));
    let ffmpeg = tools.script("ffmpeg", &format!("touch {}", marker.display()));

    let app = router(
        tools.config(&ytdlp, &ffmpeg),
        source_returning(metadata("Three hour mix", 3 * 3600)),
        MockSearch::new(),
    );

    let response = get(app, "/api/download/longmix").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );

    let json = body_json(response).await;
    assert_eq!(json["error"], "Video is too long");
    assert_eq!(json["details"], "Maximum duration is 60 minutes");
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_download_streams_mp3() {
    let tools = FakeTools::new();
    let ytdlp = tools.script("yt-dlp", "yes tubetone | head -c 100000");
    let ffmpeg = tools.script("ffmpeg", "exec cat");

    let app = router(
        tools.config(&ytdlp, &ffmpeg),
        source_returning(metadata("Artist - Song (Official Video)", 215)),
        MockSearch::new(),
    );

    let response = get(app, "/api/download/dQw4w9WgXcQ").await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "audio/mpeg");
    assert_eq!(
        headers.get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"Artist - Song Official Video.mp3\""
    );
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert!(headers.get(header::CONTENT_LENGTH).is_none());

    assert_eq!(body_bytes(response).await, repeated("tubetone", 100_000));
}

#[tokio::test]
async fn test_download_failure_before_output_is_json() {
    let tools = FakeTools::new();
    let ytdlp = tools.script("yt-dlp", "echo 'ERROR: Video unavailable' >&2\nexit 1");
    let ffmpeg = tools.script("ffmpeg", "exec cat");

    let mut config = tools.config(&ytdlp, &ffmpeg);
    config.server.dev_mode = true;
    let app = router(config, source_returning(metadata("Gone", 10)), MockSearch::new());

    let response = get(app, "/api/download/gone123").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Download failed");
    assert!(json["details"].as_str().unwrap().contains("Video unavailable"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_client_disconnect_stops_pipeline() {
    let tools = FakeTools::new();
    let extractor_pid = tools.path("extractor.pid");
    let transcoder_pid = tools.path("transcoder.pid");
    let ytdlp = tools.script("yt-dlp", &format!("echo $$ > {}\nexec yes tubetone", extractor_pid.display()));
    let ffmpeg = tools.script("ffmpeg", &format!("echo $$ > {}\nexec cat", transcoder_pid.display()));

    let app = router(
        tools.config(&ytdlp, &ffmpeg),
        source_returning(metadata("Endless", 10)),
        MockSearch::new(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind random port");
    let addr = listener.local_addr().expect("failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let mut response = reqwest::get(format!("http://{}/api/download/endless", addr))
        .await
        .expect("request failed");
    assert_eq!(response.status(), 200);
    assert!(response.chunk().await.unwrap().is_some());

    let extractor = read_pid(&extractor_pid).await;
    let transcoder = read_pid(&transcoder_pid).await;
    drop(response);

    assert!(wait_until(Duration::from_secs(5), || {
        !process_exists(extractor) && !process_exists(transcoder)
    })
    .await);
}
