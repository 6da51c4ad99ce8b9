use std::{sync::Arc, time::Duration};

use hls_player::{
    config::LoaderConfiguration, ContentLoader, EventBus, FetchError, Fetcher, HlsError,
    HttpFetcher, PlaylistKind, StreamType,
};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const MEDIA_PLAYLIST: &str = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4.0,
seg0.ts
#EXTINF:4.0,
seg1.ts
#EXT-X-ENDLIST
";

fn fast_config() -> LoaderConfiguration {
    LoaderConfiguration {
        playlist_request_timeout: Some(Duration::from_secs(5)),
        segment_request_timeout: Some(Duration::from_secs(5)),
        playlist_max_retry: 2,
        segment_max_retry: 2,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
    }
}

fn loader(config: LoaderConfiguration) -> ContentLoader {
    ContentLoader::new(Arc::new(HttpFetcher::new()), config, EventBus::default())
}

async fn mount(server: &MockServer, at: &str, body: &'static str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_success_and_status() {
    let server = MockServer::start().await;
    mount(&server, "/ok.m3u8", MEDIA_PLAYLIST).await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new();
    let ok_url = Url::parse(&format!("{}/ok.m3u8", server.uri())).unwrap();
    let response = fetcher.fetch(&ok_url).await.unwrap();
    assert_eq!(response.data, MEDIA_PLAYLIST.as_bytes());
    assert_eq!(response.final_url, ok_url);

    let forbidden = Url::parse(&format!("{}/forbidden", server.uri())).unwrap();
    assert_eq!(
        fetcher.fetch(&forbidden).await.unwrap_err(),
        FetchError::Status(403)
    );
    let missing = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    assert_eq!(
        fetcher.fetch(&missing).await.unwrap_err(),
        FetchError::Status(404)
    );
}

#[tokio::test]
async fn test_playlist_and_segments_through_loader() {
    let server = MockServer::start().await;
    mount(&server, "/vod/media.m3u8", MEDIA_PLAYLIST).await;
    mount(&server, "/vod/seg0.ts", "segment zero").await;
    mount(&server, "/vod/seg1.ts", "segment one").await;

    let loader = loader(fast_config());
    let playlist = loader
        .load_playlist_str(&format!("{}/vod/media.m3u8", server.uri()))
        .await
        .unwrap();
    assert_eq!(playlist.kind, PlaylistKind::Media);
    assert_eq!(playlist.stream_type, StreamType::Vod);
    assert_eq!(playlist.segments[1].url, format!("{}/vod/seg1.ts", server.uri()));
    assert!(loader.has_bandwidth_estimate());

    let data = loader.load_segment(&playlist.segments[0]).await.unwrap();
    assert_eq!(data, "segment zero".as_bytes());
    assert!(loader.current_bandwidth() > 0.);
}

#[tokio::test]
async fn test_redirected_playlist_resolves_against_final_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/moved.m3u8"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/real/media.m3u8", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    mount(&server, "/real/media.m3u8", MEDIA_PLAYLIST).await;

    let playlist = loader(fast_config())
        .load_playlist_str(&format!("{}/moved.m3u8", server.uri()))
        .await
        .unwrap();
    assert_eq!(playlist.segments[0].url, format!("{}/real/seg0.ts", server.uri()));
    assert_eq!(
        playlist.url.map(String::from),
        Some(format!("{}/real/media.m3u8", server.uri()))
    );
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, "/flaky.m3u8", MEDIA_PLAYLIST).await;

    let playlist = loader(fast_config())
        .load_playlist_str(&format!("{}/flaky.m3u8", server.uri()))
        .await
        .unwrap();
    assert_eq!(playlist.segments.len(), 2);
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(3));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/denied.m3u8"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = loader(fast_config())
        .load_playlist_str(&format!("{}/denied.m3u8", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, HlsError::Network(FetchError::Status(403))));
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(1));
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;
    mount(&server, "/vod/media.m3u8", MEDIA_PLAYLIST).await;
    Mock::given(method("GET"))
        .and(path("/vod/seg0.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = LoaderConfiguration {
        segment_request_timeout: Some(Duration::from_millis(100)),
        segment_max_retry: 0,
        ..fast_config()
    };
    let loader = loader(config);
    let playlist = loader
        .load_playlist_str(&format!("{}/vod/media.m3u8", server.uri()))
        .await
        .unwrap();
    let err = loader.load_segment(&playlist.segments[0]).await.unwrap_err();
    assert!(matches!(err, HlsError::Network(FetchError::Timeout)));
}

#[tokio::test]
async fn test_empty_and_invalid_playlists() {
    let server = MockServer::start().await;
    mount(&server, "/empty.m3u8", "").await;
    mount(&server, "/garbage.m3u8", "<html>not a playlist</html>").await;

    let loader = loader(fast_config());
    let err = loader
        .load_playlist_str(&format!("{}/empty.m3u8", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, HlsError::NoDataReceived(_)));
    let err = loader
        .load_playlist_str(&format!("{}/garbage.m3u8", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, HlsError::Parse(_)));
    assert!(matches!(
        loader.load_playlist_str("relative/media.m3u8").await,
        Err(HlsError::InvalidUrl(_))
    ));
}
