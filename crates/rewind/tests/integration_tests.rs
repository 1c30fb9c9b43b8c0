//! End-to-end tests against an in-process CDN.
//!
//! The CDN is an axum app on `127.0.0.1:0` serving an in-memory file map.
//! Files can be swapped, removed or forced to fail while a mission runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;

use rewind_engine::logging::MissionLogWriter;
use rewind_engine::merge::Merger;
use rewind_engine::{
    DownloaderConfig, EventSink, Mission, MissionConfig, MissionEvent, MissionRunner, MissionSpec,
    RewindError,
};

#[derive(Default)]
struct TestCdn {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    hits: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<SeenRequest>>,
}

#[derive(Debug, Clone)]
struct SeenRequest {
    path: String,
    cookie: Option<String>,
    referer: Option<String>,
}

impl TestCdn {
    fn put(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.to_string(), body.into());
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    /// Hold every response for `path` back by `delay`.
    fn slow(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_file(
    State(cdn): State<Arc<TestCdn>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    cdn.requests.lock().unwrap().push(SeenRequest {
        path: path.clone(),
        cookie: text(header::COOKIE),
        referer: text(header::REFERER),
    });
    *cdn.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    let delay = cdn.delays.lock().unwrap().get(&path).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if cdn.failing.lock().unwrap().contains(&path) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match cdn.files.lock().unwrap().get(&path) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start the CDN and return its `http://host:port` origin.
async fn start(cdn: Arc<TestCdn>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/{*path}", get(serve_file))
        .with_state(cdn);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_config(output: &std::path::Path) -> MissionConfig {
    MissionConfig {
        poll_interval: Duration::from_millis(20),
        stagnation_limit: 2,
        poll_failure_limit: 2,
        retry_delay: Duration::from_millis(10),
        segment_timeout: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(5),
        merge: false,
        output_dir: output.to_path_buf(),
        ..MissionConfig::default()
    }
}

fn init_tracing() {
    use tracing_subscriber::filter::filter_fn;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let console =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "rewind_engine=debug".into());
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_filter(console))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(MissionLogWriter)
                .with_filter(filter_fn(|meta| {
                    *meta.level() <= tracing::Level::INFO && MissionLogWriter::is_active()
                })),
        )
        .try_init();
}

/// Mission against the local CDN, bypassing any system proxy.
fn mission(spec: MissionSpec, config: MissionConfig) -> Mission {
    init_tracing();
    Mission::new(spec, config)
        .with_downloader_config(DownloaderConfig::builder().use_system_proxy(false).build())
}

fn segment_body(n: u64) -> Vec<u8> {
    format!("segment-{n:04}|").repeat(64).into_bytes()
}

fn media_playlist(first_sequence: u64, names: &[&str], end: bool) -> String {
    let mut body = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:{first_sequence}\n"
    );
    for name in names {
        body.push_str(&format!("#EXTINF:2.000,\n{name}\n"));
    }
    if end {
        body.push_str("#EXT-X-ENDLIST\n");
    }
    body
}

/// Records merge requests instead of running a muxer.
#[derive(Default)]
struct RecordingMerger {
    calls: AtomicUsize,
    fragments: Mutex<Option<std::path::PathBuf>>,
}

#[async_trait]
impl Merger for RecordingMerger {
    async fn merge(
        &self,
        fragments: &std::path::Path,
        output: &std::path::Path,
    ) -> rewind_engine::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.fragments.lock().unwrap() = Some(fragments.to_path_buf());
        tokio::fs::write(output, b"merged").await?;
        Ok(())
    }
}

fn three_segment_cdn() -> Arc<TestCdn> {
    let cdn = Arc::new(TestCdn::default());
    cdn.put(
        "live/index.m3u8",
        media_playlist(1, &["seg_001.ts", "seg_002.ts", "seg_003.ts"], true),
    );
    for n in 1..=3 {
        cdn.put(&format!("live/seg_00{n}.ts"), segment_body(n));
    }
    cdn
}

mod mission_tests {
    use super::*;
    use rewind_engine::SegmentState;

    #[tokio::test]
    async fn three_segments_are_downloaded_and_listed_in_order() {
        let cdn = three_segment_cdn();
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let spec = MissionSpec::new(format!("{origin}/live/index.m3u8"), "show");
        let report = mission(spec, fast_config(dir.path()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.successful, 3);
        assert_eq!(report.failed, 0);
        assert!(report.unresolved.is_empty());
        assert!(report.merged.is_none());

        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(manifest.matches("#EXTINF:").count(), 3);
        assert!(manifest.ends_with("#EXT-X-ENDLIST"));
        let positions: Vec<usize> = ["seg_001.ts", "seg_002.ts", "seg_003.ts"]
            .iter()
            .map(|name| manifest.find(name).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let backup = dir.path().join("backup").join("show");
        assert_eq!(
            tokio::fs::read(backup.join("fragments").join("seg_002.ts"))
                .await
                .unwrap(),
            segment_body(2)
        );
        assert!(backup.join("index.m3u8").exists());
        assert!(backup.join("status.json").exists());

        // The playlist was polled several times; each segment was fetched once.
        assert_eq!(cdn.hits("live/seg_002.ts"), 1);
        assert_eq!(cdn.hits("live/seg_003.ts"), 1);
        assert!(cdn.hits("live/index.m3u8") >= 3);
    }

    #[tokio::test]
    async fn failing_segment_is_reported_without_aborting_siblings() {
        let cdn = three_segment_cdn();
        cdn.fail("live/seg_002.ts");
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let merger = Arc::new(RecordingMerger::default());

        let config = MissionConfig {
            merge: true,
            ..fast_config(dir.path())
        };
        let report = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            config,
        )
        .with_merger(merger.clone())
        .run()
        .await
        .unwrap();

        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].sequence, 2);
        assert_eq!(report.unresolved[0].state, SegmentState::Failed);
        assert_eq!(cdn.hits("live/seg_002.ts"), 3);

        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(manifest.matches("#EXTINF:").count(), 3);
        assert_eq!(merger.calls.load(Ordering::SeqCst), 0);
        assert!(report.merged.is_none());
    }

    #[tokio::test]
    async fn complete_mission_is_handed_to_the_merger() {
        let cdn = three_segment_cdn();
        let origin = start(cdn).await;
        let dir = tempfile::tempdir().unwrap();
        let merger = Arc::new(RecordingMerger::default());

        let config = MissionConfig {
            merge: true,
            ..fast_config(dir.path())
        };
        let report = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            config,
        )
        .with_merger(merger.clone())
        .run()
        .await
        .unwrap();

        assert_eq!(merger.calls.load(Ordering::SeqCst), 1);
        let fragments = merger.fragments.lock().unwrap().clone().unwrap();
        assert!(fragments.join("media.m3u8").exists());
        assert_eq!(report.merged, Some(dir.path().join("show.mp4")));
    }

    #[tokio::test]
    async fn master_playlist_selects_best_rendition() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/master.m3u8",
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=640x360\n\
             lo/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
             hi/index.m3u8\n",
        );
        for rendition in ["hi", "lo"] {
            cdn.put(
                &format!("live/{rendition}/index.m3u8"),
                media_playlist(7, &["part_7.ts", "part_8.ts"], true),
            );
            for n in 7..=8 {
                cdn.put(&format!("live/{rendition}/part_{n}.ts"), segment_body(n));
            }
        }
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let report = mission(
            MissionSpec::new(format!("{origin}/live/master.m3u8"), "show").rendition(0),
            fast_config(dir.path()),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.successful, 2);
        assert_eq!(cdn.hits("live/hi/part_8.ts"), 1);
        assert_eq!(cdn.hits("live/lo/part_8.ts"), 0);
        let backup = dir.path().join("backup").join("show");
        assert!(backup.join("master.m3u8").exists());
        assert!(backup.join("index.m3u8").exists());
    }

    #[tokio::test]
    async fn encrypted_segments_are_decrypted_next_to_the_backup() {
        use cipher::block_padding::Pkcs7;
        use cipher::{BlockEncryptMut, KeyIvInit};

        let key = *b"0123456789abcdef";
        let encrypt = |plain: &[u8]| {
            let cipher = cbc::Encryptor::<aes::Aes128>::new(&key.into(), &[0u8; 16].into());
            let mut buffer = vec![0u8; (plain.len() / 16 + 1) * 16];
            buffer[..plain.len()].copy_from_slice(plain);
            cipher
                .encrypt_padded_mut::<Pkcs7>(&mut buffer, plain.len())
                .unwrap()
                .to_vec()
        };

        let cdn = Arc::new(TestCdn::default());
        let mut playlist = media_playlist(1, &["enc_1.ts", "enc_2.ts"], true);
        playlist = playlist.replace(
            "#EXTINF:2.000,\nenc_1.ts",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:2.000,\nenc_1.ts",
        );
        cdn.put("live/index.m3u8", playlist);
        cdn.put("live/key.bin", key.to_vec());
        for n in 1..=2 {
            cdn.put(&format!("live/enc_{n}.ts"), encrypt(&segment_body(n)));
        }
        let origin = start(cdn).await;
        let dir = tempfile::tempdir().unwrap();

        let report = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            fast_config(dir.path()),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(report.successful, 2);

        let backup = dir.path().join("backup").join("show");
        assert_eq!(
            tokio::fs::read(backup.join("fragments").join("server.key"))
                .await
                .unwrap(),
            key
        );
        for n in 1..=2 {
            let decrypted = tokio::fs::read(backup.join("decrypt").join(format!("enc_{n}.ts")))
                .await
                .unwrap();
            assert_eq!(decrypted, segment_body(n));
        }
        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert!(manifest.contains("URI=\"server.key\""));
    }

    #[tokio::test]
    async fn stop_before_first_poll_schedules_nothing() {
        let cdn = three_segment_cdn();
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let stop = tokio_util::sync::CancellationToken::new();
        stop.cancel();

        let report = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            fast_config(dir.path()),
        )
        .with_stop_token(stop)
        .run()
        .await
        .unwrap();

        assert_eq!(report.successful + report.failed, 0);
        assert_eq!(cdn.hits("live/seg_002.ts"), 0);
        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert!(!manifest.contains("#EXTINF:"));
        assert!(manifest.ends_with("#EXT-X-ENDLIST"));
    }

    #[tokio::test]
    async fn unreachable_playlist_ends_the_stream_hard() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/index.m3u8",
            media_playlist(1, &["seg_1.ts", "seg_2.ts"], false),
        );
        for n in 1..=2 {
            cdn.put(&format!("live/seg_{n}.ts"), segment_body(n));
        }
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = EventSink::channel();

        let recording = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            fast_config(dir.path()),
        )
        .with_events(events);

        let watcher = async {
            while let Some(event) = rx.recv().await {
                match event {
                    MissionEvent::PlaylistRefreshed { .. } => cdn.remove("live/index.m3u8"),
                    MissionEvent::StreamEnded { hard } => return Some(hard),
                    _ => {}
                }
            }
            None
        };
        let (report, ended) = tokio::join!(recording.run(), watcher);

        assert_eq!(ended, Some(true));
        let report = report.unwrap();
        assert_eq!(report.successful + report.failed, 2);
    }

    #[tokio::test]
    async fn stop_during_download_lets_the_running_segment_finish() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/index.m3u8",
            media_playlist(1, &["seg_1.ts", "seg_2.ts"], false),
        );
        for n in 1..=2 {
            cdn.put(&format!("live/seg_{n}.ts"), segment_body(n));
        }
        cdn.slow("live/seg_2.ts", Duration::from_millis(300));
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let stop = tokio_util::sync::CancellationToken::new();
        let (events, mut rx) = EventSink::channel();

        let recording = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            MissionConfig {
                stagnation_limit: 100,
                ..fast_config(dir.path())
            },
        )
        .with_stop_token(stop.clone())
        .with_events(events);

        let watcher = async {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    MissionEvent::SegmentCompleted { sequence: 1, .. } => stop.cancel(),
                    MissionEvent::StreamEnded { hard } => return (seen, Some(hard)),
                    other => seen.push(other),
                }
            }
            (seen, None)
        };
        let (report, (seen, ended)) = tokio::join!(recording.run(), watcher);

        assert_eq!(ended, Some(false));
        assert!(seen.iter().any(|e| matches!(
            e,
            MissionEvent::SegmentCompleted { sequence: 2, .. }
        )));
        let report = report.unwrap();
        assert_eq!((report.successful, report.failed), (2, 0));
        assert_eq!(cdn.hits("live/seg_2.ts"), 1);
        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert!(manifest.contains("seg_2.ts"));
    }

    fn nested_master_cdn() -> Arc<TestCdn> {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\nstreams/hi/index.m3u8\n",
        );
        cdn
    }

    #[tokio::test]
    async fn segments_resolve_against_master_when_media_base_misses() {
        let cdn = nested_master_cdn();
        cdn.put(
            "live/streams/hi/index.m3u8",
            media_playlist(1, &["chunks/seg_1.ts", "chunks/seg_2.ts"], true),
        );
        for n in 1..=2 {
            cdn.put(&format!("live/chunks/seg_{n}.ts"), segment_body(n));
        }
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let report = mission(
            MissionSpec::new(format!("{origin}/live/master.m3u8"), "show"),
            fast_config(dir.path()),
        )
        .run()
        .await
        .unwrap();

        assert_eq!((report.successful, report.failed), (2, 0));
        assert!(cdn.hits("live/streams/hi/chunks/seg_1.ts") >= 1);
        assert_eq!(cdn.hits("live/streams/hi/chunks/seg_2.ts"), 0);
        assert!(cdn.hits("live/chunks/seg_2.ts") >= 1);
    }

    #[tokio::test]
    async fn moved_segments_are_followed_to_a_new_base() {
        let cdn = nested_master_cdn();
        cdn.put(
            "live/streams/hi/index.m3u8",
            media_playlist(1, &["chunks/seg_1.ts", "chunks/seg_2.ts"], false),
        );
        for n in 1..=2 {
            cdn.put(&format!("live/streams/hi/chunks/seg_{n}.ts"), segment_body(n));
        }
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let stop = tokio_util::sync::CancellationToken::new();
        let (events, mut rx) = EventSink::channel();

        let recording = mission(
            MissionSpec::new(format!("{origin}/live/master.m3u8"), "show"),
            MissionConfig {
                stagnation_limit: 100,
                ..fast_config(dir.path())
            },
        )
        .with_stop_token(stop.clone())
        .with_events(events);

        let watcher = async {
            let mut completed = 0;
            while let Some(event) = rx.recv().await {
                match event {
                    MissionEvent::SegmentCompleted { sequence: 3, .. } => stop.cancel(),
                    MissionEvent::SegmentCompleted { .. } => {
                        completed += 1;
                        if completed == 2 {
                            for n in 1..=2 {
                                cdn.remove(&format!("live/streams/hi/chunks/seg_{n}.ts"));
                            }
                            for n in 2..=3 {
                                cdn.put(&format!("live/chunks/seg_{n}.ts"), segment_body(n));
                            }
                            cdn.put(
                                "live/streams/hi/index.m3u8",
                                media_playlist(2, &["chunks/seg_2.ts", "chunks/seg_3.ts"], false),
                            );
                        }
                    }
                    MissionEvent::StreamEnded { .. } => break,
                    _ => {}
                }
            }
        };
        let (report, ()) = tokio::join!(recording.run(), watcher);

        let report = report.unwrap();
        assert_eq!((report.successful, report.failed), (3, 0));
        assert_eq!(cdn.hits("live/chunks/seg_3.ts"), 1);
        assert_eq!(cdn.hits("live/streams/hi/chunks/seg_3.ts"), 0);
    }

    #[tokio::test]
    async fn silent_origin_fails_the_mission_within_the_playlist_timeout() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let dir = tempfile::tempdir().unwrap();

        let run = mission(
            MissionSpec::new(format!("http://{addr}/live/index.m3u8"), "show"),
            MissionConfig {
                playlist_timeout: Duration::from_millis(200),
                ..fast_config(dir.path())
            },
        )
        .run();
        let outcome = tokio::time::timeout(Duration::from_secs(10), run).await;

        let err = outcome.expect("mission hung on a silent origin").unwrap_err();
        assert!(matches!(err, RewindError::Network { .. }), "{err}");
    }

    #[tokio::test]
    async fn unclassifiable_entry_is_fatal() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put("live/index.m3u8", "<html>not a playlist</html>");
        let origin = start(cdn).await;
        let dir = tempfile::tempdir().unwrap();

        let err = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            fast_config(dir.path()),
        )
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, RewindError::Classification { .. }));
        assert!(err.is_mission_fatal());
    }

    #[tokio::test]
    async fn unreachable_segments_fail_patch_resolution() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/index.m3u8",
            media_playlist(1, &["gone_1.ts", "gone_2.ts"], true),
        );
        let origin = start(cdn).await;
        let dir = tempfile::tempdir().unwrap();

        let err = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            fast_config(dir.path()),
        )
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, RewindError::PatchResolution { .. }));
    }
}

mod backfill_tests {
    use super::*;

    fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<MissionEvent>) -> Vec<MissionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn contiguous_ids_are_recovered_from_the_boundary() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/index.m3u8",
            media_playlist(5, &["seg_5.ts", "seg_6.ts"], false),
        );
        for n in 2..=6 {
            cdn.put(&format!("live/seg_{n}.ts"), segment_body(n));
        }
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = EventSink::channel();

        let config = MissionConfig {
            full_download: true,
            boundary_distance: 10,
            ..fast_config(dir.path())
        };
        let report = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            config,
        )
        .with_events(events)
        .run()
        .await
        .unwrap();

        assert_eq!(report.successful, 5);
        assert_eq!(report.failed, 0);
        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert!(manifest.find("seg_2.ts").unwrap() < manifest.find("seg_6.ts").unwrap());
        assert!(drain_events(&mut rx).contains(&MissionEvent::BackfillSeeded {
            earliest: 2,
            discovered: 3,
        }));
    }

    #[tokio::test]
    async fn sparse_ids_are_recovered_by_guessing() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put(
            "live/index.m3u8",
            media_playlist(10, &["seg_10.ts", "seg_12.ts"], false),
        );
        for n in [8, 10, 12] {
            cdn.put(&format!("live/seg_{n}.ts"), segment_body(n));
        }
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = EventSink::channel();

        let config = MissionConfig {
            full_download: true,
            ..fast_config(dir.path())
        };
        let report = mission(
            MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
            config,
        )
        .with_events(events)
        .run()
        .await
        .unwrap();

        assert_eq!(report.successful, 3);
        let manifest = tokio::fs::read_to_string(report.manifest.as_ref().unwrap())
            .await
            .unwrap();
        assert!(manifest.find("seg_8.ts").unwrap() < manifest.find("seg_12.ts").unwrap());
        assert!(drain_events(&mut rx).contains(&MissionEvent::BackfillSeeded {
            earliest: 8,
            discovered: 2,
        }));
    }
}

mod session_tests {
    use super::*;
    use rewind_engine::config::create_client;
    use rewind_engine::fetcher::{SegmentFetcher, SegmentJob};
    use rewind_engine::retry::RetryPolicy;
    use rewind_engine::session::HttpSession;
    use rewind_engine::{CredentialSource, StaticCredentials};
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;

    /// Cookie source standing in for a live browser session.
    #[derive(Default)]
    struct RotatingCookies {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for RotatingCookies {
        fn cookie_header(&self) -> Option<String> {
            Some(format!("token={}", self.refreshes.load(Ordering::SeqCst)))
        }

        async fn refresh(&self) -> rewind_engine::Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn current_url(&self) -> Option<String> {
            Some("https://watch.test/room".into())
        }

        fn is_rotating(&self) -> bool {
            true
        }
    }

    fn client() -> reqwest::Client {
        create_client(&DownloaderConfig::builder().use_system_proxy(false).build()).unwrap()
    }

    #[tokio::test]
    async fn cookies_and_referer_are_sent() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put("live/index.m3u8", "#EXTM3U\n");
        let origin = start(cdn.clone()).await;

        let session = HttpSession::new(
            client(),
            Some("https://page.test/".into()),
            Arc::new(StaticCredentials::parse("sid=abc; lang=en")),
        );
        session
            .fetch_text(&format!("{origin}/live/index.m3u8"))
            .await
            .unwrap();

        let seen = cdn.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "live/index.m3u8");
        assert_eq!(seen[0].cookie.as_deref(), Some("sid=abc; lang=en"));
        assert_eq!(seen[0].referer.as_deref(), Some("https://page.test/"));
    }

    #[tokio::test]
    async fn rotating_credentials_refresh_before_each_retry() {
        let cdn = Arc::new(TestCdn::default());
        cdn.fail("live/seg_1.ts");
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let cookies = Arc::new(RotatingCookies::default());
        let session = HttpSession::new(
            client(),
            Some("https://ignored.test/".into()),
            cookies.clone(),
        );
        let fetcher = SegmentFetcher::new(
            session,
            Arc::new(Semaphore::new(1)),
            RetryPolicy::fixed(3, Duration::from_millis(5)),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let job = SegmentJob {
            sequence: 1,
            url: format!("{origin}/live/seg_1.ts"),
            path: dir.path().join("seg_1.ts"),
        };

        assert!(fetcher.download(&job).await.is_err());
        assert_eq!(cdn.hits("live/seg_1.ts"), 3);
        assert_eq!(cookies.refreshes.load(Ordering::SeqCst), 2);

        let seen = cdn.requests();
        let cookies_sent: Vec<_> = seen.iter().filter_map(|r| r.cookie.clone()).collect();
        assert_eq!(cookies_sent, ["token=0", "token=1", "token=2"]);
        assert!(
            seen.iter()
                .all(|r| r.referer.as_deref() == Some("https://watch.test/room"))
        );
        assert!(!job.path.exists());
    }

    #[tokio::test]
    async fn existing_file_of_matching_size_is_kept() {
        let cdn = Arc::new(TestCdn::default());
        cdn.put("live/seg_4.ts", segment_body(4));
        let origin = start(cdn.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg_4.ts");
        let local = vec![b'x'; segment_body(4).len()];
        tokio::fs::write(&path, &local).await.unwrap();

        let fetcher = SegmentFetcher::new(
            HttpSession::new(client(), None, Arc::new(rewind_engine::NoCredentials)),
            Arc::new(Semaphore::new(1)),
            RetryPolicy::fixed(1, Duration::from_millis(5)),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let job = SegmentJob {
            sequence: 4,
            url: format!("{origin}/live/seg_4.ts"),
            path: path.clone(),
        };

        let bytes = fetcher.download(&job).await.unwrap();
        assert_eq!(bytes, local.len() as u64);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), local);
    }
}

mod runner_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn each_mission_writes_its_own_log_file() {
        let origin = start(three_segment_cdn()).await;
        let dir = tempfile::tempdir().unwrap();
        let missions = vec![
            mission(
                MissionSpec::new(format!("{origin}/live/index.m3u8"), "show"),
                fast_config(dir.path()),
            ),
            mission(
                MissionSpec::new(format!("{origin}/gone/index.m3u8"), "other"),
                fast_config(dir.path()),
            ),
        ];

        let runner = MissionRunner::new(2);
        let results = tokio::task::spawn_blocking(move || runner.run(missions))
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());

        let backup = dir.path().join("backup");
        let show = std::fs::read_to_string(backup.join("show.log")).unwrap();
        assert!(show.contains("Mission started"));
        assert!(!show.contains("Mission failed"));
        let other = std::fs::read_to_string(backup.join("other.log")).unwrap();
        assert!(other.contains("Mission failed"));
        assert!(!other.contains("Mission started"));
    }
}
