#![allow(clippy::unwrap_used)]
// Integration tests for `LayerPipeline` against a wiremock server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geolayer_api::{MemoryResponseStore, ResponseStore};
use geolayer_core::{
    BatchItem, BatchProgress, Color, CoreError, FeatureCollection, Geometry, IconRef, ItemStatus, LayerDescriptor,
    LayerPipeline, LineStyle, PipelineConfig, Position, ProcessOptions, StyleMeta,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.fetch.retry_base = Duration::from_millis(1);
    config.fetch.jitter = false;
    config.fetch.rate_limit_cooldown = Duration::from_millis(1);
    config.fetch.timeout = Duration::from_secs(5);
    config.icons.retry_base = Duration::from_millis(1);
    config.icons.jitter = false;
    config.icons.rate_limit_cooldown = Duration::from_millis(1);
    config
}

struct Harness {
    server: MockServer,
    pipeline: LayerPipeline,
    layers: Arc<MemoryResponseStore>,
    icons: Arc<MemoryResponseStore>,
}

async fn setup_with(config: PipelineConfig) -> Harness {
    let server = MockServer::start().await;
    let layers = Arc::new(MemoryResponseStore::new("geojson-v1"));
    let icons = Arc::new(MemoryResponseStore::new("icons-v1"));
    let pipeline = LayerPipeline::with_stores(
        config,
        Some(layers.clone() as Arc<dyn ResponseStore>),
        Some(icons.clone() as Arc<dyn ResponseStore>),
    )
    .unwrap();
    Harness {
        server,
        pipeline,
        layers,
        icons,
    }
}

async fn setup() -> Harness {
    setup_with(fast_config()).await
}

fn points(n: usize) -> Value {
    let features: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [i, i] },
                "properties": { "n": i }
            })
        })
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}

fn descriptor(server: &MockServer, key: &str) -> LayerDescriptor {
    LayerDescriptor::new(key, format!("{}/layer/{key}/geojson", server.uri()))
}

async fn mount_layer(server: &MockServer, key: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/layer/{key}/geojson")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

// ── Single layer ────────────────────────────────────────────────────

#[tokio::test]
async fn test_toggle_on_caches_and_activates() {
    let h = setup().await;
    mount_layer(&h.server, "roads", points(3)).await;

    let mut seen = Vec::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let entry = h
        .pipeline
        .toggle_on(descriptor(&h.server, "roads"), move |_, count| {
            tx.send(count).unwrap();
        })
        .await
        .unwrap();
    seen.extend(rx.try_iter());

    assert_eq!(entry.data.len(), 3);
    assert_eq!(entry.key(), "roads");
    assert_eq!(seen, vec![1, 2, 3]);
    assert!(h.pipeline.is_active("roads"));
    assert!(h.pipeline.cache().contains("roads"));
    assert_eq!(h.layers.len(), 1);
}

#[tokio::test]
async fn test_cached_layer_is_returned_without_network() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/water/geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(points(2)))
        .expect(1)
        .mount(&h.server)
        .await;

    let first = h
        .pipeline
        .toggle_on(descriptor(&h.server, "water"), |_, _| {})
        .await
        .unwrap();
    h.pipeline.toggle_off("water");
    let second = h
        .pipeline
        .toggle_on(descriptor(&h.server, "water"), |_, _| {})
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.pipeline.fetch_stats().network_attempts, 1);
    assert!(h.pipeline.is_active("water"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_toggles_share_one_fetch() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/parks/geojson"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(points(4))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let d = descriptor(&h.server, "parks");
    let (a, b) = tokio::join!(
        h.pipeline.toggle_on(d.clone(), |_, _| {}),
        h.pipeline.toggle_on(d, |_, _| {}),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    let stats = h.pipeline.dedup_stats();
    assert_eq!(stats.new_requests, 1);
    assert_eq!(stats.coalesced_requests, 1);
}

#[tokio::test]
async fn test_toggle_off_keeps_cached_result() {
    let h = setup().await;
    mount_layer(&h.server, "rail", points(1)).await;

    h.pipeline
        .toggle_on(descriptor(&h.server, "rail"), |_, _| {})
        .await
        .unwrap();
    assert!(h.pipeline.toggle_off("rail"));
    assert!(!h.pipeline.toggle_off("rail"));

    assert!(h.pipeline.active_keys().is_empty());
    assert!(h.pipeline.cache().contains("rail"));
}

#[tokio::test]
async fn test_simplification_reduces_near_collinear_line() {
    let h = setup().await;
    let coordinates: Vec<[f64; 2]> = (0..100_i32)
        .map(|i| {
            let x = f64::from(i) * 0.1;
            [x, 0.001 * (f64::from(i) * 1.7).sin()]
        })
        .collect();
    mount_layer(
        &h.server,
        "42",
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": coordinates },
                "properties": {}
            }]
        }),
    )
    .await;

    let d = descriptor(&h.server, "42").with_tolerance(0.01);
    assert!(d.url.ends_with("/layer/42/geojson"));
    let entry = h.pipeline.toggle_on(d, |_, _| {}).await.unwrap();

    let positions = entry.data.position_count();
    assert!(positions <= 10, "expected at most 10 positions, got {positions}");
    let Some(Geometry::LineString { coordinates }) = &entry.data.features[0].geometry else {
        panic!("expected a LineString");
    };
    assert_eq!(coordinates.first(), Some(&Position::new(0.0, 0.0)));
    assert!((coordinates.last().unwrap().x() - 9.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_style_and_icon_are_merged_into_properties() {
    let h = setup().await;
    mount_layer(&h.server, "poi", points(2)).await;
    Mock::given(method("GET"))
        .and(path("/icons/pin.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
        .expect(1)
        .mount(&h.server)
        .await;

    let style = StyleMeta {
        color: Some("#FF0000".parse::<Color>().unwrap()),
        line_style: Some(LineStyle::Dashed),
        icon_url: Some(format!("{}/icons/pin.png", h.server.uri())),
        fill_opacity: None,
    };
    let entry = h
        .pipeline
        .toggle_on(descriptor(&h.server, "poi").with_style(style), |_, _| {})
        .await
        .unwrap();

    let props = &entry.data.features[0].properties;
    assert_eq!(props["stroke"], json!("#ff0000"));
    assert_eq!(props["n"], json!(0));
    let icon = IconRef::parse(props["icon"].as_str().unwrap());
    assert!(icon.is_blob(), "expected a blob reference, got {icon}");
    assert_eq!(h.icons.len(), 1);
}

// ── Failure handling ────────────────────────────────────────────────

#[tokio::test]
async fn test_streaming_parse_failure_falls_back_to_full_fetch() {
    let h = setup().await;
    let truncated = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[1,2]},"properties":{}},{"type":"Feat"#;

    Mock::given(method("GET"))
        .and(path("/layer/flaky/geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_string(truncated))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.server)
        .await;
    mount_layer(&h.server, "flaky", points(2)).await;

    let entry = h
        .pipeline
        .toggle_on(descriptor(&h.server, "flaky"), |_, _| {})
        .await
        .unwrap();

    assert_eq!(entry.data.len(), 2);
    assert_eq!(h.pipeline.fetch_stats().network_attempts, 2);
    // The durable entry now holds the good body.
    let cached = h.layers.get(&entry.meta.url).await.unwrap().unwrap();
    assert_eq!(FeatureCollection::from_slice(&cached).unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_body_fails_once_with_parse_error() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/broken/geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_string("this is not geojson"))
        .expect(2)
        .mount(&h.server)
        .await;

    let err = h
        .pipeline
        .toggle_on(descriptor(&h.server, "broken"), |_, _| {})
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Parse { .. }), "got: {err:?}");
    assert!(h.layers.is_empty());
    assert!(!h.pipeline.cache().contains("broken"));
    assert!(!h.pipeline.is_active("broken"));
}

#[tokio::test]
async fn test_layer_load_retries_transient_failures() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/retry/geojson"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&h.server)
        .await;
    mount_layer(&h.server, "retry", points(1)).await;

    let entry = h
        .pipeline
        .toggle_on(descriptor(&h.server, "retry"), |_, _| {})
        .await
        .unwrap();

    assert_eq!(entry.data.len(), 1);
    assert_eq!(h.pipeline.fetch_stats().network_attempts, 3);
}

#[tokio::test]
async fn test_cancelled_toggle_rejects_with_cancelled() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/slow/geojson"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(points(1))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&h.server)
        .await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = h
        .pipeline
        .toggle_on_with_cancel(descriptor(&h.server, "slow"), Some(token), |_, _| {})
        .await
        .unwrap_err();

    assert_eq!(err, CoreError::Cancelled);
    assert!(!h.pipeline.cache().contains("slow"));
}

#[tokio::test]
async fn test_slow_icon_falls_back_without_holding_the_layer() {
    let mut config = fast_config();
    config.fetch.timeout = Duration::from_millis(200);
    let h = setup_with(config).await;
    mount_layer(&h.server, "poi", points(1)).await;
    Mock::given(method("GET"))
        .and(path("/icons/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PNG)
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&h.server)
        .await;

    let icon_url = format!("{}/icons/slow.png", h.server.uri());
    let style = StyleMeta {
        icon_url: Some(icon_url.clone()),
        ..StyleMeta::default()
    };
    let started = Instant::now();
    let entry = h
        .pipeline
        .toggle_on(descriptor(&h.server, "poi").with_style(style), |_, _| {})
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(entry.data.features[0].properties["icon"], json!(icon_url));
    assert!(h.pipeline.is_active("poi"));
}

#[tokio::test]
async fn test_cancel_during_slow_icon_rejects_promptly() {
    let h = setup().await;
    mount_layer(&h.server, "poi", points(1)).await;
    Mock::given(method("GET"))
        .and(path("/icons/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PNG)
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&h.server)
        .await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let style = StyleMeta {
        icon_url: Some(format!("{}/icons/slow.png", h.server.uri())),
        ..StyleMeta::default()
    };
    let started = Instant::now();
    let err = h
        .pipeline
        .toggle_on_with_cancel(descriptor(&h.server, "poi").with_style(style), Some(token), |_, _| {})
        .await
        .unwrap_err();

    assert_eq!(err, CoreError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert!(!h.pipeline.cache().contains("poi"));
    assert!(!h.pipeline.is_active("poi"));
}

// ── Batches ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_reports_progress_per_layer() {
    let h = setup().await;
    let keys = ["a", "b", "c", "d", "e"];
    for key in keys {
        mount_layer(&h.server, key, points(2)).await;
    }
    let descriptors = keys.iter().map(|k| descriptor(&h.server, k)).collect();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let report = h
        .pipeline
        .load_batch(descriptors, move |p: BatchProgress| sink.lock().unwrap().push((p.completed, p.total)))
        .await;

    assert_eq!(report.count(ItemStatus::Fulfilled), 5);
    assert_eq!(
        *progress.lock().unwrap(),
        vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]
    );
    assert_eq!(h.pipeline.active_keys().len(), 5);

    assert_eq!(h.pipeline.disable_batch(keys.as_slice()), 5);
    assert!(h.pipeline.active_keys().is_empty());
    assert_eq!(h.pipeline.cache().len(), 5);
}

#[tokio::test]
async fn test_batch_collects_failures_per_key() {
    let mut config = fast_config();
    config.fetch.max_retries = 1;
    let h = setup_with(config).await;
    mount_layer(&h.server, "ok", points(1)).await;
    Mock::given(method("GET"))
        .and(path("/layer/gone/geojson"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    let report = h
        .pipeline
        .load_batch(
            vec![descriptor(&h.server, "ok"), descriptor(&h.server, "gone")],
            |_| {},
        )
        .await;

    assert_eq!(report.total(), 2);
    assert_eq!(report.count(ItemStatus::Fulfilled), 1);
    let rejected: Vec<_> = report.rejected().collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, "gone");
    assert!(matches!(rejected[0].1, CoreError::NotFound { .. }));
    assert!(h.pipeline.is_active("ok"));
    assert!(!h.pipeline.is_active("gone"));
}

#[tokio::test]
async fn test_batch_uses_cached_layers() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/x/geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(points(1)))
        .expect(1)
        .mount(&h.server)
        .await;

    let single = h
        .pipeline
        .toggle_on(descriptor(&h.server, "x"), |_, _| {})
        .await
        .unwrap();
    let report = h
        .pipeline
        .load_batch(vec![descriptor(&h.server, "x")], |_| {})
        .await;

    let (_, entry) = report.fulfilled().next().unwrap();
    assert!(Arc::ptr_eq(&single, entry));
}

#[tokio::test]
async fn test_new_batch_reloads_layer_left_by_superseded_batch() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/layer/shared/geojson"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(points(2))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;

    let first = h.pipeline.load_batch(vec![descriptor(&h.server, "shared")], |_| {});
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.pipeline.load_batch(vec![descriptor(&h.server, "shared")], |_| {}).await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.count(ItemStatus::Aborted), 1);
    assert_eq!(second.count(ItemStatus::Fulfilled), 1);
    let (_, entry) = second.fulfilled().next().unwrap();
    assert_eq!(entry.data.len(), 2);
    assert!(h.pipeline.cache().contains("shared"));
    assert!(h.pipeline.is_active("shared"));
}

// ── Icons ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_icon_downloads_respect_concurrency_bound() {
    let h = setup().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PNG)
                .set_delay(Duration::from_millis(50)),
        )
        .expect(8)
        .mount(&h.server)
        .await;

    let urls: Vec<String> = (0..8).map(|i| format!("{}/icons/{i}.png", h.server.uri())).collect();
    let refs = futures::future::join_all(urls.iter().map(|u| h.pipeline.resolve_icon(u))).await;

    assert!(refs.iter().all(IconRef::is_blob));
    let stats = h.pipeline.icons().stats();
    assert_eq!(stats.downloads, 8);
    assert_eq!(stats.peak_in_flight, 3);
}

#[tokio::test]
async fn test_icon_not_found_fails_fast_to_remote_url() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/icons/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&h.server)
        .await;

    let url = format!("{}/icons/missing.png", h.server.uri());
    let icon = h.pipeline.resolve_icon(&url).await;

    assert_eq!(icon, IconRef::Remote(url));
    assert_eq!(h.pipeline.icons().stats().fallbacks, 1);
}

#[tokio::test]
async fn test_icon_server_errors_exhaust_attempts_then_fall_back() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/icons/broken.png"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&h.server)
        .await;

    let url = format!("{}/icons/broken.png", h.server.uri());
    let icon = h.pipeline.resolve_icon(&url).await;

    assert_eq!(icon, IconRef::Remote(url));
    let stats = h.pipeline.icons().stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.downloads, 0);
    assert!(h.icons.is_empty());
}

#[tokio::test]
async fn test_icon_store_hit_skips_network() {
    let h = setup().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&h.server)
        .await;

    let url = format!("{}/icons/cached.png", h.server.uri());
    h.icons.put(&url, Bytes::from_static(PNG)).await.unwrap();

    let icon = h.pipeline.resolve_icon(&url).await;
    let IconRef::Blob { id } = icon else {
        panic!("expected blob, got {icon}");
    };
    let blob = h.pipeline.icons().blob(&id).unwrap();
    assert_eq!(blob.content_type, Some("image/png"));
    assert_eq!(h.pipeline.icons().stats().store_hits, 1);
}

// ── Local processing and lifecycle ──────────────────────────────────

#[tokio::test]
async fn test_process_local_keeps_input_order() {
    let h = setup().await;
    let items = ["first", "second"]
        .into_iter()
        .map(|key| BatchItem {
            key: key.into(),
            collection: FeatureCollection::from_slice(points(1).to_string().as_bytes()).unwrap(),
            options: ProcessOptions::default(),
        })
        .collect();

    let out = h.pipeline.process_local(items).await.unwrap();
    let keys: Vec<_> = out.iter().map(|k| k.key.as_str()).collect();
    assert_eq!(keys, vec!["first", "second"]);
}

#[tokio::test]
async fn test_subscribers_see_activation_changes() {
    let h = setup().await;
    mount_layer(&h.server, "sub", points(1)).await;
    let mut active = h.pipeline.subscribe_active();
    assert!(active.current().is_empty());

    h.pipeline
        .toggle_on(descriptor(&h.server, "sub"), |_, _| {})
        .await
        .unwrap();

    let snapshot = active.changed().await.unwrap();
    assert!(snapshot.contains("sub"));
    assert_eq!(h.pipeline.subscribe_layers().latest().len(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_processing() {
    let h = setup().await;
    h.pipeline.init().unwrap();
    h.pipeline.shutdown().await;

    let err = h
        .pipeline
        .process_local(vec![BatchItem {
            key: "late".into(),
            collection: FeatureCollection::default(),
            options: ProcessOptions::default(),
        }])
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::WorkerUnavailable);
}
