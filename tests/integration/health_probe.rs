//! Health probing against live (mock) instances

use super::mock_server::{hanging_server, MockServerFixture};
use gateway_resilience::health::{HealthCheckConfig, HealthProber};
use gateway_resilience::registry::InstanceUpdate;
use gateway_resilience::telemetry::{RecordingObserver, TransitionEvent};
use gateway_resilience::transport::HttpTransport;
use gateway_resilience::{InstanceRegistry, InstanceStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn prober(registry: &Arc<InstanceRegistry>, timeout_ms: u64) -> HealthProber {
    HealthProber::new(
        registry.clone(),
        Arc::new(HttpTransport::new().unwrap()),
        HealthCheckConfig::default().with_timeout(Duration::from_millis(timeout_ms)),
    )
}

#[tokio::test]
async fn test_probe_classifies_and_copies_version_and_metadata() {
    let mut healthy = MockServerFixture::new().await;
    let mut degraded = MockServerFixture::new().await;
    let mut failing = MockServerFixture::new().await;

    let _h = healthy
        .server
        .mock("GET", "/health")
        .match_header("x-health-check", "true")
        .with_status(200)
        .with_body(r#"{"status":"ok","version":"1.0.3"}"#)
        .create_async()
        .await;
    let _d = degraded
        .mock_json(
            "GET",
            "/health",
            200,
            json!({"status": "degraded", "version": "1.1.0", "metadata": {"queueDepth": 120}}),
        )
        .await;
    let _f = failing
        .mock_json("GET", "/health", 503, json!({"version": "0.9.0"}))
        .await;

    let registry = Arc::new(InstanceRegistry::new());
    for (id, fixture) in [("h", &healthy), ("d", &degraded), ("f", &failing)] {
        registry
            .upsert_instance(
                "segmentation",
                InstanceUpdate::new(fixture.base_url.clone()).with_instance_id(id),
            )
            .unwrap();
    }

    let round = prober(&registry, 1000).probe_all().await;
    assert_eq!(round.probed, 3);
    assert_eq!((round.active, round.degraded, round.inactive), (1, 1, 1));

    let h = registry.instance("segmentation", "h").unwrap();
    assert_eq!(h.status, InstanceStatus::Active);
    assert_eq!(h.version, "1.0.3");

    let d = registry.instance("segmentation", "d").unwrap();
    assert_eq!(d.status, InstanceStatus::Degraded);
    assert_eq!(d.metadata.get("queueDepth"), Some(&json!(120)));

    let f = registry.instance("segmentation", "f").unwrap();
    assert_eq!(f.status, InstanceStatus::Inactive);
    assert_eq!(f.version, "0.9.0");
    assert!(f.last_checked.is_some());

    // Selection now only hands out the active instance.
    for _ in 0..3 {
        assert_eq!(
            registry.select_instance("segmentation").unwrap(),
            healthy.base_url
        );
    }
}

#[tokio::test]
async fn test_hanging_instance_does_not_delay_others() {
    let mut healthy = MockServerFixture::new().await;
    let _h = healthy.mock_json("GET", "/health", 200, json!({})).await;
    let (hanging_url, hanging) = hanging_server().await;

    let registry = Arc::new(InstanceRegistry::new());
    registry
        .upsert_instance("runner", InstanceUpdate::new(hanging_url.clone()))
        .unwrap();
    registry
        .upsert_instance("runner", InstanceUpdate::new(healthy.base_url.clone()))
        .unwrap();

    let started = Instant::now();
    let round = prober(&registry, 200).probe_all().await;
    let elapsed = started.elapsed();

    assert_eq!(round.active, 1);
    assert_eq!(round.inactive, 1);
    // Bounded by one probe timeout, not the sum of them.
    assert!(elapsed < Duration::from_millis(1500), "round took {elapsed:?}");
    assert_eq!(
        registry.instance("runner", &hanging_url).unwrap().status,
        InstanceStatus::Inactive
    );
    hanging.abort();
}

#[tokio::test]
async fn test_spawned_prober_probes_new_instances_out_of_band() {
    let mut fixture = MockServerFixture::new().await;
    let _m = fixture
        .mock_json("GET", "/health", 200, json!({"status": "degraded"}))
        .await;

    let registry = Arc::new(InstanceRegistry::new());
    let recorder = Arc::new(RecordingObserver::default());
    let handle = HealthProber::new(
        registry.clone(),
        Arc::new(HttpTransport::new().unwrap()),
        HealthCheckConfig::default()
            .with_interval(Duration::from_secs(3600))
            .with_timeout(Duration::from_millis(500)),
    )
    .with_observer(recorder.clone())
    .spawn();

    // Let the initial (empty) round pass, then register.
    tokio::time::sleep(Duration::from_millis(20)).await;
    registry
        .upsert_instance("archive", InstanceUpdate::new(fixture.base_url.clone()))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.abort();

    let inst = registry.instance("archive", &fixture.base_url).unwrap();
    assert_eq!(inst.status, InstanceStatus::Degraded);
    assert_eq!(
        recorder.events(),
        vec![TransitionEvent::InstanceStatus {
            service: "archive".into(),
            instance_id: fixture.base_url.clone(),
            previous: InstanceStatus::Active,
            current: InstanceStatus::Degraded,
        }]
    );
}

#[tokio::test]
async fn test_scoped_prober_ignores_other_services() {
    let mut fixture = MockServerFixture::new().await;
    let probe = fixture
        .mock_json_times("GET", "/health", 200, json!({}), 1)
        .await;

    let registry = Arc::new(InstanceRegistry::new());
    registry
        .upsert_instance("runner", InstanceUpdate::new(fixture.base_url.clone()))
        .unwrap();
    registry
        .upsert_instance("archive", InstanceUpdate::new("http://127.0.0.1:9"))
        .unwrap();

    let scoped = HealthProber::new(
        registry.clone(),
        Arc::new(HttpTransport::new().unwrap()),
        HealthCheckConfig::default()
            .with_timeout(Duration::from_millis(300))
            .with_scope("runner"),
    );
    let round = scoped.probe_all().await;

    assert_eq!(round.probed, 1);
    assert!(registry
        .instance("archive", "http://127.0.0.1:9")
        .unwrap()
        .last_checked
        .is_none());
    probe.assert_async().await;
}
