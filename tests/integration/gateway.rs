//! Assembled gateway: background probing and startup failures

use super::mock_server::MockServerFixture;
use gateway_resilience::config::RegistryConfig;
use gateway_resilience::{Error, Gateway, GatewayConfig, InstanceStatus};
use serde_json::json;
use std::time::Duration;

fn config_with_static(url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    for service in [
        &mut config.segmentation,
        &mut config.runner,
        &mut config.archive,
    ] {
        service.static_urls = vec![url.to_string()];
        service.health_check_interval = Duration::from_secs(60);
    }
    config.health_check_timeout = Duration::from_millis(300);
    config
}

#[tokio::test]
async fn test_services_only_known_to_registry_are_probed() {
    let mut registry_server = MockServerFixture::new().await;
    let billing_url = format!("{}/billing", registry_server.base_url);
    let _services = registry_server
        .mock_json(
            "GET",
            "/services",
            200,
            json!([
                {"serviceName": "billing", "instances": [
                    {"instanceId": "b-1", "baseUrl": billing_url}
                ]}
            ]),
        )
        .await;
    let _billing_health = registry_server
        .mock_json("GET", "/billing/health", 503, json!({"status": "down"}))
        .await;

    let mut config = config_with_static("http://127.0.0.1:9");
    config.registry = RegistryConfig {
        enabled: true,
        url: Some(registry_server.base_url.clone()),
        refresh_interval: Duration::from_secs(60),
    };
    let gateway = Gateway::start(config).unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let billing = gateway.registry().instance("billing", "b-1").unwrap();
    assert!(billing.last_checked.is_some());
    assert_eq!(billing.status, InstanceStatus::Inactive);
    assert!(!gateway.registry().is_service_healthy("billing"));
}

#[tokio::test]
async fn test_rejected_config_leaves_no_background_tasks() {
    let mut fixture = MockServerFixture::new().await;
    let health = fixture
        .mock_json_times("GET", "/health", 200, json!({"status": "ok"}), 0)
        .await;

    let mut config = config_with_static(&fixture.base_url);
    config.archive.name = String::new();

    assert!(matches!(
        Gateway::start(config),
        Err(Error::Configuration { .. })
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    health.assert_async().await;
}

