
use futures_util::SinkExt;
use harness::{next_data, test_config, ProxyHandle, WsEchoTarget};
use reqwest::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use wsrelay_proxy::api::LANDING_TEXT;
use wsrelay_proxy::ProxyConfigInput;

#[tokio::test]
async fn health_reports_capacity() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(ProxyConfigInput {
        max_connections: Some(1),
        ..test_config(&target.url())
    })
    .await;
    let http = reqwest::Client::new();

    let response = http.get(proxy.http_url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["activeConnections"], 0);
    assert_eq!(body["maxConnections"], 1);
    assert_eq!(body["totalConnections"], 0);
    assert!(body["uptimeMs"].is_u64());
    assert!(body["timestamp"].is_string());
    assert!(body["memoryUsage"].is_object());

    let _client = proxy.connect().await;
    proxy.wait_for_active(1).await;

    let response = http.get(proxy.http_url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["activeConnections"], 1);

    proxy.shutdown().await;
}

#[tokio::test]
async fn health_path_is_configurable() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(ProxyConfigInput {
        health_path: Some("/_relay/health".to_string()),
        ..test_config(&target.url())
    })
    .await;

    let response = reqwest::get(proxy.http_url("/_relay/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = reqwest::get(proxy.http_url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), LANDING_TEXT);

    proxy.shutdown().await;
}

#[tokio::test]
async fn stats_lists_active_connections() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut client = proxy.connect().await;
    client.send(Message::text("0123456789")).await.unwrap();
    next_data(&mut client).await;
    proxy.wait_for_messages(2).await;

    let body: serde_json::Value = reqwest::get(proxy.http_url("/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["totalConnections"], 1);
    assert_eq!(body["activeConnections"], 1);
    assert_eq!(body["totalMessages"], 2);
    assert_eq!(body["totalBytes"], 20);
    assert_eq!(body["totalErrors"], 0);
    assert!(body["averageLatencyMs"].as_f64().unwrap() >= 0.0);

    let connections = body["connections"].as_array().unwrap();
    assert_eq!(connections.len(), 1);
    let record = &connections[0];
    assert!(record["id"].as_str().unwrap().starts_with("conn_"));
    assert!(record["remoteAddress"].as_str().unwrap().starts_with("127.0.0.1:"));
    assert_eq!(record["inboundMessageCount"], 1);
    assert_eq!(record["inboundByteCount"], 10);
    assert_eq!(record["outboundMessageCount"], 1);
    assert_eq!(record["outboundByteCount"], 10);
    assert!(record["establishedAt"].is_string());
    assert!(record["lastActivityAt"].is_string());

    proxy.shutdown().await;
}

#[tokio::test]
async fn plain_requests_get_a_text_acknowledgement() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let response = reqwest::get(proxy.http_url("/anything/else")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(response.text().await.unwrap(), LANDING_TEXT);

    assert_eq!(target.connection_count(), 0);
    assert_eq!(proxy.server.registry().snapshot().await.total_connections, 0);

    proxy.shutdown().await;
}
