
use futures_util::SinkExt;
use harness::{next_data, test_config, ProxyHandle, WsEchoTarget};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn relays_text_and_binary_frames() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut client = proxy.connect().await;

    client.send(Message::text("hello through the relay")).await.unwrap();
    assert_eq!(next_data(&mut client).await, Message::text("hello through the relay"));

    client.send(Message::binary(vec![0u8, 1, 2, 255])).await.unwrap();
    assert_eq!(next_data(&mut client).await, Message::binary(vec![0u8, 1, 2, 255]));

    assert_eq!(target.connection_count(), 1);
    proxy.shutdown().await;
}

#[tokio::test]
async fn counts_frames_and_bytes_per_connection() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut client = proxy.connect().await;
    for size in [10usize, 20, 30] {
        client.send(Message::binary(vec![b'x'; size])).await.unwrap();
    }
    for size in [10usize, 20, 30] {
        assert_eq!(next_data(&mut client).await.len(), size);
    }
    proxy.wait_for_messages(6).await;

    let stats = proxy.server.registry().stats().await;
    assert_eq!(stats.connections.len(), 1);
    let record = &stats.connections[0];
    assert_eq!(record.inbound_message_count, 3);
    assert_eq!(record.inbound_byte_count, 60);
    assert_eq!(record.outbound_message_count, 3);
    assert_eq!(record.outbound_byte_count, 60);
    assert_eq!(stats.metrics.total_messages, 6);
    assert_eq!(stats.metrics.total_bytes, 120);
    assert!(record.id.to_string().starts_with("conn_"));
    assert_eq!(record.target_url, target.url());

    proxy.shutdown().await;
}

#[tokio::test]
async fn text_frames_are_measured_in_utf8_bytes() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut client = proxy.connect().await;
    client.send(Message::text("héllo")).await.unwrap();
    next_data(&mut client).await;
    proxy.wait_for_messages(2).await;

    let stats = proxy.server.registry().stats().await;
    assert_eq!(stats.connections[0].inbound_byte_count, 6);

    proxy.shutdown().await;
}

#[tokio::test]
async fn records_user_agent_and_remote_address() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut request = proxy.ws_url("/chat").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("user-agent", HeaderValue::from_static("relay-test/1.0"));
    let (mut client, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    client.send(Message::text("ping")).await.unwrap();
    next_data(&mut client).await;

    let stats = proxy.server.registry().stats().await;
    let record = &stats.connections[0];
    assert_eq!(record.user_agent.as_deref(), Some("relay-test/1.0"));
    assert!(record.remote_address.starts_with("127.0.0.1:"));

    proxy.shutdown().await;
}

#[tokio::test]
async fn client_close_unregisters_connection() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut client = proxy.connect().await;
    client.send(Message::text("hi")).await.unwrap();
    next_data(&mut client).await;
    assert_eq!(proxy.active_connections().await, 1);

    client.close(None).await.unwrap();
    proxy.wait_for_active(0).await;

    let metrics = proxy.server.registry().snapshot().await;
    assert_eq!(metrics.total_connections, 1);
    assert_eq!(metrics.total_errors, 0);

    proxy.shutdown().await;
}

#[tokio::test]
async fn frames_sent_before_target_is_ready_arrive_in_order() {
    let target = WsEchoTarget::spawn().await.unwrap();
    let proxy = ProxyHandle::spawn(test_config(&target.url())).await;

    let mut client = proxy.connect().await;
    for i in 0..20 {
        client.send(Message::text(format!("m{i}"))).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(next_data(&mut client).await, Message::text(format!("m{i}")));
    }

    proxy.shutdown().await;
}
