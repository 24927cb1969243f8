//! End-to-end container scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lymph_config::LymphConfig;
use lymph_container::{Container, Interface, MethodHandler};
use lymph_transport::RequestOutcome;
use pretty_assertions::assert_eq;

fn free_port_config() -> LymphConfig {
    let mut config = LymphConfig::default();
    config.infra.node.ip = "127.0.0.1".to_string();
    config.infra.node.port = 0;
    config.bootstrap.retry.timeout_secs = 1.0;
    config.bootstrap.retry.delay_secs = 0.02;
    config
}

struct EchoInterface {
    methods: HashMap<String, MethodHandler>,
}

impl EchoInterface {
    fn new() -> Self {
        let mut methods: HashMap<String, MethodHandler> = HashMap::new();
        methods.insert(
            "upper".to_string(),
            Arc::new(|body: Bytes, mut reply: lymph_transport::ReplyChannel| {
                let upper = String::from_utf8_lossy(&body).to_uppercase();
                reply.reply(Bytes::from(upper));
            }),
        );
        methods.insert(
            "sleep".to_string(),
            Arc::new(|_body: Bytes, mut reply: lymph_transport::ReplyChannel| {
                std::thread::sleep(Duration::from_secs(5));
                reply.reply(Bytes::new());
            }),
        );
        Self { methods }
    }
}

impl Interface for EchoInterface {
    fn service_name(&self) -> &str {
        "echo"
    }

    fn methods(&self) -> &HashMap<String, MethodHandler> {
        &self.methods
    }
}

#[tokio::test]
async fn echo_request_reaches_installed_interface() {
    let server = Container::build(&free_port_config()).await.unwrap();
    server.install(Arc::new(EchoInterface::new()));
    server.start(&free_port_config(), false).await.unwrap();

    let client = Container::build(&free_port_config()).await.unwrap();
    client.start(&free_port_config(), false).await.unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        client.request(server.endpoint(), "echo.upper", Bytes::from_static(b"foo")),
    )
    .await
    .expect("request completed within 1s")
    .expect("request succeeded");

    match outcome {
        RequestOutcome::Reply(message) => assert_eq!(message.body, Bytes::from_static(b"FOO")),
        other => panic!("expected reply, got {other:?}"),
    }

    client.stop().await;
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_handler_surfaces_as_timeout() {
    let server = Container::build(&free_port_config()).await.unwrap();
    server.install(Arc::new(EchoInterface::new()));
    server.start(&free_port_config(), false).await.unwrap();

    let mut client_config = free_port_config();
    client_config.bootstrap.retry.timeout_secs = 0.2;
    let client = Container::build(&client_config).await.unwrap();
    client.start(&client_config, false).await.unwrap();

    let result = client.request(server.endpoint(), "echo.sleep", Bytes::new()).await;
    assert!(result.is_err());

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn container_stop_closes_out_connections() {
    let server = Container::build(&free_port_config()).await.unwrap();
    server.start(&free_port_config(), false).await.unwrap();

    let client = Container::build(&free_port_config()).await.unwrap();
    client.start(&free_port_config(), false).await.unwrap();

    let _ = client.lookup(server.endpoint()).await.unwrap();
    assert!(client.is_running());

    client.stop().await;
    assert!(!client.is_running());

    server.stop().await;
}
