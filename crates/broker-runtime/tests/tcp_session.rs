//! # TCP Session Tests
//!
//! Start a full runtime on a loopback port and talk to it as a client would:
//! newline separated JSON frames over a plain TCP socket.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use broker_runtime::{BrokerRuntime, FileConfigSource, ListenAddr};
use serde_json::{json, Value};
use shv_types::{codes, RpcMessage, RpcRequest, RpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONFIG: &str = r#"
name = "loopback"
listen = ["tcp://127.0.0.1:0"]

[users.admin]
password = "secret"
roles = ["admin"]

[roles.admin]
mount_points = ["**"]

[roles.admin.access]
su = "**:*"
"#;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, message: &RpcMessage) {
        let mut frame = serde_json::to_vec(message).unwrap();
        frame.push(b'\n');
        self.writer.write_all(&frame).await.unwrap();
    }

    async fn recv(&mut self) -> Option<RpcMessage> {
        let line = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("Should receive within timeout")
            .expect("read")?;
        Some(serde_json::from_str(&line).expect("valid frame"))
    }

    async fn call(&mut self, rid: i64, path: &str, method: &str, param: Option<Value>) -> RpcResponse {
        self.send(&RpcMessage::Request(RpcRequest {
            param,
            ..RpcRequest::new(rid, path, method)
        }))
        .await;
        match self.recv().await {
            Some(RpcMessage::Response(response)) => response,
            other => panic!("Expected response, got {:?}", other),
        }
    }
}

async fn start_runtime() -> (BrokerRuntime, String, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", CONFIG).unwrap();
    let source = Arc::new(FileConfigSource::new(Some(file.path().to_path_buf())));
    let runtime = BrokerRuntime::new(source).expect("valid config");
    let bound = runtime.start().await.expect("bind");
    let addr = match &bound[0] {
        ListenAddr::Tcp(addr) => addr.clone(),
        other => panic!("Expected tcp listener, got {}", other),
    };
    (runtime, addr, file)
}

#[tokio::test]
async fn test_login_and_call_app() {
    // Arrange
    let (runtime, addr, _file) = start_runtime().await;
    let mut client = Client::connect(&addr).await;

    // Act: hello, login, then a local call
    let hello = client.call(1, "", "hello", None).await;
    assert!(hello.result.unwrap()["nonce"].is_string());

    let login = client
        .call(2, "", "login", Some(json!({"login": {"user": "admin", "password": "secret", "type": "PLAIN"}})))
        .await;
    assert_eq!(login.result, Some(json!({"clientId": 1})));

    let name = client.call(3, ".app", "name", None).await;

    // Assert
    assert_eq!(name.result, Some(json!("shvbroker")));
    let broker_name = client.call(4, ".broker", "name", None).await;
    assert_eq!(broker_name.result, Some(json!("loopback")));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_wrong_password_closes_connection() {
    let (runtime, addr, _file) = start_runtime().await;
    let mut client = Client::connect(&addr).await;

    client.call(1, "", "hello", None).await;
    let login = client
        .call(2, "", "login", Some(json!({"login": {"user": "admin", "password": "nope", "type": "PLAIN"}})))
        .await;
    assert!(login.is_error());

    // the broker closes after the error reply
    assert!(client.recv().await.is_none());
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_call_through_to_mounted_device() {
    let (runtime, addr, _file) = start_runtime().await;

    let mut device = Client::connect(&addr).await;
    device.call(1, "", "hello", None).await;
    let login = device
        .call(
            2,
            "",
            "login",
            Some(json!({
                "login": {"user": "admin", "password": "secret", "type": "PLAIN"},
                "options": {"device": {"mountPoint": "test/device"}}
            })),
        )
        .await;
    assert!(!login.is_error());

    let mut caller = Client::connect(&addr).await;
    caller.call(1, "", "hello", None).await;
    caller
        .call(2, "", "login", Some(json!({"login": {"user": "admin", "password": "secret", "type": "PLAIN"}})))
        .await;

    caller
        .send(&RpcMessage::Request(RpcRequest::new(10, "test/device/temp", "get")))
        .await;
    let Some(RpcMessage::Request(forwarded)) = device.recv().await else {
        panic!("device should receive the forwarded request");
    };
    assert_eq!(forwarded.path, "temp");
    assert_eq!(forwarded.user_id.as_deref(), Some("admin:loopback"));

    device
        .send(&RpcMessage::Response(RpcResponse::success(forwarded.request_id, json!(21.5))))
        .await;
    let Some(RpcMessage::Response(reply)) = caller.recv().await else {
        panic!("caller should receive the reply");
    };
    assert_eq!(reply.request_id, 10);
    assert_eq!(reply.result, Some(json!(21.5)));

    // device goes away while a call is outstanding
    caller
        .send(&RpcMessage::Request(RpcRequest::new(11, "test/device/temp", "get")))
        .await;
    device.recv().await;
    drop(device);
    let Some(RpcMessage::Response(failure)) = caller.recv().await else {
        panic!("caller should receive a failure");
    };
    assert_eq!(failure.request_id, 11);
    assert_eq!(failure.error.unwrap().code, codes::METHOD_CALL_EXCEPTION);

    runtime.shutdown().await;
}
