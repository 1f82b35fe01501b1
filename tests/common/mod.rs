//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdListener, TcpStream as StdStream};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use lampd::auth::JwtValidator;
use lampd::config::{RouteConfig, ServerConfig};
use lampd::handlers::{builtin_registry, default_routes};
use lampd::http::ConnectionServer;
use lampd::net::{Listener, ListenerKind};
use lampd::routing::{HandlerRegistry, RouteSnapshot, RouteTable};

pub const SECRET: &str = "integration-secret";

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    StdListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

/// A running in-process server and the handles a test may poke at.
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: ConnectionServer,
    pub snapshot: Arc<RouteSnapshot>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Serve the built-in handlers on the default routes.
pub async fn start_default() -> TestServer {
    start_with(builtin_registry(), default_routes(), ServerConfig::default()).await
}

/// Serve `registry` on `routes` from an ephemeral loopback port.
pub async fn start_with(
    registry: HandlerRegistry,
    routes: Vec<RouteConfig>,
    mut config: ServerConfig,
) -> TestServer {
    config.auth.jwt_secret = SECRET.to_string();
    let table = RouteTable::from_descriptors(&routes, &registry).unwrap();
    let snapshot = Arc::new(RouteSnapshot::new(table));
    let server = ConnectionServer::new(
        config,
        Arc::clone(&snapshot),
        Arc::new(registry),
        Arc::new(JwtValidator::new(SECRET)),
    );

    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 64, ListenerKind::Public).unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener, None).await;
    });

    TestServer { addr, server, snapshot }
}

/// HTTP client that never pools or proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn token(role: Option<&str>) -> String {
    JwtValidator::new(SECRET)
        .issue("mower-01", role.map(str::to_string), Duration::from_secs(300))
        .unwrap()
}

/// Write raw bytes and read until the server closes.
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    out
}

/// Blocking GET used against a spawned `lampd` binary.
pub fn blocking_get(port: u16, path: &str) -> std::io::Result<String> {
    let mut stream = StdStream::connect(("127.0.0.1", port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())?;
    let mut out = String::new();
    stream.read_to_string(&mut out)?;
    Ok(out)
}

/// JSON body of a raw response.
pub fn body_of(raw: &str) -> serde_json::Value {
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    if body.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(body).unwrap()
}
