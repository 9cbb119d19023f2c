//! HTTP send abstraction and the production hyper-based client.
//!
//! The engine only depends on the [`HttpSend`] contract: send a request with
//! a bounded timeout, get back a status plus body size or an [`ErrorKind`].
//! Tests substitute in-process fakes; the binary wires in [`HyperClient`].

use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use crate::error::{classify_transport_error, ErrorKind};

/// What the engine needs to know about a completed exchange.
#[derive(Debug, Clone, Copy)]
pub struct SendResult {
    pub status: u16,
    pub body_bytes: u64,
}

/// External collaborator contract: send one request within `timeout`.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, req: Request<String>, timeout: Duration) -> Result<SendResult, ErrorKind>;
}

/// Production client on hyper-util's pooled legacy client with rustls.
#[derive(Clone)]
pub struct HyperClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HyperClient {
    pub fn new() -> std::io::Result<Self> {
        Self::with_pool_size(500)
    }

    /// `pool_size` is the maximum number of idle connections kept per host.
    pub fn with_pool_size(pool_size: usize) -> std::io::Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(pool_size)
            .build(https);

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpSend for HyperClient {
    async fn send(&self, req: Request<String>, timeout: Duration) -> Result<SendResult, ErrorKind> {
        let req = req.map(|body| Full::new(Bytes::from(body)));

        let exchange = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| classify_transport_error(&e))?;
            let status = response.status().as_u16();

            // Drain the body to completion so the connection can be reused;
            // the engine only needs its size, never its content.
            let mut body = response.into_body();
            let mut body_bytes = 0u64;
            while let Some(frame) = body.frame().await {
                let frame = frame.map_err(|e| classify_transport_error(&e))?;
                if let Some(data) = frame.data_ref() {
                    body_bytes += data.len() as u64;
                }
            }

            Ok(SendResult { status, body_bytes })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener};

    #[test]
    fn test_client_construction() {
        assert!(HyperClient::with_pool_size(50).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connection_refused_classified() {
        // Bind then drop to find a port nothing is listening on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = HyperClient::new().unwrap();
        let req = Request::builder()
            .method("GET")
            .uri(format!("http://127.0.0.1:{}/", port))
            .body(String::new())
            .unwrap();

        let err = client
            .send(req, Duration::from_secs(5))
            .await
            .expect_err("expected refused connection");
        assert_eq!(err, ErrorKind::ConnectionRefused);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_classified() {
        // A listener that accepts but never responds.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let _conn = listener.accept();
            std::thread::sleep(Duration::from_secs(5));
        });

        let client = HyperClient::new().unwrap();
        let req = Request::builder()
            .method("GET")
            .uri(format!("http://127.0.0.1:{}/", port))
            .body(String::new())
            .unwrap();

        let err = client
            .send(req, Duration::from_millis(200))
            .await
            .expect_err("expected timeout");
        assert_eq!(err, ErrorKind::Timeout);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_plain_http_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((mut conn, _)) = listener.accept() {
                // Read the request through the header terminator before
                // responding; unread inbound data would turn the close into
                // an RST and the client would never see the response.
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while let Ok(n) = conn.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = conn.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                );
                let _ = conn.shutdown(Shutdown::Write);
                std::thread::sleep(Duration::from_millis(100));
            }
        });

        let client = HyperClient::new().unwrap();
        let req = Request::builder()
            .method("GET")
            .uri(format!("http://127.0.0.1:{}/", port))
            .body(String::new())
            .unwrap();

        let result = client.send(req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body_bytes, 2);
    }
}
