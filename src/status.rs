//! HTTP status endpoint.
//!
//! Answers `GET /ping` with `{"message":"pong"}` so supervisors can tell the
//! redirection is in place. The orchestrator starts it only after the rules
//! are installed.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Body of a successful ping.
pub const PONG_BODY: &str = r#"{"message":"pong"}"#;

const NOT_FOUND_BODY: &str = "404 page not found";

/// Errors from the status endpoint.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The listen address could not be bound.
    #[error("Failed to bind status endpoint on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Accepting connections failed.
    #[error("Status endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Response for `method` and `path`: status, content type and body.
pub fn route(method: &Method, path: &str) -> (StatusCode, &'static str, &'static str) {
    match (method, path) {
        (&Method::GET, "/ping") => (StatusCode::OK, "application/json; charset=utf-8", PONG_BODY),
        _ => (StatusCode::NOT_FOUND, "text/plain", NOT_FOUND_BODY),
    }
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = route(req.method(), req.uri().path());
    debug!("{} {} -> {}", req.method(), req.uri().path(), status.as_u16());

    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    Ok(response)
}

/// A bound status endpoint.
pub struct StatusServer {
    listener: TcpListener,
    shutdown_rx: watch::Receiver<bool>,
}

impl StatusServer {
    /// Bind `addr`. Port 0 picks a free port.
    pub async fn bind(
        addr: SocketAddr,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, StatusError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StatusError::Bind { addr, source })?;
        Ok(Self {
            listener,
            shutdown_rx,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, StatusError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until shutdown is signalled.
    pub async fn run(self) -> Result<(), StatusError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        info!("Status endpoint listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Status connection from {}", peer);
                            spawn_connection(stream);
                        }
                        Err(e) => {
                            warn!("Failed to accept status connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Status endpoint shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

fn spawn_connection(stream: TcpStream) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        if let Err(e) = http1::Builder::new()
            .serve_connection(io, service_fn(handle))
            .await
        {
            debug!("Status connection ended: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_route_ping() {
        let (status, content_type, body) = route(&Method::GET, "/ping");
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("application/json"));
        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["message"], "pong");
    }

    #[test]
    fn test_route_unknown_is_not_found() {
        assert_eq!(route(&Method::GET, "/").0, StatusCode::NOT_FOUND);
        assert_eq!(route(&Method::GET, "/status").0, StatusCode::NOT_FOUND);
        assert_eq!(route(&Method::POST, "/ping").0, StatusCode::NOT_FOUND);
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_ping_until_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = StatusServer::bind("127.0.0.1:0".parse().unwrap(), shutdown_rx)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        let response = get(addr, "/ping").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(PONG_BODY));

        let response = get(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let (_tx, rx) = watch::channel(false);
        let first = StatusServer::bind("127.0.0.1:0".parse().unwrap(), rx.clone())
            .await
            .unwrap();
        let taken = first.local_addr().unwrap();

        let err = StatusServer::bind(taken, rx).await.err().unwrap();
        assert!(matches!(err, StatusError::Bind { .. }));
    }
}
