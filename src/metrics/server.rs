//! Prometheus metrics HTTP server.
//!
//! Serves the text exposition on a configurable path, a liveness endpoint
//! and a plain-text backend listing.

use crate::dispatcher::Dispatcher;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    /// Address to bind.
    address: SocketAddr,
    /// Path for metrics endpoint.
    path: String,
    collector: MetricsCollector,
    /// Source for the `/backends` listing.
    dispatcher: Arc<Dispatcher>,
}

struct ServerState {
    path: String,
    collector: MetricsCollector,
    dispatcher: Arc<Dispatcher>,
}

impl MetricsServer {
    /// Create a new metrics server.
    pub fn new(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            address,
            path,
            collector,
            dispatcher,
        }
    }

    /// Bind and serve until shutdown.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.address).await?;
        info!(address = %self.address, path = %self.path, "metrics server started");
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        let state = Arc::new(ServerState {
            path: self.path,
            collector: self.collector,
            dispatcher: self.dispatcher,
        });

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move { handle_request(req, &state) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: &ServerState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    debug!(path = %path, method = %req.method(), "metrics request");

    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n"));
    }

    let response = if path == state.path {
        let mut buffer = String::new();
        match encode(&mut buffer, state.collector.registry()) {
            Ok(()) => {
                let mut response = text(StatusCode::OK, buffer);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
                response
            }
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics\n")
            }
        }
    } else if path == "/health" || path == "/healthz" {
        text(StatusCode::OK, "OK\n")
    } else if path == "/backends" {
        text(StatusCode::OK, backend_listing(&state.dispatcher))
    } else if path == "/" {
        text(
            StatusCode::OK,
            format!(
                "poolbalancer metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /backends - Backend states\n  /health - Health check\n",
                state.path
            ),
        )
    } else {
        text(StatusCode::NOT_FOUND, "Not found\n")
    };
    Ok(response)
}

/// One line per backend: id, state, weight, in-flight and health counters.
fn backend_listing(dispatcher: &Dispatcher) -> String {
    let mut out = String::new();
    for b in dispatcher.backends(None) {
        let _ = writeln!(
            out,
            "{} state={} weight={} active={} failures={} successes={}",
            b.id,
            b.state,
            b.weight,
            b.active_connections,
            b.consecutive_failures,
            b.consecutive_successes
        );
    }
    out
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSpec;
    use crate::backend::algorithms::SelectionRequest;
    use crate::config::BalancerConfig;
    use crate::health::HealthConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

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
    async fn test_serves_metrics_and_backends() {
        let collector = MetricsCollector::new();
        let dispatcher = Arc::new(Dispatcher::new(
            &BalancerConfig::default(),
            HealthConfig::default(),
            Arc::new(collector.clone()),
        ));
        dispatcher.register(BackendSpec::new("10.0.0.1:80")).unwrap();
        dispatcher.route(&SelectionRequest::new()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = MetricsServer::new(addr, "/metrics".to_string(), collector, dispatcher);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.serve(listener, rx));

        let metrics = get(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200"));
        assert!(metrics.contains("poolbalancer_requests_routed_total"));

        let backends = get(addr, "/backends").await;
        assert!(backends.contains("10.0.0.1:80 state=healthy weight=1 active=1"));

        assert!(get(addr, "/health").await.starts_with("HTTP/1.1 200"));
        assert!(get(addr, "/nope").await.starts_with("HTTP/1.1 404"));

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
