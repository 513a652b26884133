//! Prometheus metrics and the `/metrics` endpoint.
//!
//! ## Metrics Exported
//! - `scan_tx_total` - Transactions handed to the distribution stage (counter)
//! - `scan_callback_total` - Dispatches issued (counter)
//! - `scan_callback_error_total` - Dispatches that failed (counter)
//!
//! All three are labelled `network`.
use anyhow::Result;
use block_scan::metrics::Metrics;
use http_body_util::Full;
use hyper::{
    body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    scan_tx_total: CounterVec,
    scan_callback_total: CounterVec,
    scan_callback_error_total: CounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<CounterVec> {
            let vec = CounterVec::new(Opts::new(name, help), &["network"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        Ok(Self {
            scan_tx_total: counter("scan_tx_total", "Transactions handed to distribution")?,
            scan_callback_total: counter("scan_callback_total", "Dispatches issued")?,
            scan_callback_error_total: counter("scan_callback_error_total", "Dispatches that failed")?,
            registry,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Metrics for PrometheusMetrics {
    fn scan_tx_total(&self, network: &str) {
        self.scan_tx_total.with_label_values(&[network]).inc();
    }

    fn scan_callback_total(&self, name: &str) {
        self.scan_callback_total.with_label_values(&[name]).inc();
    }

    fn scan_callback_error_total(&self, name: &str) {
        self.scan_callback_error_total.with_label_values(&[name]).inc();
    }
}

/// Parses a listen address. A bare `:port` binds every interface.
pub fn listen_addr(port: &str) -> Result<SocketAddr> {
    let addr = if port.starts_with(':') {
        format!("0.0.0.0{port}")
    } else {
        port.to_string()
    };
    Ok(addr.parse()?)
}

/// Serves `GET /metrics` on `addr` until `cancel` fires.
pub async fn serve(metrics: Arc<PrometheusMetrics>, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("block-scan metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, metrics.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving metrics connection: {:?}", err);
            }
        });
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<PrometheusMetrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = if req.method() != Method::GET {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if req.uri().path() != "/metrics" {
        (StatusCode::NOT_FOUND, "Not found. Try /metrics".to_string())
    } else {
        match metrics.render() {
            Ok(text) => (StatusCode::OK, text),
            Err(e) => {
                tracing::error!("Failed to encode metrics: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics".to_string())
            }
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    Ok(response)
}
