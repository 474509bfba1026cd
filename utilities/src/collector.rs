// SPDX-License-Identifier: Apache-2.0

//! An in-process OTLP/gRPC collector for tests.
//!
//! The collector records every trace and metrics export it receives along with the
//! request metadata, and can be stopped and started again on the same address to
//! simulate a collector that goes away and comes back.

use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::{
    MetricsService, MetricsServiceServer,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::metrics::v1::Metric;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, Span};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::warn;

#[derive(Default)]
struct Recorded {
    trace_requests: Vec<ExportTraceServiceRequest>,
    metrics_requests: Vec<ExportMetricsServiceRequest>,
    metadata: Vec<MetadataMap>,
}

#[derive(Clone, Default)]
struct MockOTLPService {
    recorded: Arc<Mutex<Recorded>>,
    response_delay: Option<Duration>,
}

impl MockOTLPService {
    async fn delay(&self) {
        if let Some(d) = self.response_delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[tonic::async_trait]
impl TraceService for MockOTLPService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        self.delay().await;
        let (metadata, _, req) = request.into_parts();
        let mut guard = self.recorded.lock().unwrap();
        guard.metadata.push(metadata);
        guard.trace_requests.push(req);

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

#[tonic::async_trait]
impl MetricsService for MockOTLPService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        self.delay().await;
        let (metadata, _, req) = request.into_parts();
        let mut guard = self.recorded.lock().unwrap();
        guard.metadata.push(metadata);
        guard.metrics_requests.push(req);

        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}

/// A running mock collector. Dropping it without calling [`MockCollector::stop`] aborts
/// the server task.
pub struct MockCollector {
    address: SocketAddr,
    service: MockOTLPService,
    shut_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockCollector {
    /// Starts a collector on an ephemeral localhost port.
    pub async fn start() -> Self {
        Self::start_at("127.0.0.1:0".parse().unwrap()).await
    }

    /// Starts a collector on the given address, typically one freed by a stopped collector.
    pub async fn start_at(address: SocketAddr) -> Self {
        Self::start_with_delay(address, None).await
    }

    /// Starts a collector whose handlers sleep for `delay` before responding.
    pub async fn start_with_delay(address: SocketAddr, delay: Option<Duration>) -> Self {
        let listener = bind_with_retry(address).await;
        let address = listener.local_addr().unwrap();
        let service = MockOTLPService {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            response_delay: delay,
        };

        let (shut_tx, shut_rx) = oneshot::channel::<()>();
        let svc = service.clone();
        let handle = tokio::spawn(async move {
            let incoming = TcpListenerStream::new(listener);
            let res = Server::builder()
                .add_service(
                    TraceServiceServer::new(svc.clone())
                        .accept_compressed(CompressionEncoding::Gzip)
                        .accept_compressed(CompressionEncoding::Zstd),
                )
                .add_service(
                    MetricsServiceServer::new(svc)
                        .accept_compressed(CompressionEncoding::Gzip)
                        .accept_compressed(CompressionEncoding::Zstd),
                )
                .serve_with_incoming_shutdown(incoming, async move {
                    if shut_rx.await.is_err() {
                        warn!("sender dropped shutdown channel")
                    }
                })
                .await;
            if let Err(e) = res {
                warn!(error = ?e, "mock collector exited with error");
            }
        });

        Self {
            address,
            service,
            shut_tx: Some(shut_tx),
            handle: Some(handle),
        }
    }

    /// The `host:port` the collector listens on.
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.address
    }

    /// Stops serving and releases the listening port. Recorded data stays readable.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shut_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    pub fn trace_calls(&self) -> usize {
        self.service.recorded.lock().unwrap().trace_requests.len()
    }

    pub fn metric_calls(&self) -> usize {
        self.service.recorded.lock().unwrap().metrics_requests.len()
    }

    pub fn resource_spans(&self) -> Vec<ResourceSpans> {
        let guard = self.service.recorded.lock().unwrap();
        guard
            .trace_requests
            .iter()
            .flat_map(|r| r.resource_spans.iter().cloned())
            .collect()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.resource_spans()
            .into_iter()
            .flat_map(|rs| rs.scope_spans.into_iter())
            .flat_map(|ss| ss.spans.into_iter())
            .collect()
    }

    pub fn metrics(&self) -> Vec<Metric> {
        let guard = self.service.recorded.lock().unwrap();
        guard
            .metrics_requests
            .iter()
            .flat_map(|r| r.resource_metrics.iter())
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter().cloned())
            .collect()
    }

    /// Metadata of the most recent request of either signal.
    pub fn last_metadata(&self) -> Option<MetadataMap> {
        self.service.recorded.lock().unwrap().metadata.last().cloned()
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// A port released by a stopped collector can take a moment to become bindable again.
async fn bind_with_retry(address: SocketAddr) -> TcpListener {
    let mut attempts = 0;
    loop {
        match TcpListener::bind(address).await {
            Ok(l) => return l,
            Err(e) if attempts < 50 => {
                attempts += 1;
                warn!(error = ?e, %address, "unable to bind mock collector, retrying");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("unable to bind mock collector to {}: {}", address, e),
        }
    }
}
