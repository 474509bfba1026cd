// SPDX-License-Identifier: Apache-2.0

use crate::export::metric::{ExportKindSelector, Record};
use crate::export::trace::SpanSnapshot;
use crate::exporters::otlp::config::GrpcDriverConfig;
use crate::exporters::otlp::connection::ConnectionManager;
use crate::exporters::otlp::context::ExportContext;
use crate::exporters::otlp::errors::ExporterError;
use crate::exporters::otlp::service_config::{
    CallOptions, EXPORT_METHOD, METRICS_SERVICE, TRACE_SERVICE,
};
use crate::exporters::otlp::transform;
use crate::exporters::otlp::{CompressionEncoding, ConnectionState, LifecycleState};
use crate::telemetry::{Counter, DriverCounters};
use opentelemetry::KeyValue;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};
use tracing::debug;

/// Moves encoded telemetry to one or more collectors.
#[tonic::async_trait]
pub trait Driver: Send + Sync {
    async fn start(&self, ctx: &ExportContext) -> Result<(), ExporterError>;

    /// Releases the driver's connections. Calling it more than once is not an error.
    async fn stop(&self, ctx: &ExportContext) -> Result<(), ExporterError>;

    async fn export_traces(
        &self,
        ctx: &ExportContext,
        spans: &[SpanSnapshot],
    ) -> Result<(), ExporterError>;

    async fn export_metrics(
        &self,
        ctx: &ExportContext,
        records: &[Record],
        selector: &ExportKindSelector,
    ) -> Result<(), ExporterError>;
}

#[tonic::async_trait]
impl<D: Driver + ?Sized> Driver for Box<D> {
    async fn start(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        (**self).start(ctx).await
    }

    async fn stop(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        (**self).stop(ctx).await
    }

    async fn export_traces(
        &self,
        ctx: &ExportContext,
        spans: &[SpanSnapshot],
    ) -> Result<(), ExporterError> {
        (**self).export_traces(ctx, spans).await
    }

    async fn export_metrics(
        &self,
        ctx: &ExportContext,
        records: &[Record],
        selector: &ExportKindSelector,
    ) -> Result<(), ExporterError> {
        (**self).export_metrics(ctx, records, selector).await
    }
}

/// Sends both signals to a single collector over one gRPC connection.
pub struct GrpcDriver {
    connection: ConnectionManager,
    lifecycle: Mutex<LifecycleState>,
    compression: CompressionEncoding,
    headers: MetadataMap,
    trace_call: CallOptions,
    metrics_call: CallOptions,
    counters: DriverCounters,
}

impl GrpcDriver {
    pub fn new(config: GrpcDriverConfig) -> Result<Self, ExporterError> {
        let connection = ConnectionManager::new(&config)?;
        Ok(Self {
            connection,
            lifecycle: Mutex::new(LifecycleState::NotStarted),
            compression: config.compression,
            headers: config.headers.clone(),
            trace_call: config
                .service_config
                .call_options(TRACE_SERVICE, EXPORT_METHOD),
            metrics_call: config
                .service_config
                .call_options(METRICS_SERVICE, EXPORT_METHOD),
            counters: DriverCounters::global(),
        })
    }

    pub fn with_counters(mut self, counters: DriverCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn address(&self) -> &str {
        self.connection.address()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn request<T>(&self, message: T, call: &CallOptions) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.headers.clone();
        if let Some(timeout) = call.timeout {
            request.set_timeout(timeout);
        }
        request
    }
}

#[tonic::async_trait]
impl Driver for GrpcDriver {
    async fn start(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if *lifecycle != LifecycleState::NotStarted {
                return Err(ExporterError::AlreadyStarted);
            }
            *lifecycle = LifecycleState::Started;
        }
        self.connection.connect(ctx).await
    }

    async fn stop(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if *lifecycle == LifecycleState::Stopped {
                return Ok(());
            }
            *lifecycle = LifecycleState::Stopped;
        }
        self.connection.close(ctx).await
    }

    async fn export_traces(
        &self,
        ctx: &ExportContext,
        spans: &[SpanSnapshot],
    ) -> Result<(), ExporterError> {
        if spans.is_empty() {
            return Ok(());
        }
        let resource_spans = transform::resource_spans(spans);
        let count = spans.len() as u64;

        let request = self.request(ExportTraceServiceRequest { resource_spans }, &self.trace_call);
        let compression = self.compression.as_tonic();
        let timeout = self.trace_call.timeout;
        let res = self
            .connection
            .with_connection(ctx, self.trace_call.wait_for_ready, |channel| {
                let mut client = TraceServiceClient::new(channel);
                if let Some(encoding) = compression {
                    client = client.send_compressed(encoding);
                }
                unary(timeout, async move { client.export(request).await })
            })
            .await;

        match &res {
            Ok(_) => {
                debug!(address = %self.address(), signal = "traces", spans = count, "Exported spans");
                self.counters.sent_spans.add(count, &[]);
            }
            Err(e) => self
                .counters
                .send_failed_spans
                .add(count, &[KeyValue::new("error", e.kind())]),
        }
        res.map(|_| ())
    }

    async fn export_metrics(
        &self,
        ctx: &ExportContext,
        records: &[Record],
        selector: &ExportKindSelector,
    ) -> Result<(), ExporterError> {
        if records.is_empty() {
            return Ok(());
        }
        let resource_metrics = transform::resource_metrics(records, selector)?;
        let points = count_points(&resource_metrics);

        let request = self.request(
            ExportMetricsServiceRequest { resource_metrics },
            &self.metrics_call,
        );
        let compression = self.compression.as_tonic();
        let timeout = self.metrics_call.timeout;
        let res = self
            .connection
            .with_connection(ctx, self.metrics_call.wait_for_ready, |channel| {
                let mut client = MetricsServiceClient::new(channel);
                if let Some(encoding) = compression {
                    client = client.send_compressed(encoding);
                }
                unary(timeout, async move { client.export(request).await })
            })
            .await;

        match &res {
            Ok(_) => {
                debug!(address = %self.address(), signal = "metrics", points, "Exported metric points");
                self.counters.sent_metric_points.add(points, &[]);
            }
            Err(e) => self
                .counters
                .send_failed_metric_points
                .add(points, &[KeyValue::new("error", e.kind())]),
        }
        res.map(|_| ())
    }
}

// Enforces the per-call timeout on the client side as well as through grpc-timeout.
async fn unary<T, F>(timeout: Option<Duration>, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match timeout {
        Some(t) => tokio::time::timeout(t, call)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded("export call timed out"))),
        None => call.await,
    }
}

fn count_points(resource_metrics: &[ResourceMetrics]) -> u64 {
    resource_metrics
        .iter()
        .flat_map(|rm| rm.scope_metrics.iter())
        .flat_map(|sm| sm.metrics.iter())
        .map(|m| match &m.data {
            Some(Data::Sum(s)) => s.data_points.len(),
            Some(Data::Gauge(g)) => g.data_points.len(),
            Some(Data::Histogram(h)) => h.data_points.len(),
            Some(Data::ExponentialHistogram(h)) => h.data_points.len(),
            Some(Data::Summary(s)) => s.data_points.len(),
            None => 0,
        } as u64)
        .sum()
}


#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records calls and optionally fails them.
    #[derive(Clone, Default)]
    pub(crate) struct FakeDriver {
        pub(crate) calls: Arc<Calls>,
        pub(crate) fail_start: bool,
        pub(crate) fail_stop: bool,
        pub(crate) fail_export: bool,
    }

    #[derive(Default)]
    pub(crate) struct Calls {
        pub(crate) start: AtomicUsize,
        pub(crate) stop: AtomicUsize,
        pub(crate) traces: AtomicUsize,
        pub(crate) spans: AtomicUsize,
        pub(crate) metrics: AtomicUsize,
        pub(crate) records: AtomicUsize,
    }

    impl Calls {
        pub(crate) fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    fn fail(what: &str) -> ExporterError {
        ExporterError::Grpc(Status::internal(format!("{} failed", what)))
    }

    #[tonic::async_trait]
    impl Driver for FakeDriver {
        async fn start(&self, _ctx: &ExportContext) -> Result<(), ExporterError> {
            self.calls.start.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(fail("start"));
            }
            Ok(())
        }

        async fn stop(&self, _ctx: &ExportContext) -> Result<(), ExporterError> {
            self.calls.stop.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(fail("stop"));
            }
            Ok(())
        }

        async fn export_traces(
            &self,
            _ctx: &ExportContext,
            spans: &[SpanSnapshot],
        ) -> Result<(), ExporterError> {
            self.calls.traces.fetch_add(1, Ordering::SeqCst);
            self.calls.spans.fetch_add(spans.len(), Ordering::SeqCst);
            if self.fail_export {
                return Err(fail("export"));
            }
            Ok(())
        }

        async fn export_metrics(
            &self,
            _ctx: &ExportContext,
            records: &[Record],
            _selector: &ExportKindSelector,
        ) -> Result<(), ExporterError> {
            self.calls.metrics.fetch_add(1, Ordering::SeqCst);
            self.calls.records.fetch_add(records.len(), Ordering::SeqCst);
            if self.fail_export {
                return Err(fail("export"));
            }
            Ok(())
        }
    }
}
