// SPDX-License-Identifier: Apache-2.0

use crate::export::metric::{ExportKindSelector, Record};
use crate::export::trace::SpanSnapshot;
use crate::exporters::otlp::context::ExportContext;
use crate::exporters::otlp::driver::Driver;
use crate::exporters::otlp::errors::ExporterError;
use tracing::warn;

/// The drivers a [`SplitDriver`] routes each signal to.
pub struct SplitConfig {
    pub for_traces: Box<dyn Driver>,
    pub for_metrics: Box<dyn Driver>,
}

/// Sends traces and metrics through separate drivers, typically to different collectors.
pub struct SplitDriver {
    traces: Box<dyn Driver>,
    metrics: Box<dyn Driver>,
}

impl SplitDriver {
    pub fn new(config: SplitConfig) -> Self {
        Self {
            traces: config.for_traces,
            metrics: config.for_metrics,
        }
    }
}

#[tonic::async_trait]
impl Driver for SplitDriver {
    async fn start(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        let (traces, metrics) = tokio::join!(self.traces.start(ctx), self.metrics.start(ctx));
        first_error("start", traces, metrics)
    }

    async fn stop(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        let (traces, metrics) = tokio::join!(self.traces.stop(ctx), self.metrics.stop(ctx));
        first_error("stop", traces, metrics)
    }

    async fn export_traces(
        &self,
        ctx: &ExportContext,
        spans: &[SpanSnapshot],
    ) -> Result<(), ExporterError> {
        self.traces.export_traces(ctx, spans).await
    }

    async fn export_metrics(
        &self,
        ctx: &ExportContext,
        records: &[Record],
        selector: &ExportKindSelector,
    ) -> Result<(), ExporterError> {
        self.metrics.export_metrics(ctx, records, selector).await
    }
}

fn first_error(
    op: &str,
    traces: Result<(), ExporterError>,
    metrics: Result<(), ExporterError>,
) -> Result<(), ExporterError> {
    match (traces, metrics) {
        (Err(t), Err(m)) => {
            warn!(error = %m, signal = "metrics", "Metrics driver {} also failed", op);
            Err(t)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}
