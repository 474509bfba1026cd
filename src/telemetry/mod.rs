// SPDX-License-Identifier: Apache-2.0

//! Self-observability counters for the exporter.

use crate::exporters::otlp::get_meter;
use opentelemetry::KeyValue;

pub trait Counter<T> {
    fn add(&self, value: T, attributes: &[KeyValue]);
}

#[derive(Clone)]
pub enum ExporterCounter<T> {
    OTELCounter(opentelemetry::metrics::Counter<T>),
    NoOpCounter,
}

impl<T> Counter<T> for ExporterCounter<T> {
    fn add(&self, value: T, attributes: &[KeyValue]) {
        match self {
            ExporterCounter::OTELCounter(c) => c.add(value, attributes),
            ExporterCounter::NoOpCounter => {}
        }
    }
}

/// Items sent and dropped by a driver, labelled by signal.
#[derive(Clone)]
pub struct DriverCounters {
    pub sent_spans: ExporterCounter<u64>,
    pub send_failed_spans: ExporterCounter<u64>,
    pub sent_metric_points: ExporterCounter<u64>,
    pub send_failed_metric_points: ExporterCounter<u64>,
}

impl DriverCounters {
    /// Counters registered on the global meter.
    pub fn global() -> Self {
        let meter = get_meter();
        Self {
            sent_spans: ExporterCounter::OTELCounter(
                meter
                    .u64_counter("otlp_exporter_sent_spans")
                    .with_description("Number of spans accepted by the collector")
                    .with_unit("spans")
                    .build(),
            ),
            send_failed_spans: ExporterCounter::OTELCounter(
                meter
                    .u64_counter("otlp_exporter_send_failed_spans")
                    .with_description("Number of spans that could not be sent")
                    .with_unit("spans")
                    .build(),
            ),
            sent_metric_points: ExporterCounter::OTELCounter(
                meter
                    .u64_counter("otlp_exporter_sent_metric_points")
                    .with_description("Number of metric points accepted by the collector")
                    .with_unit("metric_points")
                    .build(),
            ),
            send_failed_metric_points: ExporterCounter::OTELCounter(
                meter
                    .u64_counter("otlp_exporter_send_failed_metric_points")
                    .with_description("Number of metric points that could not be sent")
                    .with_unit("metric_points")
                    .build(),
            ),
        }
    }

    pub fn noop() -> Self {
        Self {
            sent_spans: ExporterCounter::NoOpCounter,
            send_failed_spans: ExporterCounter::NoOpCounter,
            sent_metric_points: ExporterCounter::NoOpCounter,
            send_failed_metric_points: ExporterCounter::NoOpCounter,
        }
    }
}
