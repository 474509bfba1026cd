// SPDX-License-Identifier: Apache-2.0

use crate::export::metric::{Aggregation, ExportKind, ExportKindSelector, Number, Record};
use crate::export::trace::InstrumentationLibrary;
use crate::exporters::otlp::errors::ExporterError;
use crate::exporters::otlp::transform::attribute::{key_values, resource, scope};
use crate::exporters::otlp::transform::to_nanos;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value;
use opentelemetry_proto::tonic::metrics::v1::{
    AggregationTemporality, Gauge, Histogram, HistogramDataPoint, Metric, NumberDataPoint,
    ResourceMetrics, ScopeMetrics, Sum,
};
use std::collections::HashMap;

/// Encodes records into OTLP metrics, grouped by resource and instrumentation library.
///
/// Records of the same instrument within a group are merged into one `Metric` with
/// several data points. Every record is checked; if any fail to encode, the combined
/// failures are returned and nothing is produced.
pub fn resource_metrics(
    records: &[Record],
    selector: &ExportKindSelector,
) -> Result<Vec<ResourceMetrics>, ExporterError> {
    let mut out: Vec<ResourceMetrics> = Vec::new();
    let mut by_resource: HashMap<String, usize> = HashMap::new();
    let mut by_scope: HashMap<(usize, InstrumentationLibrary), usize> = HashMap::new();
    let mut by_name: HashMap<(usize, usize, &str), usize> = HashMap::new();
    let mut errors: Vec<String> = Vec::new();

    for record in records {
        let metric = match metric(record, selector) {
            Ok(m) => m,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let ri = *by_resource
            .entry(record.resource.encoded())
            .or_insert_with(|| {
                out.push(ResourceMetrics {
                    resource: resource(Some(&*record.resource)),
                    ..Default::default()
                });
                out.len() - 1
            });

        let library = InstrumentationLibrary {
            name: record.descriptor.instrumentation_name.clone(),
            version: record.descriptor.instrumentation_version.clone(),
        };
        let rm = &mut out[ri];
        let si = *by_scope.entry((ri, library)).or_insert_with_key(|(_, lib)| {
            rm.scope_metrics.push(ScopeMetrics {
                scope: scope(lib),
                ..Default::default()
            });
            rm.scope_metrics.len() - 1
        });

        let sm = &mut rm.scope_metrics[si];
        match by_name.get(&(ri, si, record.descriptor.name.as_str())) {
            Some(&mi) => {
                if let Err(e) = merge(&mut sm.metrics[mi], metric) {
                    errors.push(e);
                }
            }
            None => {
                sm.metrics.push(metric);
                by_name.insert(
                    (ri, si, record.descriptor.name.as_str()),
                    sm.metrics.len() - 1,
                );
            }
        }
    }

    if !errors.is_empty() {
        return Err(ExporterError::Transform(errors.join("; ")));
    }
    Ok(out)
}

fn metric(record: &Record, selector: &ExportKindSelector) -> Result<Metric, String> {
    let desc = &record.descriptor;
    let temporality = match selector.export_kind_for(desc, record.aggregation.kind()) {
        ExportKind::Cumulative => AggregationTemporality::Cumulative as i32,
        ExportKind::Delta => AggregationTemporality::Delta as i32,
    };
    let attributes = key_values(record.labels.iter());
    let start = to_nanos(record.start_time);
    let end = to_nanos(record.end_time);

    let data = match &record.aggregation {
        Aggregation::Sum(n) => {
            check_kind(record, n)?;
            Data::Sum(Sum {
                data_points: vec![number_point(attributes, start, end, n)],
                aggregation_temporality: temporality,
                is_monotonic: desc.instrument_kind.monotonic(),
            })
        }
        Aggregation::LastValue { value, timestamp } => {
            check_kind(record, value)?;
            Data::Gauge(Gauge {
                data_points: vec![number_point(attributes, start, to_nanos(*timestamp), value)],
            })
        }
        Aggregation::MinMaxSumCount {
            min,
            max,
            sum,
            count,
        } => {
            for n in [min, max, sum] {
                check_kind(record, n)?;
            }
            Data::Histogram(Histogram {
                data_points: vec![HistogramDataPoint {
                    attributes,
                    start_time_unix_nano: start,
                    time_unix_nano: end,
                    count: *count,
                    sum: Some(sum.as_f64()),
                    min: Some(min.as_f64()),
                    max: Some(max.as_f64()),
                    bucket_counts: vec![*count],
                    explicit_bounds: vec![],
                    ..Default::default()
                }],
                aggregation_temporality: temporality,
            })
        }
        Aggregation::Histogram {
            sum,
            count,
            boundaries,
            counts,
        } => {
            check_kind(record, sum)?;
            if counts.len() != boundaries.len() + 1 {
                return Err(format!(
                    "{}: histogram has {} bucket counts for {} boundaries",
                    desc.name,
                    counts.len(),
                    boundaries.len()
                ));
            }
            Data::Histogram(Histogram {
                data_points: vec![HistogramDataPoint {
                    attributes,
                    start_time_unix_nano: start,
                    time_unix_nano: end,
                    count: *count,
                    sum: Some(sum.as_f64()),
                    bucket_counts: counts.clone(),
                    explicit_bounds: boundaries.clone(),
                    ..Default::default()
                }],
                aggregation_temporality: temporality,
            })
        }
    };

    Ok(Metric {
        name: desc.name.clone(),
        description: desc.description.clone(),
        unit: desc.unit.clone(),
        data: Some(data),
        ..Default::default()
    })
}

fn check_kind(record: &Record, n: &Number) -> Result<(), String> {
    if n.kind() != record.descriptor.number_kind {
        return Err(format!(
            "{}: {} value recorded for a {:?} instrument",
            record.descriptor.name,
            match n {
                Number::I64(_) => "i64",
                Number::F64(_) => "f64",
            },
            record.descriptor.number_kind
        ));
    }
    Ok(())
}

fn number_point(
    attributes: Vec<opentelemetry_proto::tonic::common::v1::KeyValue>,
    start: u64,
    time: u64,
    n: &Number,
) -> NumberDataPoint {
    let value = match n {
        Number::I64(v) => Value::AsInt(*v),
        Number::F64(v) => Value::AsDouble(*v),
    };
    NumberDataPoint {
        attributes,
        start_time_unix_nano: start,
        time_unix_nano: time,
        value: Some(value),
        ..Default::default()
    }
}

fn merge(existing: &mut Metric, incoming: Metric) -> Result<(), String> {
    match (&mut existing.data, incoming.data) {
        (Some(Data::Sum(a)), Some(Data::Sum(b))) => a.data_points.extend(b.data_points),
        (Some(Data::Gauge(a)), Some(Data::Gauge(b))) => a.data_points.extend(b.data_points),
        (Some(Data::Histogram(a)), Some(Data::Histogram(b))) => {
            a.data_points.extend(b.data_points)
        }
        _ => {
            return Err(format!(
                "{}: records of one instrument use different aggregations",
                existing.name
            ));
        }
    }
    Ok(())
}
