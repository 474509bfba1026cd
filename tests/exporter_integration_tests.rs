// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the exporter against an in-process collector.

use opentelemetry::KeyValue;
use opentelemetry::trace::{SpanContext, SpanId, SpanKind, TraceFlags, TraceId, TraceState};
use opentelemetry_proto::tonic::common::v1::any_value;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value;
use otlp_exporter::export::metric::{
    Aggregation, CheckpointSet, Descriptor, ExportKindSelector, InMemoryCheckpointSet, InstrumentKind, Number,
    NumberKind, Record,
};
use otlp_exporter::export::resource::{AttributeSet, Resource};
use otlp_exporter::export::trace::{InstrumentationLibrary, SpanSnapshot};
use otlp_exporter::exporters::otlp::config::{GrpcDriverConfig, GrpcDriverConfigBuilder};
use otlp_exporter::exporters::otlp::context::ExportContext;
use otlp_exporter::exporters::otlp::driver::GrpcDriver;
use otlp_exporter::exporters::otlp::errors::ExporterError;
use otlp_exporter::exporters::otlp::exporter::Exporter;
use otlp_exporter::exporters::otlp::split::{SplitConfig, SplitDriver};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tower::BoxError;
use utilities::collector::MockCollector;

const RECONNECTION_PERIOD: Duration = Duration::from_millis(20);

fn builder(address: &str) -> GrpcDriverConfigBuilder {
    GrpcDriverConfig::builder()
        .with_address(address)
        .with_insecure()
        .with_reconnection_period(RECONNECTION_PERIOD)
        .with_connect_timeout(Duration::from_secs(1))
}

fn driver(config: GrpcDriverConfigBuilder) -> GrpcDriver {
    GrpcDriver::new(config.build().unwrap()).unwrap()
}

async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn span(resource: &Arc<Resource>, library: &str, name: &str, n: u8) -> SpanSnapshot {
    let start = SystemTime::now();
    SpanSnapshot {
        span_context: SpanContext::new(
            TraceId::from_bytes([n; 16]),
            SpanId::from_bytes([n; 8]),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        ),
        span_kind: SpanKind::Server,
        name: name.to_string(),
        start_time: start,
        end_time: start + Duration::from_millis(5),
        attributes: vec![KeyValue::new("n", n as i64)],
        resource: Some(resource.clone()),
        instrumentation_library: InstrumentationLibrary::new(library).with_version("v0.1.0"),
        ..Default::default()
    }
}

fn record(
    resource: &Arc<Resource>,
    name: &str,
    kind: InstrumentKind,
    number_kind: NumberKind,
    aggregation: Aggregation,
) -> Record {
    let now = SystemTime::now();
    Record::new(
        Arc::new(
            Descriptor::new(name, kind, number_kind)
                .with_instrumentation("test-meter", Some("v0.1.0".to_string())),
        ),
        AttributeSet::new(vec![KeyValue::new("abc", "def"), KeyValue::new("one", 1)]),
        resource.clone(),
        aggregation,
        now,
        now,
    )
}

async fn export_all(exporter: &Exporter) {
    let ctx = ExportContext::background();
    let r1 = Arc::new(Resource::new(vec![KeyValue::new("rk1", "rv11"), KeyValue::new("rk2", 5)]));
    let r2 = Arc::new(Resource::new(vec![KeyValue::new("rk1", "rv12"), KeyValue::new("rk3", 6)]));

    let mut spans = Vec::new();
    for (i, lib) in ["library-a", "library-b"].iter().enumerate() {
        for j in 0..2u8 {
            spans.push(span(&r1, lib, &format!("r1-{}-{}", lib, j), (i as u8) * 2 + j + 1));
            spans.push(span(&r2, lib, &format!("r2-{}-{}", lib, j), (i as u8) * 2 + j + 10));
        }
    }
    assert_ok!(exporter.export_spans(&ctx, &spans).await);

    let set = InMemoryCheckpointSet::new(vec![
        record(
            &r1,
            "int64-count",
            InstrumentKind::Counter,
            NumberKind::I64,
            Aggregation::Sum(Number::I64(1)),
        ),
        record(
            &r1,
            "float64-count",
            InstrumentKind::Counter,
            NumberKind::F64,
            Aggregation::Sum(Number::F64(1.0)),
        ),
        record(
            &r1,
            "int64-recorder",
            InstrumentKind::ValueRecorder,
            NumberKind::I64,
            Aggregation::MinMaxSumCount {
                min: Number::I64(2),
                max: Number::I64(2),
                sum: Number::I64(2),
                count: 1,
            },
        ),
        record(
            &r1,
            "float64-observer",
            InstrumentKind::ValueObserver,
            NumberKind::F64,
            Aggregation::LastValue {
                value: Number::F64(3.0),
                timestamp: SystemTime::now(),
            },
        ),
        record(
            &r2,
            "int64-sum-observer",
            InstrumentKind::SumObserver,
            NumberKind::I64,
            Aggregation::Sum(Number::I64(4)),
        ),
        record(
            &r2,
            "float64-histogram",
            InstrumentKind::ValueRecorder,
            NumberKind::F64,
            Aggregation::Histogram {
                sum: Number::F64(6.0),
                count: 2,
                boundaries: vec![1.0, 5.0],
                counts: vec![0, 2, 0],
            },
        ),
    ]);
    assert_ok!(exporter.export(&ctx, &set).await);
}

fn assert_received(traces: &MockCollector, metrics: &MockCollector) {
    let rs = traces.resource_spans();
    assert_eq!(2, rs.len(), "spans should be grouped into two resources");
    for r in &rs {
        assert_eq!(2, r.resource.as_ref().unwrap().attributes.len());
        assert_eq!(2, r.scope_spans.len());
        for ss in &r.scope_spans {
            assert_eq!(2, ss.spans.len());
            assert_eq!("v0.1.0", ss.scope.as_ref().unwrap().version);
        }
    }
    assert_eq!(8, traces.spans().len());

    let metrics = metrics.metrics();
    assert_eq!(6, metrics.len());
    for m in &metrics {
        match (m.name.as_str(), &m.data) {
            ("int64-count", Some(Data::Sum(s))) => {
                assert!(s.is_monotonic);
                assert_eq!(Some(Value::AsInt(1)), s.data_points[0].value);
                assert_eq!(2, s.data_points[0].attributes.len());
            }
            ("float64-count", Some(Data::Sum(s))) => {
                assert_eq!(Some(Value::AsDouble(1.0)), s.data_points[0].value)
            }
            ("int64-recorder", Some(Data::Histogram(h))) => {
                assert_eq!(1, h.data_points[0].count);
                assert_eq!(Some(2.0), h.data_points[0].sum);
            }
            ("float64-observer", Some(Data::Gauge(g))) => {
                assert_eq!(Some(Value::AsDouble(3.0)), g.data_points[0].value)
            }
            ("int64-sum-observer", Some(Data::Sum(s))) => {
                assert!(s.is_monotonic);
                assert_eq!(Some(Value::AsInt(4)), s.data_points[0].value);
            }
            ("float64-histogram", Some(Data::Histogram(h))) => {
                assert_eq!(2, h.data_points[0].count);
                assert_eq!(vec![0, 2, 0], h.data_points[0].bucket_counts);
            }
            (name, data) => panic!("unexpected metric {}: {:?}", name, data),
        }
    }
}

#[tokio::test]
async fn standard_end_to_end() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&collector.address())))
        .await
        .unwrap();

    export_all(&exporter).await;
    assert_ok!(exporter.shutdown(&ctx).await);

    assert_received(&collector, &collector);
    assert_eq!(1, collector.trace_calls());
    assert_eq!(1, collector.metric_calls());
}

#[tokio::test]
async fn gzip_end_to_end() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(
        &ctx,
        driver(builder(&collector.address()).with_compressor("gzip")),
    )
    .await
    .unwrap();

    export_all(&exporter).await;
    assert_ok!(exporter.shutdown(&ctx).await);
    assert_received(&collector, &collector);
}

#[tokio::test]
async fn empty_service_config_end_to_end() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(
        &ctx,
        driver(builder(&collector.address()).with_service_config("{}")),
    )
    .await
    .unwrap();

    export_all(&exporter).await;
    assert_ok!(exporter.shutdown(&ctx).await);
    assert_received(&collector, &collector);
}

#[tokio::test]
async fn blocking_dial_end_to_end() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background().with_timeout(Duration::from_secs(5));
    let exporter = Exporter::new(
        &ctx,
        driver(builder(&collector.address()).with_block_on_dial(true)),
    )
    .await
    .unwrap();

    export_all(&exporter).await;
    assert_ok!(exporter.shutdown(&ctx).await);
    assert_received(&collector, &collector);
}

#[tokio::test]
async fn headers_arrive_as_metadata() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(
        &ctx,
        driver(
            builder(&collector.address())
                .with_header("header1", "value1")
                .with_header("header2", "value2"),
        ),
    )
    .await
    .unwrap();

    let resource = Arc::new(Resource::empty());
    assert_ok!(
        exporter
            .export_spans(&ctx, &[span(&resource, "lib", "s", 1)])
            .await
    );
    let md = collector.last_metadata().unwrap();
    assert_eq!("value1", md.get("header1").unwrap().to_str().unwrap());
    assert_eq!("value2", md.get("header2").unwrap().to_str().unwrap());
}

#[tokio::test]
async fn start_twice_reports_already_started() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new_unstarted(driver(builder(&collector.address())));

    assert_ok!(exporter.start(&ctx).await);
    let err = exporter.start(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("already started"));

    assert_ok!(exporter.shutdown(&ctx).await);
    assert_ok!(exporter.shutdown(&ctx).await);
}

#[tokio::test]
async fn export_after_shutdown_fails() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&collector.address())))
        .await
        .unwrap();
    assert_ok!(exporter.shutdown(&ctx).await);

    let res = exporter
        .export_spans(&ctx, &[SpanSnapshot::new("late")])
        .await;
    assert!(matches!(res, Err(ExporterError::Shutdown)));
    assert_eq!(0, collector.trace_calls());
}

#[tokio::test]
async fn dead_collector_fails_fast_then_recovers() {
    let addr = unused_addr().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&addr.to_string())))
        .await
        .unwrap();

    let res = exporter
        .export_spans(&ctx, &[SpanSnapshot::new("early")])
        .await;
    match res {
        Err(e @ ExporterError::ConnectionUnavailable { .. }) => assert!(e.is_retryable()),
        other => panic!("unexpected result: {:?}", other),
    }

    let collector = MockCollector::start_at(addr).await;
    let sent = export_until_ok(&exporter, "recovered").await;
    assert!(sent);
    assert_eq!(1, collector.spans().len());
    assert_eq!("recovered", collector.spans()[0].name);

    assert_ok!(exporter.shutdown(&ctx).await);
}

#[tokio::test]
async fn blocking_dial_to_dead_collector_times_out() {
    let addr = unused_addr().await;
    let ctx = ExportContext::background().with_timeout(Duration::from_millis(200));
    let res = Exporter::new(&ctx, driver(builder(&addr.to_string()).with_block_on_dial(true))).await;
    assert!(matches!(res, Err(ExporterError::DialFailure { .. })));
}

#[tokio::test]
async fn collector_restart_reconnects() {
    let mut first = MockCollector::start().await;
    let addr = first.socket_addr();
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&addr.to_string())))
        .await
        .unwrap();

    first.stop().await;
    let res = exporter
        .export_spans(&ctx, &[SpanSnapshot::new("lost")])
        .await;
    assert!(res.is_err(), "export to a stopped collector should fail");

    let second = MockCollector::start_at(addr).await;
    tokio::time::sleep(RECONNECTION_PERIOD * 4).await;
    for i in 0..10 {
        assert_ok!(
            exporter
                .export_spans(&ctx, &[SpanSnapshot::new(format!("span-{}", i))])
                .await
        );
    }

    assert_eq!(0, first.spans().len());
    assert_eq!(10, second.spans().len());
    assert_ok!(exporter.shutdown(&ctx).await);
}

// Failed attempts never reach a collector, so exactly one copy arrives.
async fn export_until_ok(exporter: &Exporter, name: &str) -> bool {
    let ctx = ExportContext::background().with_timeout(Duration::from_secs(2));
    for _ in 0..200 {
        if exporter
            .export_spans(&ctx, &[SpanSnapshot::new(name)])
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(RECONNECTION_PERIOD).await;
    }
    false
}

#[tokio::test]
async fn split_driver_routes_signals() {
    let traces = MockCollector::start().await;
    let metrics = MockCollector::start().await;
    let ctx = ExportContext::background();

    let split = SplitDriver::new(SplitConfig {
        for_traces: Box::new(driver(builder(&traces.address()))),
        for_metrics: Box::new(driver(builder(&metrics.address()))),
    });
    let exporter = Exporter::new(&ctx, split)
        .await
        .unwrap()
        .with_export_kind_selector(ExportKindSelector::Cumulative);

    export_all(&exporter).await;
    assert_ok!(exporter.shutdown(&ctx).await);

    assert_received(&traces, &metrics);
    assert_eq!(0, traces.metric_calls());
    assert_eq!(0, metrics.trace_calls());
}

#[tokio::test]
async fn split_driver_with_one_dead_collector() {
    let traces = MockCollector::start().await;
    let dead = unused_addr().await;
    let ctx = ExportContext::background();

    let split = SplitDriver::new(SplitConfig {
        for_traces: Box::new(driver(builder(&traces.address()))),
        for_metrics: Box::new(driver(builder(&dead.to_string()))),
    });
    let exporter = Exporter::new(&ctx, split).await.unwrap();

    let resource = Arc::new(Resource::empty());
    assert_ok!(
        exporter
            .export_spans(&ctx, &[span(&resource, "lib", "ok", 1)])
            .await
    );
    let set = InMemoryCheckpointSet::new(vec![record(
        &resource,
        "c",
        InstrumentKind::Counter,
        NumberKind::I64,
        Aggregation::Sum(Number::I64(1)),
    )]);
    let res = exporter.export(&ctx, &set).await;
    assert!(matches!(
        res,
        Err(ExporterError::ConnectionUnavailable { .. })
    ));

    assert_eq!(1, traces.spans().len());
    assert_ok!(exporter.shutdown(&ctx).await);
}

#[tokio::test]
async fn span_attributes_survive_the_wire() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&collector.address())))
        .await
        .unwrap();

    let resource = Arc::new(Resource::new(vec![KeyValue::new("service.name", "wire")]));
    assert_ok!(
        exporter
            .export_spans(&ctx, &[span(&resource, "lib", "attrs", 7)])
            .await
    );

    let spans = collector.spans();
    assert_eq!(1, spans.len());
    assert_eq!(vec![7u8; 16], spans[0].trace_id);
    assert_eq!("n", spans[0].attributes[0].key);
    assert_eq!(
        Some(any_value::Value::IntValue(7)),
        spans[0].attributes[0].value.clone().unwrap().value
    );
}

#[tokio::test]
async fn empty_batches_make_no_calls() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&collector.address())))
        .await
        .unwrap();

    assert_ok!(exporter.export_spans(&ctx, &[]).await);
    assert_ok!(exporter.export(&ctx, &InMemoryCheckpointSet::new(vec![])).await);

    assert_eq!(0, collector.trace_calls());
    assert_eq!(0, collector.metric_calls());
    assert_ok!(exporter.shutdown(&ctx).await);
}

struct BrokenSet {
    records: Vec<Record>,
}

impl CheckpointSet for BrokenSet {
    fn for_each(
        &self,
        _selector: &ExportKindSelector,
        f: &mut dyn FnMut(&Record) -> Result<(), BoxError>,
    ) -> Result<(), BoxError> {
        for r in &self.records {
            f(r)?;
        }
        Err("checkpoint set is being rewritten".into())
    }
}

#[tokio::test]
async fn iteration_failure_makes_no_call() {
    let collector = MockCollector::start().await;
    let ctx = ExportContext::background();
    let exporter = Exporter::new(&ctx, driver(builder(&collector.address())))
        .await
        .unwrap();

    let resource = Arc::new(Resource::empty());
    let set = BrokenSet {
        records: vec![record(
            &resource,
            "c",
            InstrumentKind::Counter,
            NumberKind::I64,
            Aggregation::Sum(Number::I64(1)),
        )],
    };
    let res = exporter.export(&ctx, &set).await;
    assert!(matches!(res, Err(ExporterError::Iteration(_))));
    assert_eq!(0, collector.metric_calls());
    assert_ok!(exporter.shutdown(&ctx).await);
}
