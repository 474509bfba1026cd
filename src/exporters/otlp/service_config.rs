// SPDX-License-Identifier: Apache-2.0

//! The subset of the gRPC service config the exporter honours: per-method `timeout` and
//! `waitForReady` from `methodConfig`.

use crate::exporters::otlp::errors::ExporterError;
use serde::Deserialize;
use std::time::Duration;

pub(crate) const TRACE_SERVICE: &str = "opentelemetry.proto.collector.trace.v1.TraceService";
pub(crate) const METRICS_SERVICE: &str = "opentelemetry.proto.collector.metrics.v1.MetricsService";
pub(crate) const EXPORT_METHOD: &str = "Export";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServiceConfig {
    #[serde(default)]
    method_config: Vec<RawMethodConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMethodConfig {
    #[serde(default)]
    name: Vec<RawMethodName>,
    timeout: Option<String>,
    wait_for_ready: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMethodName {
    #[serde(default)]
    service: String,
    #[serde(default)]
    method: String,
}

/// Options applied to every call of one RPC method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub wait_for_ready: bool,
}

#[derive(Clone, Debug, PartialEq)]
struct MethodConfig {
    names: Vec<(String, String)>,
    options: CallOptions,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceConfig {
    methods: Vec<MethodConfig>,
}

impl ServiceConfig {
    pub fn parse(json: &str) -> Result<Self, ExporterError> {
        let raw: RawServiceConfig = serde_json::from_str(json)
            .map_err(|e| ExporterError::Config(format!("invalid service config: {}", e)))?;

        let mut methods = Vec::with_capacity(raw.method_config.len());
        for mc in raw.method_config {
            let timeout = match mc.timeout {
                Some(t) => Some(parse_duration(&t)?),
                None => None,
            };
            methods.push(MethodConfig {
                names: mc
                    .name
                    .into_iter()
                    .map(|n| (n.service, n.method))
                    .collect(),
                options: CallOptions {
                    timeout,
                    wait_for_ready: mc.wait_for_ready.unwrap_or(false),
                },
            });
        }
        Ok(Self { methods })
    }

    /// Resolves the options for `service/method`. An exact match beats a service-wide
    /// entry, which beats the default entry with an empty service.
    pub fn call_options(&self, service: &str, method: &str) -> CallOptions {
        let mut best: Option<(u8, CallOptions)> = None;
        for mc in &self.methods {
            for (s, m) in &mc.names {
                let rank = if s == service && m == method {
                    3
                } else if s == service && m.is_empty() {
                    2
                } else if s.is_empty() && m.is_empty() {
                    1
                } else {
                    continue;
                };
                if best.is_none_or(|(r, _)| rank > r) {
                    best = Some((rank, mc.options));
                }
            }
        }
        best.map(|(_, o)| o).unwrap_or_default()
    }
}

// Durations use the protobuf JSON form: decimal seconds with an "s" suffix.
fn parse_duration(s: &str) -> Result<Duration, ExporterError> {
    let secs = s
        .strip_suffix('s')
        .and_then(|n| n.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| {
            ExporterError::Config(format!("invalid service config timeout: {:?}", s))
        })?;
    Duration::try_from_secs_f64(secs).map_err(|e| {
        ExporterError::Config(format!("invalid service config timeout {:?}: {}", s, e))
    })
}
