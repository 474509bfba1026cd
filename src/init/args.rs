// SPDX-License-Identifier: Apache-2.0

use crate::exporters::otlp::config::GrpcDriverConfig;
use crate::exporters::otlp::driver::{Driver, GrpcDriver};
use crate::exporters::otlp::errors::ExporterError;
use crate::exporters::otlp::split::{SplitConfig, SplitDriver};
use crate::exporters::otlp::tls::TlsConfig;
use crate::exporters::otlp::{
    CompressionEncoding, DEFAULT_ADDRESS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECTION_PERIOD,
};
use crate::init::parse;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, clap::Args, Clone, Deserialize)]
#[serde(default)]
pub struct OTLPExporterArgs {
    /// OTLP Exporter Endpoint (host:port) - Used for both signals unless a per-signal endpoint is set
    #[arg(
        long("otlp-exporter-endpoint"),
        env = "OTLP_EXPORTER_ENDPOINT",
        default_value = DEFAULT_ADDRESS
    )]
    pub endpoint: String,

    /// OTLP Exporter Traces Endpoint - Overrides otlp_exporter_endpoint if specified
    #[arg(
        long("otlp-exporter-traces-endpoint"),
        env = "OTLP_EXPORTER_TRACES_ENDPOINT"
    )]
    pub traces_endpoint: Option<String>,

    /// OTLP Exporter Metrics Endpoint - Overrides otlp_exporter_endpoint if specified
    #[arg(
        long("otlp-exporter-metrics-endpoint"),
        env = "OTLP_EXPORTER_METRICS_ENDPOINT"
    )]
    pub metrics_endpoint: Option<String>,

    /// Connect without TLS
    #[arg(long("otlp-exporter-insecure"), env = "OTLP_EXPORTER_INSECURE")]
    pub insecure: bool,

    /// Wait between attempts to re-establish a lost connection
    #[arg(
        long("otlp-exporter-reconnection-period"),
        env = "OTLP_EXPORTER_RECONNECTION_PERIOD",
        default_value = "10s",
        value_parser = humantime::parse_duration,
    )]
    #[serde(deserialize_with = "parse::deserialize_duration")]
    pub reconnection_period: Duration,

    /// OTLP Exporter Compression
    #[arg(
        value_enum,
        long("otlp-exporter-compression"),
        env = "OTLP_EXPORTER_COMPRESSION",
        default_value = "none"
    )]
    pub compression: CompressionEncoding,

    /// OTLP Exporter Headers, sent as metadata on every export
    #[arg(long("otlp-exporter-custom-headers"), env = "OTLP_EXPORTER_CUSTOM_HEADERS", value_parser = parse::parse_key_val::<String, String>, value_delimiter = ','
    )]
    #[serde(deserialize_with = "parse::deserialize_key_value_pairs")]
    pub custom_headers: Vec<(String, String)>,

    /// Upper bound on a single connection attempt
    #[arg(
        long("otlp-exporter-connect-timeout"),
        env = "OTLP_EXPORTER_CONNECT_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration,
    )]
    #[serde(deserialize_with = "parse::deserialize_duration")]
    pub connect_timeout: Duration,

    /// Wait for the collector connection on start and on export instead of failing fast
    #[arg(long("otlp-exporter-block-on-dial"), env = "OTLP_EXPORTER_BLOCK_ON_DIAL")]
    pub block_on_dial: bool,

    /// gRPC service config JSON, used for per-call timeouts and waitForReady
    #[arg(
        long("otlp-exporter-service-config"),
        env = "OTLP_EXPORTER_SERVICE_CONFIG"
    )]
    pub service_config: Option<String>,

    /// OTLP Exporter TLS CA certificate file
    #[arg(long("otlp-exporter-tls-ca-file"), env = "OTLP_EXPORTER_TLS_CA_FILE")]
    pub tls_ca_file: Option<String>,

    /// OTLP Exporter TLS client certificate file
    #[arg(
        long("otlp-exporter-tls-cert-file"),
        env = "OTLP_EXPORTER_TLS_CERT_FILE"
    )]
    pub tls_cert_file: Option<String>,

    /// OTLP Exporter TLS client key file
    #[arg(long("otlp-exporter-tls-key-file"), env = "OTLP_EXPORTER_TLS_KEY_FILE")]
    pub tls_key_file: Option<String>,

    /// Server name to verify the collector certificate against
    #[arg(
        long("otlp-exporter-tls-domain-name"),
        env = "OTLP_EXPORTER_TLS_DOMAIN_NAME"
    )]
    pub tls_domain_name: Option<String>,
}

impl Default for OTLPExporterArgs {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ADDRESS.to_string(),
            traces_endpoint: None,
            metrics_endpoint: None,
            insecure: false,
            reconnection_period: DEFAULT_RECONNECTION_PERIOD,
            compression: CompressionEncoding::None,
            custom_headers: vec![],
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            block_on_dial: false,
            service_config: None,
            tls_ca_file: None,
            tls_cert_file: None,
            tls_key_file: None,
            tls_domain_name: None,
        }
    }
}

impl OTLPExporterArgs {
    pub fn traces_endpoint(&self) -> &str {
        self.traces_endpoint.as_deref().unwrap_or(&self.endpoint)
    }

    pub fn metrics_endpoint(&self) -> &str {
        self.metrics_endpoint.as_deref().unwrap_or(&self.endpoint)
    }

    fn tls_config(&self) -> Result<TlsConfig, ExporterError> {
        let mut builder = TlsConfig::builder();
        if let Some(ca) = &self.tls_ca_file {
            builder = builder.with_ca_file(ca.clone());
        }
        if let Some(cert) = &self.tls_cert_file {
            builder = builder.with_cert_file(cert.clone());
        }
        if let Some(key) = &self.tls_key_file {
            builder = builder.with_key_file(key.clone());
        }
        if let Some(domain) = &self.tls_domain_name {
            builder = builder.with_domain_name(domain.clone());
        }
        builder.build()
    }

    /// The driver configuration for a collector at `endpoint`.
    pub fn driver_config(&self, endpoint: &str) -> Result<GrpcDriverConfig, ExporterError> {
        let mut builder = GrpcDriverConfig::builder()
            .with_address(endpoint)
            .with_reconnection_period(self.reconnection_period)
            .with_compression_encoding(self.compression)
            .with_headers(&self.custom_headers)
            .with_connect_timeout(self.connect_timeout)
            .with_block_on_dial(self.block_on_dial);

        builder = if self.insecure {
            builder.with_insecure()
        } else {
            builder.with_tls(self.tls_config()?)
        };
        if let Some(sc) = &self.service_config {
            builder = builder.with_service_config(sc.clone());
        }
        builder.build()
    }

    /// A single driver when both signals go to the same collector, a split driver
    /// otherwise.
    pub fn build_driver(&self) -> Result<Box<dyn Driver>, ExporterError> {
        let traces = self.traces_endpoint();
        let metrics = self.metrics_endpoint();

        if traces == metrics {
            info!(endpoint = traces, "Exporting traces and metrics to one collector");
            return Ok(Box::new(GrpcDriver::new(self.driver_config(traces)?)?));
        }

        info!(
            traces_endpoint = traces,
            metrics_endpoint = metrics,
            "Exporting traces and metrics to separate collectors"
        );
        Ok(Box::new(SplitDriver::new(SplitConfig {
            for_traces: Box::new(GrpcDriver::new(self.driver_config(traces)?)?),
            for_metrics: Box::new(GrpcDriver::new(self.driver_config(metrics)?)?),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        exporter: OTLPExporterArgs,
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "test",
            "--otlp-exporter-endpoint",
            "collector:4317",
            "--otlp-exporter-metrics-endpoint",
            "metrics:4317",
            "--otlp-exporter-insecure",
            "--otlp-exporter-reconnection-period",
            "250ms",
            "--otlp-exporter-compression",
            "gzip",
            "--otlp-exporter-custom-headers",
            "x-a=1,x-b=2",
        ])
        .unwrap();
        let args = cli.exporter;

        assert_eq!("collector:4317", args.traces_endpoint());
        assert_eq!("metrics:4317", args.metrics_endpoint());
        assert!(args.insecure);
        assert_eq!(Duration::from_millis(250), args.reconnection_period);
        assert_eq!(CompressionEncoding::Gzip, args.compression);
        assert_eq!(2, args.custom_headers.len());
        assert_eq!(Duration::from_secs(5), args.connect_timeout);
        assert!(!args.block_on_dial);
    }

    #[test]
    fn driver_config_from_args() {
        let args = OTLPExporterArgs {
            insecure: true,
            compression: CompressionEncoding::Zstd,
            custom_headers: vec![("x-a".to_string(), "1".to_string())],
            ..Default::default()
        };
        let config = args.driver_config("127.0.0.1:4317").unwrap();
        assert_eq!("127.0.0.1:4317", config.address());
        assert_eq!(CompressionEncoding::Zstd, config.compression());
        assert!(!config.is_secure());
    }

    #[test]
    fn deserializes_with_defaults() {
        let args: OTLPExporterArgs = serde_json::from_str(
            r#"{"endpoint": "c:4317", "insecure": true, "reconnection_period": "2s"}"#,
        )
        .unwrap();
        assert_eq!("c:4317", args.endpoint);
        assert_eq!(Duration::from_secs(2), args.reconnection_period);
        assert_eq!(Duration::from_secs(5), args.connect_timeout);
        assert_eq!(CompressionEncoding::None, args.compression);
    }

    #[tokio::test]
    async fn split_driver_for_distinct_endpoints() {
        let args = OTLPExporterArgs {
            insecure: true,
            metrics_endpoint: Some("127.0.0.1:4318".to_string()),
            ..Default::default()
        };
        // Building does not dial, so unreachable endpoints are fine here.
        assert!(args.build_driver().is_ok());
    }
}
