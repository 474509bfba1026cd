// SPDX-License-Identifier: Apache-2.0

use crate::crypto::init_crypto_provider;
use crate::exporters::otlp::errors::ExporterError;
use crate::exporters::otlp::service_config::ServiceConfig;
use crate::exporters::otlp::tls::TlsConfig;
use crate::exporters::otlp::{
    CompressionEncoding, DEFAULT_ADDRESS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECTION_PERIOD,
};
use std::str::FromStr;
use std::time::Duration;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::{Endpoint, Uri};

#[derive(Clone, Debug, Default)]
pub enum Security {
    #[default]
    Insecure,
    Secure(TlsConfig),
}

/// Options passed to the channel when dialing the collector.
#[derive(Clone, Debug)]
pub struct DialOptions {
    pub connect_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    pub tcp_nodelay: bool,
    pub http2_keep_alive_interval: Option<Duration>,
    pub keep_alive_timeout: Option<Duration>,
    pub keep_alive_while_idle: bool,
    pub user_agent: Option<String>,
    /// Overrides the `:authority` sent on requests.
    pub origin: Option<String>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tcp_keepalive: None,
            tcp_nodelay: true,
            http2_keep_alive_interval: None,
            keep_alive_timeout: None,
            keep_alive_while_idle: false,
            user_agent: None,
            origin: None,
        }
    }
}

/// Validated configuration of a single collector connection. Created through
/// [`GrpcDriverConfig::builder`] and immutable afterwards.
#[derive(Clone, Debug)]
pub struct GrpcDriverConfig {
    pub(crate) address: String,
    pub(crate) security: Security,
    pub(crate) reconnection_period: Duration,
    pub(crate) compression: CompressionEncoding,
    pub(crate) headers: MetadataMap,
    pub(crate) dial_options: DialOptions,
    pub(crate) service_config: ServiceConfig,
    pub(crate) block_on_dial: bool,
}

impl GrpcDriverConfig {
    pub fn builder() -> GrpcDriverConfigBuilder {
        Default::default()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn reconnection_period(&self) -> Duration {
        self.reconnection_period
    }

    pub fn compression(&self) -> CompressionEncoding {
        self.compression
    }

    pub fn block_on_dial(&self) -> bool {
        self.block_on_dial
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.security, Security::Secure(_))
    }

    /// Builds the tonic endpoint for this configuration without dialing.
    pub(crate) fn endpoint(&self) -> Result<Endpoint, ExporterError> {
        let scheme = if self.is_secure() { "https" } else { "http" };
        let uri = format!("{}://{}", scheme, self.address);

        let opts = &self.dial_options;
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| {
                ExporterError::Config(format!("invalid address {:?}: {}", self.address, e))
            })?
            .connect_timeout(opts.connect_timeout)
            .tcp_nodelay(opts.tcp_nodelay)
            .tcp_keepalive(opts.tcp_keepalive)
            .keep_alive_while_idle(opts.keep_alive_while_idle);

        if let Some(interval) = opts.http2_keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = opts.keep_alive_timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        if let Some(ua) = &opts.user_agent {
            endpoint = endpoint
                .user_agent(ua.clone())
                .map_err(|e| ExporterError::Config(format!("invalid user agent: {}", e)))?;
        }
        if let Some(origin) = &opts.origin {
            let origin = Uri::from_str(origin)
                .map_err(|e| ExporterError::Config(format!("invalid origin: {}", e)))?;
            endpoint = endpoint.origin(origin);
        }
        if let Security::Secure(tls) = &self.security {
            init_crypto_provider().map_err(|e| ExporterError::Config(e.to_string()))?;
            endpoint = endpoint
                .tls_config(tls.client_config()?)
                .map_err(|e| ExporterError::Config(format!("invalid TLS config: {}", e)))?;
        }

        Ok(endpoint)
    }
}

#[derive(Clone, Debug)]
pub struct GrpcDriverConfigBuilder {
    address: String,
    security: Security,
    reconnection_period: Duration,
    compressor: Option<String>,
    headers: Vec<(String, String)>,
    dial_options: DialOptions,
    service_config: Option<String>,
    block_on_dial: bool,
}

impl Default for GrpcDriverConfigBuilder {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            security: Security::Insecure,
            reconnection_period: DEFAULT_RECONNECTION_PERIOD,
            compressor: None,
            headers: vec![],
            dial_options: DialOptions::default(),
            service_config: None,
            block_on_dial: false,
        }
    }
}

impl GrpcDriverConfigBuilder {
    /// Collector `host:port`.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.security = Security::Insecure;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.security = Security::Secure(tls);
        self
    }

    pub fn with_reconnection_period(mut self, period: Duration) -> Self {
        self.reconnection_period = period;
        self
    }

    /// Selects the compression codec by name: `none`, `gzip` or `zstd`.
    pub fn with_compressor(mut self, name: impl Into<String>) -> Self {
        self.compressor = Some(name.into());
        self
    }

    pub fn with_compression_encoding(mut self, encoding: CompressionEncoding) -> Self {
        self.compressor = Some(encoding.name().to_string());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        headers
            .iter()
            .for_each(|kv| self.headers.push(kv.to_owned()));
        self
    }

    pub fn with_dial_options(mut self, options: DialOptions) -> Self {
        self.dial_options = options;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.dial_options.connect_timeout = timeout;
        self
    }

    /// A gRPC service config JSON document.
    pub fn with_service_config(mut self, json: impl Into<String>) -> Self {
        self.service_config = Some(json.into());
        self
    }

    /// When set, starting the driver and exporting wait for the connection to become ready
    /// instead of failing fast.
    pub fn with_block_on_dial(mut self, block: bool) -> Self {
        self.block_on_dial = block;
        self
    }

    pub fn build(self) -> Result<GrpcDriverConfig, ExporterError> {
        if self.address.is_empty() {
            return Err(ExporterError::Config("address must not be empty".to_string()));
        }
        if self.address.contains("://") {
            return Err(ExporterError::Config(format!(
                "address must be host:port without a scheme, got {:?}",
                self.address
            )));
        }
        if self.reconnection_period.is_zero() {
            return Err(ExporterError::Config(
                "reconnection period must be greater than zero".to_string(),
            ));
        }
        if self.dial_options.connect_timeout.is_zero() {
            return Err(ExporterError::Config(
                "connect timeout must be greater than zero".to_string(),
            ));
        }

        let compression = match &self.compressor {
            Some(name) => CompressionEncoding::from_str(name)?,
            None => CompressionEncoding::None,
        };

        let mut headers = MetadataMap::with_capacity(self.headers.len());
        for (k, v) in &self.headers {
            let key = AsciiMetadataKey::from_str(k)
                .map_err(|e| ExporterError::Config(format!("invalid header key {:?}: {}", k, e)))?;
            if headers.contains_key(&key) {
                return Err(ExporterError::Config(format!("duplicate header key {:?}", k)));
            }
            let value = AsciiMetadataValue::from_str(v).map_err(|e| {
                ExporterError::Config(format!("invalid value for header {:?}: {}", k, e))
            })?;
            headers.insert(key, value);
        }

        let service_config = match &self.service_config {
            Some(json) => ServiceConfig::parse(json)?,
            None => ServiceConfig::default(),
        };

        let config = GrpcDriverConfig {
            address: self.address,
            security: self.security,
            reconnection_period: self.reconnection_period,
            compression,
            headers,
            dial_options: self.dial_options,
            service_config,
            block_on_dial: self.block_on_dial,
        };
        // Catch malformed addresses and dial options before a driver exists.
        config.endpoint()?;
        Ok(config)
    }
}
