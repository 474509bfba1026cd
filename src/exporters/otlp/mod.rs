// SPDX-License-Identifier: Apache-2.0

//! OTLP/gRPC exporter transport.
//!
//! This module owns the connection to an OTLP collector and ships pre-built batches of
//! spans and metric records over it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use otlp_exporter::exporters::otlp::config::GrpcDriverConfig;
//! use otlp_exporter::exporters::otlp::context::ExportContext;
//! use otlp_exporter::exporters::otlp::driver::GrpcDriver;
//! use otlp_exporter::exporters::otlp::exporter::Exporter;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), otlp_exporter::exporters::otlp::errors::ExporterError> {
//! let config = GrpcDriverConfig::builder()
//!     .with_address("collector:4317")
//!     .with_compressor("gzip")
//!     .build()?;
//! let ctx = ExportContext::background().with_timeout(Duration::from_secs(5));
//! let exporter = Exporter::new(&ctx, GrpcDriver::new(config)?).await?;
//! // ...
//! exporter.shutdown(&ctx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - `connection`: the connection manager and its background reconnection task
//! - `driver`: the `Driver` trait and the single-collector gRPC driver
//! - `split`: a driver routing traces and metrics to separate drivers
//! - `exporter`: the producer-facing exporter
//! - `config`, `tls`, `service_config`: validated driver configuration
//! - `transform`: encoding of spans and metric records into OTLP messages
//!
pub mod config;
pub mod connection;
pub mod context;
pub mod driver;
pub mod errors;
pub mod exporter;
pub mod service_config;
pub mod split;
pub mod tls;
pub mod transform;

use crate::exporters::otlp::errors::ExporterError;
use clap::ValueEnum;
use opentelemetry::global;
use opentelemetry::metrics::Meter;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost:4317";

/// Wait between reconnection attempts
pub const DEFAULT_RECONNECTION_PERIOD: Duration = Duration::from_secs(10);

/// Upper bound on establishing a single connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported compression encodings for OTLP data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompressionEncoding {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl CompressionEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionEncoding::None => "none",
            CompressionEncoding::Gzip => "gzip",
            CompressionEncoding::Zstd => "zstd",
        }
    }

    pub(crate) fn as_tonic(&self) -> Option<tonic::codec::CompressionEncoding> {
        match self {
            CompressionEncoding::None => None,
            CompressionEncoding::Gzip => Some(tonic::codec::CompressionEncoding::Gzip),
            CompressionEncoding::Zstd => Some(tonic::codec::CompressionEncoding::Zstd),
        }
    }
}

impl FromStr for CompressionEncoding {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "identity" => Ok(CompressionEncoding::None),
            "gzip" => Ok(CompressionEncoding::Gzip),
            "zstd" => Ok(CompressionEncoding::Zstd),
            other => Err(ExporterError::Config(format!(
                "unknown compressor {:?}",
                other
            ))),
        }
    }
}

/// Connectivity of a connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::TransientFailure => "transient_failure",
            ConnectionState::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// Start/stop progress of an exporter or driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Started,
    Stopped,
}

pub fn get_meter() -> Meter {
    global::meter("otlp_exporter")
}
