// SPDX-License-Identifier: Apache-2.0

use std::error::Error as StdError;
use thiserror::Error;
use tonic::{Code, Status};
use tower::BoxError;

/// ExporterError is the result of any exporter, driver or connection operation
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("already started")]
    AlreadyStarted,

    /// The connection is not ready and the caller did not ask to wait for it
    #[error("exporter disconnected from {address}: {reason}")]
    ConnectionUnavailable { address: String, reason: String },

    /// A blocking dial gave up before the connection became ready
    #[error("failed to dial {address}: {reason}")]
    DialFailure { address: String, reason: String },

    /// The checkpoint set callback or traversal failed
    #[error("checkpoint set iteration failed: {0}")]
    Iteration(#[source] BoxError),

    #[error("failed to encode telemetry: {0}")]
    Transform(String),

    /// GRPC Error status, from tonic
    #[error("GRPC error: {0}")]
    Grpc(#[from] Status),

    #[error("connection is shutting down")]
    Shutdown,

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid exporter configuration: {0}")]
    Config(String),
}

impl ExporterError {
    /// Whether the same batch could succeed if the caller sent it again later.
    ///
    /// The exporter never retries on its own; this only classifies the failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExporterError::ConnectionUnavailable { .. } => true,
            ExporterError::DialFailure { .. } => true,
            ExporterError::DeadlineExceeded => true,
            ExporterError::Grpc(status) => matches!(
                status.code(),
                Code::Unavailable |     // Service temporarily unavailable
                    Code::DeadlineExceeded | // Request timeout
                    Code::ResourceExhausted | // Server overloaded
                    Code::Aborted
            ),
            _ => false,
        }
    }

    /// Short, stable name used as a metric attribute.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ExporterError::AlreadyStarted => "already_started",
            ExporterError::ConnectionUnavailable { .. } => "connection_unavailable",
            ExporterError::DialFailure { .. } => "dial_failure",
            ExporterError::Iteration(_) => "iteration",
            ExporterError::Transform(_) => "transform",
            ExporterError::Grpc(_) => "grpc",
            ExporterError::Shutdown => "shutdown",
            ExporterError::Cancelled => "cancelled",
            ExporterError::DeadlineExceeded => "deadline_exceeded",
            ExporterError::Config(_) => "config",
        }
    }
}

/// Whether a call failed because the underlying connection is gone, as opposed to the
/// collector rejecting the request.
pub(crate) fn is_connection_failure(status: &Status) -> bool {
    match status.code() {
        Code::Unavailable => true,
        Code::Unknown => {
            let mut source = StdError::source(status);
            while let Some(err) = source {
                if err.downcast_ref::<tonic::transport::Error>().is_some() {
                    return true;
                }
                source = err.source();
            }
            status.message().contains("transport error")
        }
        _ => false,
    }
}
