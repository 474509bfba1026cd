// SPDX-License-Identifier: Apache-2.0

use crate::exporters::otlp::errors::ExporterError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline for a single exporter operation.
///
/// Clones share the same cancellation token. Deriving a context with a timeout keeps the
/// token and the earlier of the two deadlines.
#[derive(Clone, Debug, Default)]
pub struct ExportContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExportContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The error this context already resolves to, if any.
    pub fn err(&self) -> Option<ExporterError> {
        if self.token.is_cancelled() {
            return Some(ExporterError::Cancelled);
        }
        match self.deadline {
            Some(d) if d <= Instant::now() => Some(ExporterError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ExporterError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ExporterError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ExporterError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ExporterError::Cancelled
            }
        }
    }

    /// Runs `fut` unless the context finishes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ExporterError> {
        tokio::select! {
            biased;
            e = self.done() => Err(e),
            v = fut => Ok(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_finishes() {
        let ctx = ExportContext::background();
        assert!(ctx.err().is_none());
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn deadline_exceeded() {
        let ctx = ExportContext::background().with_timeout(Duration::from_millis(10));
        assert!(matches!(ctx.done().await, ExporterError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(ExporterError::DeadlineExceeded)));
        assert_eq!(Some(Duration::ZERO), ctx.remaining());
    }

    #[tokio::test]
    async fn cancellation_is_shared_with_derived_contexts() {
        let parent = ExportContext::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(matches!(child.done().await, ExporterError::Cancelled));
    }

    #[tokio::test]
    async fn earlier_deadline_wins() {
        let short = ExportContext::background().with_timeout(Duration::from_millis(10));
        let derived = short.with_timeout(Duration::from_secs(60));
        assert_eq!(short.deadline(), derived.deadline());
    }

    #[tokio::test]
    async fn run_returns_output_or_error() {
        let ctx = ExportContext::background();
        assert_eq!(4, ctx.run(async { 4 }).await.unwrap());

        let ctx = ctx.with_timeout(Duration::from_millis(10));
        let res = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(res, Err(ExporterError::DeadlineExceeded)));
    }
}
