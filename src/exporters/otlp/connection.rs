// SPDX-License-Identifier: Apache-2.0

//! A single collector connection.
//!
//! The manager dials once when asked to connect. From then on a background task owns
//! recovery: whenever a dial fails or an export reports that the connection is gone, the
//! task wakes, waits `reconnection_period` and dials again, repeating until it succeeds or
//! the manager is closed. Callers never retry on their own; while the connection is not
//! ready they either fail fast or, in blocking mode, park until it is.

use crate::exporters::otlp::ConnectionState;
use crate::exporters::otlp::config::GrpcDriverConfig;
use crate::exporters::otlp::context::ExportContext;
use crate::exporters::otlp::errors::{ExporterError, is_connection_failure};
use std::error::Error as StdError;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

struct Inner {
    state: ConnectionState,
    channel: Option<Channel>,
    // Bumped on every successful dial so failures on a replaced channel are ignored.
    generation: u64,
    last_error: Option<String>,
    background: Option<JoinHandle<()>>,
}

struct Shared {
    address: String,
    endpoint: Endpoint,
    reconnection_period: Duration,
    block_on_dial: bool,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    disconnected: Notify,
    cancel: CancellationToken,
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: &GrpcDriverConfig) -> Result<Self, ExporterError> {
        let endpoint = config.endpoint()?;
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Ok(Self {
            shared: Arc::new(Shared {
                address: config.address.clone(),
                endpoint,
                reconnection_period: config.reconnection_period,
                block_on_dial: config.block_on_dial,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    channel: None,
                    generation: 0,
                    last_error: None,
                    background: None,
                }),
                state_tx,
                disconnected: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Starts the reconnection task and makes one dial attempt.
    ///
    /// In non-blocking mode a failed dial is left to the background task and `Ok` is
    /// returned. In blocking mode the call waits for the connection to become ready and
    /// fails with [`ExporterError::DialFailure`] if `ctx` ends first.
    pub async fn connect(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        {
            let mut inner = self.shared.lock();
            match inner.state {
                ConnectionState::ShuttingDown => return Err(ExporterError::Shutdown),
                ConnectionState::Ready => return Ok(()),
                _ => {}
            }
            if inner.background.is_none() {
                inner.background = Some(tokio::spawn(reconnect_loop(self.shared.clone())));
            }
        }

        let err = match self.shared.dial(ctx).await {
            Ok(()) => return Ok(()),
            Err(ExporterError::Shutdown) => return Err(ExporterError::Shutdown),
            Err(e) => e,
        };
        self.shared.disconnected.notify_one();

        if !self.shared.block_on_dial {
            return match err {
                ExporterError::Cancelled | ExporterError::DeadlineExceeded => Err(err),
                _ => {
                    debug!(address = %self.shared.address, error = %err,
                        "Initial dial failed, connecting in the background");
                    Ok(())
                }
            };
        }

        match self.shared.acquire(ctx, true).await {
            Ok(_) => Ok(()),
            Err(ExporterError::Shutdown) => Err(ExporterError::Shutdown),
            Err(_) => Err(ExporterError::DialFailure {
                address: self.shared.address.clone(),
                reason: self.shared.lock().last_error.clone().unwrap_or_else(|| err.to_string()),
            }),
        }
    }

    /// Runs `call` against the current channel.
    ///
    /// When the connection is not ready the call fails with
    /// [`ExporterError::ConnectionUnavailable`], unless `wait_for_ready` or blocking dial
    /// is set, in which case it waits for the connection within `ctx`. A status showing
    /// the connection was lost hands the connection back to the reconnection task; the
    /// call itself is not repeated.
    pub async fn with_connection<T, F, Fut>(
        &self,
        ctx: &ExportContext,
        wait_for_ready: bool,
        call: F,
    ) -> Result<T, ExporterError>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let wait = wait_for_ready || self.shared.block_on_dial;
        let (channel, generation) = self.shared.acquire(ctx, wait).await?;

        let result = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(ExporterError::Shutdown),
            e = ctx.done() => return Err(e),
            r = call(channel) => r,
        };

        result.map_err(|status| {
            if is_connection_failure(&status) {
                self.shared.report_failure(generation, &status);
            }
            ExporterError::Grpc(status)
        })
    }

    /// Stops the reconnection task and releases the channel. Safe to call repeatedly.
    pub async fn close(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        let handle = {
            let mut inner = self.shared.lock();
            if inner.state != ConnectionState::ShuttingDown {
                info!(address = %self.shared.address, "Closing collector connection");
            }
            self.shared.set_state(&mut inner, ConnectionState::ShuttingDown);
            inner.channel = None;
            inner.background.take()
        };
        self.shared.cancel.cancel();

        if let Some(handle) = handle {
            tokio::select! {
                res = handle => {
                    if let Err(e) = res {
                        warn!(address = %self.shared.address, error = ?e, "Reconnection task failed");
                    }
                }
                e = ctx.done() => {
                    warn!(address = %self.shared.address, "Timed out waiting for reconnection task to stop");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, next: ConnectionState) {
        if inner.state == next {
            return;
        }
        debug!(address = %self.address, from = %inner.state, to = %next, "Connection state changed");
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    async fn dial(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::ShuttingDown => return Err(ExporterError::Shutdown),
                ConnectionState::Ready => return Ok(()),
                _ => self.set_state(&mut inner, ConnectionState::Connecting),
            }
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ExporterError::Shutdown),
            e = ctx.done() => Err(e),
            r = self.endpoint.connect() => r.map_err(|e| ExporterError::DialFailure {
                address: self.address.clone(),
                reason: error_chain(&e),
            }),
        };

        let mut inner = self.lock();
        if inner.state == ConnectionState::ShuttingDown {
            return Err(ExporterError::Shutdown);
        }
        match result {
            Ok(channel) => {
                inner.channel = Some(channel);
                inner.generation += 1;
                inner.last_error = None;
                self.set_state(&mut inner, ConnectionState::Ready);
                info!(address = %self.address, "Connected to collector");
                Ok(())
            }
            Err(e) => {
                // A concurrent dial may already have succeeded.
                if inner.state != ConnectionState::Ready {
                    inner.last_error = Some(match &e {
                        ExporterError::DialFailure { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    });
                    self.set_state(&mut inner, ConnectionState::TransientFailure);
                }
                Err(e)
            }
        }
    }

    async fn acquire(
        &self,
        ctx: &ExportContext,
        wait: bool,
    ) -> Result<(Channel, u64), ExporterError> {
        // Subscribe before inspecting the state so a transition in between still wakes us.
        let mut rx = self.state_tx.subscribe();
        loop {
            {
                let inner = self.lock();
                match (inner.state, &inner.channel) {
                    (ConnectionState::Ready, Some(channel)) => {
                        return Ok((channel.clone(), inner.generation));
                    }
                    (ConnectionState::ShuttingDown, _) => return Err(ExporterError::Shutdown),
                    (state, _) if !wait => {
                        return Err(ExporterError::ConnectionUnavailable {
                            address: self.address.clone(),
                            reason: inner
                                .last_error
                                .clone()
                                .unwrap_or_else(|| format!("connection is {}", state)),
                        });
                    }
                    _ => {}
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExporterError::Shutdown),
                e = ctx.done() => return Err(e),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ExporterError::Shutdown);
                    }
                }
            }
        }
    }

    fn report_failure(&self, generation: u64, status: &Status) {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Ready || inner.generation != generation {
                return;
            }
            inner.channel = None;
            inner.last_error = Some(status.message().to_string());
            self.set_state(&mut inner, ConnectionState::TransientFailure);
        }
        warn!(address = %self.address, error = %status,
            "Lost connection to collector, reconnecting in the background");
        self.disconnected.notify_one();
    }
}

async fn reconnect_loop(shared: Arc<Shared>) {
    'outer: loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break 'outer,
            _ = shared.disconnected.notified() => {}
        }

        loop {
            let state = shared.lock().state;
            match state {
                ConnectionState::Ready => break,
                ConnectionState::ShuttingDown => break 'outer,
                _ => {}
            }

            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break 'outer,
                _ = tokio::time::sleep(shared.reconnection_period) => {}
            }

            match shared.dial(&ExportContext::background()).await {
                Ok(()) => break,
                Err(ExporterError::Shutdown) => break 'outer,
                Err(e) => {
                    debug!(address = %shared.address, error = %e, "Reconnection attempt failed");
                }
            }
        }
    }
    debug!(address = %shared.address, "Reconnection task stopped");
}

fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}
