// SPDX-License-Identifier: Apache-2.0

//! The producer-facing exporter.
//!
//! An [`Exporter`] wraps a [`Driver`] with a start/shutdown lifecycle and turns a
//! [`CheckpointSet`] into a metrics batch. It holds no data of its own: every batch is
//! handed to the driver once, and a failed batch is reported to the caller and dropped.

use crate::export::metric::{
    AggregationKind, CheckpointSet, Descriptor, ExportKind, ExportKindSelector, Record,
};
use crate::export::trace::SpanSnapshot;
use crate::exporters::otlp::LifecycleState;
use crate::exporters::otlp::context::ExportContext;
use crate::exporters::otlp::driver::Driver;
use crate::exporters::otlp::errors::ExporterError;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub struct Exporter {
    driver: Box<dyn Driver>,
    lifecycle: Mutex<LifecycleState>,
    selector: ExportKindSelector,
}

impl Exporter {
    /// Builds an exporter and starts its driver.
    pub async fn new<D: Driver + 'static>(
        ctx: &ExportContext,
        driver: D,
    ) -> Result<Self, ExporterError> {
        let exporter = Self::new_unstarted(driver);
        exporter.start(ctx).await?;
        Ok(exporter)
    }

    /// Builds an exporter that must be started with [`Exporter::start`].
    pub fn new_unstarted<D: Driver + 'static>(driver: D) -> Self {
        Self {
            driver: Box::new(driver),
            lifecycle: Mutex::new(LifecycleState::NotStarted),
            selector: ExportKindSelector::default(),
        }
    }

    pub fn with_export_kind_selector(mut self, selector: ExportKindSelector) -> Self {
        self.selector = selector;
        self
    }

    fn lifecycle(&self) -> MutexGuard<'_, LifecycleState> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        *self.lifecycle()
    }

    pub async fn start(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        {
            let mut lifecycle = self.lifecycle();
            if *lifecycle != LifecycleState::NotStarted {
                return Err(ExporterError::AlreadyStarted);
            }
            *lifecycle = LifecycleState::Started;
        }
        self.driver.start(ctx).await?;
        info!("Exporter started");
        Ok(())
    }

    /// Stops the driver. Only the first call after a successful start does any work.
    pub async fn shutdown(&self, ctx: &ExportContext) -> Result<(), ExporterError> {
        {
            let mut lifecycle = self.lifecycle();
            if *lifecycle != LifecycleState::Started {
                return Ok(());
            }
            *lifecycle = LifecycleState::Stopped;
        }
        self.driver.stop(ctx).await?;
        info!("Exporter stopped");
        Ok(())
    }

    pub async fn export_spans(
        &self,
        ctx: &ExportContext,
        spans: &[SpanSnapshot],
    ) -> Result<(), ExporterError> {
        if spans.is_empty() {
            return Ok(());
        }
        self.driver.export_traces(ctx, spans).await
    }

    /// Reads every record out of `checkpoint_set` and sends them as one batch.
    ///
    /// The set's lock is released before anything is sent.
    pub async fn export(
        &self,
        ctx: &ExportContext,
        checkpoint_set: &dyn CheckpointSet,
    ) -> Result<(), ExporterError> {
        let mut records: Vec<Record> = Vec::new();
        checkpoint_set
            .for_each(&self.selector, &mut |record| {
                records.push(record.clone());
                Ok(())
            })
            .map_err(ExporterError::Iteration)?;

        if records.is_empty() {
            debug!("Checkpoint set is empty, nothing to export");
            return Ok(());
        }
        self.driver
            .export_metrics(ctx, &records, &self.selector)
            .await
    }

    pub fn export_kind_for(
        &self,
        descriptor: &Descriptor,
        aggregation: AggregationKind,
    ) -> ExportKind {
        self.selector.export_kind_for(descriptor, aggregation)
    }
}
