// SPDX-License-Identifier: Apache-2.0

//! Producer-facing data model handed to the exporter.
//!
//! Spans arrive as finished [`trace::SpanSnapshot`]s and metrics as [`metric::Record`]s
//! read out of a [`metric::CheckpointSet`]. Both carry the [`resource::Resource`] that
//! produced them so the encoder can group them on the wire.

pub mod metric;
pub mod resource;
pub mod trace;

pub use metric::{
    Aggregation, AggregationKind, CheckpointSet, Descriptor, ExportKind, ExportKindSelector,
    InMemoryCheckpointSet, InstrumentKind, Number, NumberKind, Record,
};
pub use resource::{AttributeSet, Resource};
pub use trace::{Event, InstrumentationLibrary, Link, SpanSnapshot};
