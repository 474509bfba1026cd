// SPDX-License-Identifier: Apache-2.0

//! Encoding of exporter input into OTLP protobuf messages.
//!
//! Spans and records are grouped first by resource and then by instrumentation scope,
//! preserving the order in which each group was first seen.

mod attribute;
mod metric;
mod span;

pub use metric::resource_metrics;
pub use span::resource_spans;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn to_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
