// SPDX-License-Identifier: Apache-2.0

use crate::export::resource::Resource;
use opentelemetry::KeyValue;
use opentelemetry::trace::{SpanContext, SpanId, SpanKind, Status};
use std::sync::Arc;
use std::time::SystemTime;

/// Name and version of the library that recorded a span or instrument.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstrumentationLibrary {
    pub name: String,
    pub version: Option<String>,
}

impl InstrumentationLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A timestamped annotation recorded on a span.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub name: String,
    pub timestamp: SystemTime,
    pub attributes: Vec<KeyValue>,
    pub dropped_attributes_count: u32,
}

/// A reference from a span to another span, possibly in a different trace.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub span_context: SpanContext,
    pub attributes: Vec<KeyValue>,
    pub dropped_attributes_count: u32,
}

/// An immutable copy of a finished span, ready for export.
#[derive(Clone, Debug)]
pub struct SpanSnapshot {
    pub span_context: SpanContext,
    pub parent_span_id: SpanId,
    pub span_kind: SpanKind,
    pub name: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Vec<KeyValue>,
    pub message_events: Vec<Event>,
    pub links: Vec<Link>,
    pub status: Status,
    pub has_remote_parent: bool,
    pub dropped_attribute_count: u32,
    pub dropped_message_event_count: u32,
    pub dropped_link_count: u32,
    pub child_span_count: u32,
    pub resource: Option<Arc<Resource>>,
    pub instrumentation_library: InstrumentationLibrary,
}

impl SpanSnapshot {
    /// A root internal span named `name` that started and ended now.
    pub fn new(name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.into(),
            start_time: now,
            end_time: now,
            ..Default::default()
        }
    }
}

impl Default for SpanSnapshot {
    fn default() -> Self {
        Self {
            span_context: SpanContext::empty_context(),
            parent_span_id: SpanId::INVALID,
            span_kind: SpanKind::Internal,
            name: String::new(),
            start_time: SystemTime::UNIX_EPOCH,
            end_time: SystemTime::UNIX_EPOCH,
            attributes: Vec::new(),
            message_events: Vec::new(),
            links: Vec::new(),
            status: Status::Unset,
            has_remote_parent: false,
            dropped_attribute_count: 0,
            dropped_message_event_count: 0,
            dropped_link_count: 0,
            child_span_count: 0,
            resource: None,
            instrumentation_library: InstrumentationLibrary::default(),
        }
    }
}
