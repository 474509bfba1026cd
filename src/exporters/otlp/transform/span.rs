// SPDX-License-Identifier: Apache-2.0

use crate::export::trace::{Event, InstrumentationLibrary, Link, SpanSnapshot};
use crate::exporters::otlp::transform::attribute::{key_values, resource, scope};
use crate::exporters::otlp::transform::to_nanos;
use opentelemetry::trace::{SpanId, SpanKind, Status};
use opentelemetry_proto::tonic::trace::v1::span::{
    Event as ProtoEvent, Link as ProtoLink, SpanKind as ProtoSpanKind,
};
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{
    ResourceSpans, ScopeSpans, Span, Status as ProtoStatus,
};
use std::collections::HashMap;

// Bits 8 and 9 of the OTLP span flags record whether the parent was remote.
const CONTEXT_HAS_IS_REMOTE: u32 = 0x100;
const CONTEXT_IS_REMOTE: u32 = 0x200;

/// Groups spans by resource and instrumentation library.
pub fn resource_spans(spans: &[SpanSnapshot]) -> Vec<ResourceSpans> {
    let mut out: Vec<ResourceSpans> = Vec::new();
    let mut by_resource: HashMap<Option<String>, usize> = HashMap::new();
    let mut by_scope: HashMap<(usize, &InstrumentationLibrary), usize> = HashMap::new();

    for sd in spans {
        let key = sd.resource.as_ref().map(|r| r.encoded());
        let ri = *by_resource.entry(key).or_insert_with(|| {
            out.push(ResourceSpans {
                resource: resource(sd.resource.as_deref()),
                ..Default::default()
            });
            out.len() - 1
        });

        let rs = &mut out[ri];
        let si = *by_scope
            .entry((ri, &sd.instrumentation_library))
            .or_insert_with(|| {
                rs.scope_spans.push(ScopeSpans {
                    scope: scope(&sd.instrumentation_library),
                    ..Default::default()
                });
                rs.scope_spans.len() - 1
            });

        rs.scope_spans[si].spans.push(span(sd));
    }

    out
}

fn span(sd: &SpanSnapshot) -> Span {
    let ctx = &sd.span_context;
    let parent_span_id = if sd.parent_span_id == SpanId::INVALID {
        vec![]
    } else {
        sd.parent_span_id.to_bytes().to_vec()
    };
    let mut flags = ctx.trace_flags().to_u8() as u32 | CONTEXT_HAS_IS_REMOTE;
    if sd.has_remote_parent {
        flags |= CONTEXT_IS_REMOTE;
    }

    Span {
        trace_id: ctx.trace_id().to_bytes().to_vec(),
        span_id: ctx.span_id().to_bytes().to_vec(),
        trace_state: ctx.trace_state().header(),
        parent_span_id,
        flags,
        name: sd.name.clone(),
        kind: span_kind(&sd.span_kind) as i32,
        start_time_unix_nano: to_nanos(sd.start_time),
        end_time_unix_nano: to_nanos(sd.end_time),
        attributes: key_values(&sd.attributes),
        dropped_attributes_count: sd.dropped_attribute_count,
        events: sd.message_events.iter().map(event).collect(),
        dropped_events_count: sd.dropped_message_event_count,
        links: sd.links.iter().map(link).collect(),
        dropped_links_count: sd.dropped_link_count,
        status: Some(status(&sd.status)),
    }
}

fn span_kind(kind: &SpanKind) -> ProtoSpanKind {
    match kind {
        SpanKind::Internal => ProtoSpanKind::Internal,
        SpanKind::Server => ProtoSpanKind::Server,
        SpanKind::Client => ProtoSpanKind::Client,
        SpanKind::Producer => ProtoSpanKind::Producer,
        SpanKind::Consumer => ProtoSpanKind::Consumer,
    }
}

fn status(status: &Status) -> ProtoStatus {
    match status {
        Status::Unset => ProtoStatus {
            message: String::new(),
            code: StatusCode::Unset as i32,
        },
        Status::Ok => ProtoStatus {
            message: String::new(),
            code: StatusCode::Ok as i32,
        },
        Status::Error { description } => ProtoStatus {
            message: description.to_string(),
            code: StatusCode::Error as i32,
        },
    }
}

fn event(e: &Event) -> ProtoEvent {
    ProtoEvent {
        time_unix_nano: to_nanos(e.timestamp),
        name: e.name.clone(),
        attributes: key_values(&e.attributes),
        dropped_attributes_count: e.dropped_attributes_count,
    }
}

fn link(l: &Link) -> ProtoLink {
    let ctx = &l.span_context;
    ProtoLink {
        trace_id: ctx.trace_id().to_bytes().to_vec(),
        span_id: ctx.span_id().to_bytes().to_vec(),
        trace_state: ctx.trace_state().header(),
        attributes: key_values(&l.attributes),
        dropped_attributes_count: l.dropped_attributes_count,
        flags: ctx.trace_flags().to_u8() as u32 | CONTEXT_HAS_IS_REMOTE | CONTEXT_IS_REMOTE,
    }
}
