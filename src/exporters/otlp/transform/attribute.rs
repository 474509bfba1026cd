// SPDX-License-Identifier: Apache-2.0

use crate::export::resource::Resource;
use crate::export::trace::InstrumentationLibrary;
use opentelemetry::{Array, KeyValue, Value};
use opentelemetry_proto::tonic::common::v1::{
    AnyValue, ArrayValue, InstrumentationScope, KeyValue as ProtoKeyValue, any_value,
};
use opentelemetry_proto::tonic::resource::v1::Resource as ProtoResource;

pub(crate) fn key_values<'a, I: IntoIterator<Item = &'a KeyValue>>(
    attributes: I,
) -> Vec<ProtoKeyValue> {
    attributes
        .into_iter()
        .map(|kv| ProtoKeyValue {
            key: kv.key.as_str().to_string(),
            value: Some(any_value(&kv.value)),
        })
        .collect()
}

#[allow(unreachable_patterns)]
fn any_value(value: &Value) -> AnyValue {
    let v = match value {
        Value::Bool(b) => any_value::Value::BoolValue(*b),
        Value::I64(i) => any_value::Value::IntValue(*i),
        Value::F64(f) => any_value::Value::DoubleValue(*f),
        Value::String(s) => any_value::Value::StringValue(s.as_str().to_string()),
        Value::Array(a) => any_value::Value::ArrayValue(array_value(a)),
        other => any_value::Value::StringValue(other.as_str().into_owned()),
    };
    AnyValue { value: Some(v) }
}

#[allow(unreachable_patterns)]
fn array_value(array: &Array) -> ArrayValue {
    let values = match array {
        Array::Bool(v) => v
            .iter()
            .map(|b| wrap(any_value::Value::BoolValue(*b)))
            .collect(),
        Array::I64(v) => v
            .iter()
            .map(|i| wrap(any_value::Value::IntValue(*i)))
            .collect(),
        Array::F64(v) => v
            .iter()
            .map(|f| wrap(any_value::Value::DoubleValue(*f)))
            .collect(),
        Array::String(v) => v
            .iter()
            .map(|s| wrap(any_value::Value::StringValue(s.as_str().to_string())))
            .collect(),
        _ => vec![],
    };
    ArrayValue { values }
}

fn wrap(v: any_value::Value) -> AnyValue {
    AnyValue { value: Some(v) }
}

pub(crate) fn resource(resource: Option<&Resource>) -> Option<ProtoResource> {
    resource.map(|r| ProtoResource {
        attributes: key_values(r.attributes().iter()),
        ..Default::default()
    })
}

pub(crate) fn scope(library: &InstrumentationLibrary) -> Option<InstrumentationScope> {
    if library.name.is_empty() && library.version.is_none() {
        return None;
    }
    Some(InstrumentationScope {
        name: library.name.clone(),
        version: library.version.clone().unwrap_or_default(),
        ..Default::default()
    })
}
