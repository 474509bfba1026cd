// SPDX-License-Identifier: Apache-2.0

use opentelemetry::KeyValue;

/// An ordered set of attributes with unique keys.
///
/// Keys are kept sorted so two sets built from the same pairs in a different order
/// compare equal and share an [`AttributeSet::encoded`] key. When a key repeats, the
/// last value wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeSet {
    attributes: Vec<KeyValue>,
}

impl AttributeSet {
    pub fn new<I: IntoIterator<Item = KeyValue>>(attributes: I) -> Self {
        let mut deduped: Vec<KeyValue> = Vec::new();
        for kv in attributes {
            match deduped.iter_mut().find(|e| e.key == kv.key) {
                Some(existing) => existing.value = kv.value,
                None => deduped.push(kv),
            }
        }
        deduped.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        Self {
            attributes: deduped,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }

    pub fn as_slice(&self) -> &[KeyValue] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Canonical string form used as a grouping key.
    pub fn encoded(&self) -> String {
        self.attributes
            .iter()
            .map(|kv| format!("{}={:?}", kv.key.as_str(), kv.value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Describes the entity producing telemetry, e.g. a service instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    attributes: AttributeSet,
}

impl Resource {
    pub fn new<I: IntoIterator<Item = KeyValue>>(attributes: I) -> Self {
        Self {
            attributes: AttributeSet::new(attributes),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn encoded(&self) -> String {
        self.attributes.encoded()
    }
}
