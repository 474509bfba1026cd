// SPDX-License-Identifier: Apache-2.0

use crate::export::resource::{AttributeSet, Resource};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tower::BoxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Counter,
    UpDownCounter,
    ValueRecorder,
    SumObserver,
    UpDownSumObserver,
    ValueObserver,
}

impl InstrumentKind {
    pub fn synchronous(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::UpDownCounter | InstrumentKind::ValueRecorder
        )
    }

    pub fn asynchronous(&self) -> bool {
        !self.synchronous()
    }

    /// Whether the instrument reports values that are summed.
    pub fn adding(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter
                | InstrumentKind::UpDownCounter
                | InstrumentKind::SumObserver
                | InstrumentKind::UpDownSumObserver
        )
    }

    pub fn monotonic(&self) -> bool {
        matches!(self, InstrumentKind::Counter | InstrumentKind::SumObserver)
    }

    /// Observers report running totals rather than increments.
    pub fn precomputed_sum(&self) -> bool {
        self.adding() && self.asynchronous()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumberKind {
    I64,
    F64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    I64(i64),
    F64(f64),
}

impl Number {
    pub fn kind(&self) -> NumberKind {
        match self {
            Number::I64(_) => NumberKind::I64,
            Number::F64(_) => NumberKind::F64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Number::I64(v) => *v as f64,
            Number::F64(v) => *v,
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::I64(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::F64(v)
    }
}

/// Identity of an instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub instrument_kind: InstrumentKind,
    pub number_kind: NumberKind,
    pub description: String,
    pub unit: String,
    pub instrumentation_name: String,
    pub instrumentation_version: Option<String>,
}

impl Descriptor {
    pub fn new(
        name: impl Into<String>,
        instrument_kind: InstrumentKind,
        number_kind: NumberKind,
    ) -> Self {
        Self {
            name: name.into(),
            instrument_kind,
            number_kind,
            description: String::new(),
            unit: String::new(),
            instrumentation_name: String::new(),
            instrumentation_version: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_instrumentation(
        mut self,
        name: impl Into<String>,
        version: Option<String>,
    ) -> Self {
        self.instrumentation_name = name.into();
        self.instrumentation_version = version;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    Sum,
    LastValue,
    MinMaxSumCount,
    Histogram,
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationKind::Sum => "Sum",
            AggregationKind::LastValue => "LastValue",
            AggregationKind::MinMaxSumCount => "MinMaxSumCount",
            AggregationKind::Histogram => "Histogram",
        };
        f.write_str(name)
    }
}

/// The checkpointed state of one instrument for one label set.
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregation {
    Sum(Number),
    LastValue {
        value: Number,
        timestamp: SystemTime,
    },
    MinMaxSumCount {
        min: Number,
        max: Number,
        sum: Number,
        count: u64,
    },
    /// `counts` holds one more entry than `boundaries`, the last bucket being unbounded.
    Histogram {
        sum: Number,
        count: u64,
        boundaries: Vec<f64>,
        counts: Vec<u64>,
    },
}

impl Aggregation {
    pub fn kind(&self) -> AggregationKind {
        match self {
            Aggregation::Sum(_) => AggregationKind::Sum,
            Aggregation::LastValue { .. } => AggregationKind::LastValue,
            Aggregation::MinMaxSumCount { .. } => AggregationKind::MinMaxSumCount,
            Aggregation::Histogram { .. } => AggregationKind::Histogram,
        }
    }
}

/// One exportable metric point.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub descriptor: Arc<Descriptor>,
    pub labels: AttributeSet,
    pub resource: Arc<Resource>,
    pub aggregation: Aggregation,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
}

impl Record {
    pub fn new(
        descriptor: Arc<Descriptor>,
        labels: AttributeSet,
        resource: Arc<Resource>,
        aggregation: Aggregation,
        start_time: SystemTime,
        end_time: SystemTime,
    ) -> Self {
        Self {
            descriptor,
            labels,
            resource,
            aggregation,
            start_time,
            end_time,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Cumulative,
    Delta,
}

/// Chooses the temporality an exporter reports for each instrument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportKindSelector {
    #[default]
    Cumulative,
    Delta,
    /// Report each instrument in its natural temporality: totals for observers,
    /// increments for everything else.
    PassThrough,
    /// Like `PassThrough`, but only sums of observers are reported cumulatively.
    Stateless,
}

impl ExportKindSelector {
    pub fn export_kind_for(
        &self,
        descriptor: &Descriptor,
        aggregation: AggregationKind,
    ) -> ExportKind {
        match self {
            ExportKindSelector::Cumulative => ExportKind::Cumulative,
            ExportKindSelector::Delta => ExportKind::Delta,
            ExportKindSelector::PassThrough => {
                if descriptor.instrument_kind.precomputed_sum() {
                    ExportKind::Cumulative
                } else {
                    ExportKind::Delta
                }
            }
            ExportKindSelector::Stateless => {
                if aggregation == AggregationKind::Sum
                    && descriptor.instrument_kind.precomputed_sum()
                {
                    ExportKind::Cumulative
                } else {
                    ExportKind::Delta
                }
            }
        }
    }
}

/// A source of checkpointed records.
///
/// Implementations hold their own read lock for the whole traversal, so the set cannot
/// change while `for_each` runs. An error returned from the callback stops the traversal
/// and is returned unchanged.
pub trait CheckpointSet: Send + Sync {
    fn for_each(
        &self,
        selector: &ExportKindSelector,
        f: &mut dyn FnMut(&Record) -> Result<(), BoxError>,
    ) -> Result<(), BoxError>;
}

/// A checkpoint set backed by a vector of records.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointSet {
    records: RwLock<Vec<Record>>,
}

impl InMemoryCheckpointSet {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Swaps in a new checkpoint, returning the previous one.
    pub fn replace(&self, records: Vec<Record>) -> Vec<Record> {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, records)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointSet for InMemoryCheckpointSet {
    fn for_each(
        &self,
        _selector: &ExportKindSelector,
        f: &mut dyn FnMut(&Record) -> Result<(), BoxError>,
    ) -> Result<(), BoxError> {
        let guard = self
            .records
            .read()
            .map_err(|e| format!("checkpoint set lock poisoned: {}", e))?;
        for record in guard.iter() {
            f(record)?;
        }
        Ok(())
    }
}
