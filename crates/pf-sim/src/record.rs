//! Per-step records of logged attributes.

use std::sync::{Arc, Mutex, PoisonError};

use pf_core::{AttributeStore, AttributeValue, Complex, CoreResult, Real};
use serde::Serialize;

/// Value of one logged attribute. Complex numbers are `[re, im]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordData {
    Real(Real),
    Complex([Real; 2]),
    RealVector(Vec<Real>),
    ComplexVector(Vec<[Real; 2]>),
}

impl RecordData {
    /// Convert an attribute cell. Source stamps are not recorded.
    pub fn from_value(value: &AttributeValue) -> Option<Self> {
        let pair = |z: &Complex| [z.re, z.im];
        match value {
            AttributeValue::Real(v) => Some(RecordData::Real(*v)),
            AttributeValue::Complex(z) => Some(RecordData::Complex(pair(z))),
            AttributeValue::RealVector(v) => Some(RecordData::RealVector(v.iter().copied().collect())),
            AttributeValue::ComplexVector(v) => {
                Some(RecordData::ComplexVector(v.iter().map(pair).collect()))
            }
            AttributeValue::Source(_) => None,
        }
    }

    pub fn as_real(&self) -> Option<Real> {
        match self {
            RecordData::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<Complex> {
        match self {
            RecordData::Complex([re, im]) => Some(Complex::new(*re, *im)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordValue {
    pub owner: String,
    pub name: String,
    pub value: RecordData,
}

/// Logged attribute values after one completed step, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: u64,
    pub time: Real,
    pub values: Vec<RecordValue>,
}

impl StepRecord {
    pub(crate) fn capture(attrs: &AttributeStore, step: u64, time: Real) -> CoreResult<Self> {
        let mut values = Vec::new();
        for id in attrs.logged() {
            let Some(value) = RecordData::from_value(&attrs.snapshot(id)?) else {
                continue;
            };
            let (owner, name) = attrs.describe(id).unwrap_or(("?", "?"));
            values.push(RecordValue {
                owner: owner.to_string(),
                name: name.to_string(),
                value,
            });
        }
        Ok(Self { step, time, values })
    }

    pub fn get(&self, owner: &str, name: &str) -> Option<&RecordData> {
        self.values
            .iter()
            .find(|v| v.owner == owner && v.name == name)
            .map(|v| &v.value)
    }
}

/// Receives a record after every completed step.
///
/// Called on the thread that drives the simulation, between steps.
pub trait StepObserver: Send {
    fn on_step(&mut self, record: &StepRecord);
}

impl<F> StepObserver for F
where
    F: FnMut(&StepRecord) + Send,
{
    fn on_step(&mut self, record: &StepRecord) {
        self(record)
    }
}

/// In-memory observer; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordCollector {
    records: Arc<Mutex<Vec<StepRecord>>>,
}

impl RecordCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Complex series of one attribute across all collected steps.
    pub fn complex_series(&self, owner: &str, name: &str) -> Vec<Complex> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|r| r.get(owner, name).and_then(RecordData::as_complex))
            .collect()
    }
}

impl StepObserver for RecordCollector {
    fn on_step(&mut self, record: &StepRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
