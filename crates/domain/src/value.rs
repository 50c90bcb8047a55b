//! Decoded register values and the per-cycle value set.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::frame::{RegisterClass, ResponseFrame};
use crate::register::{RegisterId, RegisterSpec, RegisterTable};
use crate::time::Timestamp;

/// Decoded representation of a register payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Number(f64),
    Text(String),
}

impl DecodedValue {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Number(_) => None,
        }
    }
}

impl std::fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Decoded result for one register at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorValue {
    pub class: RegisterClass,
    pub id: RegisterId,
    /// Label of the register in its table.
    pub label: &'static str,
    /// The complete response frame.
    pub raw: Vec<u8>,
    pub value: DecodedValue,
    pub timestamp: Timestamp,
}

impl SensorValue {
    /// Decode `frame` with the rule of `spec`.
    #[must_use]
    pub fn decode(spec: &RegisterSpec, frame: &ResponseFrame, timestamp: Timestamp) -> Self {
        Self {
            class: frame.class,
            id: spec.id,
            label: spec.label,
            raw: frame.bytes.clone(),
            value: spec.decode(frame),
            timestamp,
        }
    }
}

/// Values collected during one poll cycle, keyed by register id.
///
/// Only registers that answered are present; a timed out or malformed
/// register is simply absent.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleValues {
    class: RegisterClass,
    values: BTreeMap<RegisterId, SensorValue>,
}

impl CycleValues {
    #[must_use]
    pub fn new(class: RegisterClass) -> Self {
        Self {
            class,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn class(&self) -> RegisterClass {
        self.class
    }

    pub fn insert(&mut self, value: SensorValue) {
        self.values.insert(value.id, value);
    }

    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<&SensorValue> {
        self.values.get(&id)
    }

    /// Value of the register published under `field`, if it answered.
    #[must_use]
    pub fn field(&self, field: &str) -> Option<&DecodedValue> {
        let spec = RegisterTable::for_class(self.class).by_field(field)?;
        self.values.get(&spec.id).map(|sample| &sample.value)
    }

    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        self.field(field).and_then(DecodedValue::as_number)
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.field(field).and_then(DecodedValue::as_text)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorValue> {
        self.values.values()
    }
}
