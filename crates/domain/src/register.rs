//! Register tables — which ids are polled, in what order, and how each
//! response is decoded.
//!
//! A table's order is its cycle order: the successor of an entry is the
//! next entry, and the successor of the last entry is "cycle complete".

use serde::Serialize;

use crate::codec;
use crate::frame::{RegisterClass, ResponseFrame};
use crate::value::DecodedValue;

/// Identifier of a telemetry or identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RegisterId(u16);

impl RegisterId {
    /// Wrap a raw register id.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw register id.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// How a register payload is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRule {
    /// Unsigned 8/16-bit integer.
    Unsigned,
    /// Two's-complement 8/16-bit integer.
    Signed,
    /// One character per payload byte.
    Ascii,
}

/// One entry of a register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub id: RegisterId,
    /// Human-readable label (used for recording rows).
    pub label: &'static str,
    /// Field name in the published JSON body.
    pub field: &'static str,
    pub rule: DecodeRule,
    /// Raw integers are divided by this factor. Ignored for ASCII.
    pub divisor: u16,
}

impl RegisterSpec {
    const fn numeric(
        id: u16,
        label: &'static str,
        field: &'static str,
        rule: DecodeRule,
        divisor: u16,
    ) -> Self {
        Self {
            id: RegisterId::new(id),
            label,
            field,
            rule,
            divisor,
        }
    }

    const fn ascii(id: u16, label: &'static str, field: &'static str) -> Self {
        Self {
            id: RegisterId::new(id),
            label,
            field,
            rule: DecodeRule::Ascii,
            divisor: 1,
        }
    }

    /// Decode a response frame according to this register's rule and
    /// scaling.
    #[must_use]
    pub fn decode(&self, frame: &ResponseFrame) -> DecodedValue {
        let divisor = f64::from(self.divisor.max(1));
        match self.rule {
            DecodeRule::Unsigned => {
                DecodedValue::Number(f64::from(codec::extract_unsigned(&frame.bytes)) / divisor)
            }
            DecodeRule::Signed => {
                DecodedValue::Number(f64::from(codec::extract_signed(&frame.bytes)) / divisor)
            }
            DecodeRule::Ascii => DecodedValue::Text(codec::extract_ascii(&frame.bytes)),
        }
    }
}

/// What follows a register in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    /// Poll this register next.
    Next(RegisterId),
    /// The cycle is complete.
    Complete,
}

/// An ordered, non-empty list of registers of one class.
#[derive(Debug)]
pub struct RegisterTable {
    class: RegisterClass,
    specs: &'static [RegisterSpec],
}

const TELEMETRY_SPECS: &[RegisterSpec] = &[
    RegisterSpec::numeric(0x01, "Engine speed", "rpm", DecodeRule::Unsigned, 1),
    RegisterSpec::numeric(0x02, "Throttle position", "throttle", DecodeRule::Unsigned, 8),
    RegisterSpec::numeric(0x03, "Spark advance", "sparkAdv", DecodeRule::Signed, 16),
    RegisterSpec::numeric(0x04, "Engine temperature", "engineTemp", DecodeRule::Signed, 16),
    RegisterSpec::numeric(0x05, "Air temperature", "airTemp", DecodeRule::Signed, 16),
    RegisterSpec::numeric(0x06, "Atmospheric pressure", "atmPressure", DecodeRule::Unsigned, 1),
    RegisterSpec::numeric(0x07, "Operating time", "opTime", DecodeRule::Unsigned, 1),
    RegisterSpec::numeric(0x08, "Battery voltage", "batteryVoltage", DecodeRule::Unsigned, 16),
];

const IDENTIFICATION_SPECS: &[RegisterSpec] = &[
    RegisterSpec::ascii(0x90, "VIN", "vin"),
    RegisterSpec::ascii(0x91, "ECU drawing number", "ecuDrw"),
    RegisterSpec::ascii(0x92, "ECU hardware version", "ecuHw"),
    RegisterSpec::ascii(0x93, "ECU software version", "ecuSw"),
    RegisterSpec::ascii(0x94, "Calibration", "calibration"),
    RegisterSpec::ascii(0x95, "Homologation code", "homolCode"),
];

/// Telemetry (RLI) registers in cycle order.
pub static TELEMETRY: RegisterTable = RegisterTable::new(RegisterClass::Telemetry, TELEMETRY_SPECS);

/// Identification (ECU) registers in cycle order.
pub static IDENTIFICATION: RegisterTable =
    RegisterTable::new(RegisterClass::Identification, IDENTIFICATION_SPECS);

impl RegisterTable {
    /// Build a table. Panics at compile time for an empty `static`.
    #[must_use]
    pub const fn new(class: RegisterClass, specs: &'static [RegisterSpec]) -> Self {
        assert!(!specs.is_empty(), "register table must not be empty");
        Self { class, specs }
    }

    /// The table polled for `class`.
    #[must_use]
    pub fn for_class(class: RegisterClass) -> &'static Self {
        match class {
            RegisterClass::Telemetry => &TELEMETRY,
            RegisterClass::Identification => &IDENTIFICATION,
        }
    }

    #[must_use]
    pub fn class(&self) -> RegisterClass {
        self.class
    }

    /// The register a cycle starts with.
    #[must_use]
    pub fn first(&self) -> RegisterId {
        self.specs[0].id
    }

    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<&'static RegisterSpec> {
        self.specs.iter().find(|spec| spec.id == id)
    }

    /// Look a register up by its JSON field name.
    #[must_use]
    pub fn by_field(&self, field: &str) -> Option<&'static RegisterSpec> {
        self.specs.iter().find(|spec| spec.field == field)
    }

    /// All registers in cycle order.
    pub fn specs(&self) -> impl Iterator<Item = &'static RegisterSpec> {
        self.specs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The register polled after `id`.
    ///
    /// An id that is not part of the table restarts the table from its
    /// first entry.
    #[must_use]
    pub fn successor(&self, id: RegisterId) -> Successor {
        match self.specs.iter().position(|spec| spec.id == id) {
            Some(index) => self
                .specs
                .get(index + 1)
                .map_or(Successor::Complete, |next| Successor::Next(next.id)),
            None => Successor::Next(self.first()),
        }
    }
}
