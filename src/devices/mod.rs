//! Built-in device and model catalogue.
//!
//! Devices are identified by the first letter of an element's reference
//! designator. Each device accepts an ordered list of primitive models; the
//! first one is used when an element line gives a bare value instead of a
//! model name.
//!
//! | Letter | Device | Nodes | Refs | Models |
//! |--------|--------|-------|------|--------|
//! | C | Capacitor | 2 | 0 | C |
//! | D | Diode | 2 | 0 | D |
//! | E | VCVS | 4 | 0 | E, EZ |
//! | F | CCCS | 4 | 0 | F |
//! | G | VCCS | 4 | 0 | G, g |
//! | H | CCVS | 4 | 0 | H, HZ |
//! | I | Current source | 2 | 0 | I |
//! | J | JFET | 3 | 0 | J |
//! | K | Coupling factor | 0 | 2 | K |
//! | L | Inductor | 2 | 0 | L |
//! | M | MOSFET | 4 | 0 | M |
//! | N | Nullor | 4 | 0 | N |
//! | O | Operational amplifier | 4 | 0 | OV, OC |
//! | Q | BJT | 4 | 0 | Q |
//! | R | Resistor | 2 | 0 | R, r |
//! | T | Ideal transformer | 4 | 0 | T |
//! | V | Voltage source | 2 | 0 | V |
//! | W | Gyrator | 4 | 0 | W |
//! | X | Sub-circuit instance | * | 0 | - |

mod models;

pub use models::{ModelKind, ModelPrototype, ParamSpec};

/// Name of the reserved ground node.
pub const GROUND_NODE: &str = "0";

/// The frequency-domain (Laplace) variable.
pub const LAPLACE_VARIABLE: &str = "s";

/// Symbols with a fixed meaning that are never renamed or reported as
/// undefined parameters.
pub const RESERVED_SYMBOLS: &[&str] = &[LAPLACE_VARIABLE, "pi"];

/// Check whether `name` is a reserved symbol.
pub fn is_reserved_symbol(name: &str) -> bool {
    RESERVED_SYMBOLS.contains(&name)
}

/// Device kinds, one per element letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    Capacitor,
    Diode,
    Vcvs,
    Cccs,
    Vccs,
    Ccvs,
    CurrentSource,
    Jfet,
    Coupling,
    Inductor,
    Mosfet,
    Nullor,
    OpAmp,
    Bjt,
    Resistor,
    Transformer,
    VoltageSource,
    Gyrator,
    Subcircuit,
}

/// Static description of a device kind.
#[derive(Debug)]
pub struct DevicePrototype {
    pub kind: DeviceKind,
    pub letter: char,
    /// Number of nodes on the element line (`None` for sub-circuit instances)
    pub nodes: Option<usize>,
    /// Number of cross-referenced element names
    pub refs: usize,
    /// Whether a model name or value field is mandatory
    pub value_required: bool,
    /// Acceptable primitive models; the first is the default
    pub models: &'static [ModelKind],
}

use ModelKind as M;

static DEVICES: &[DevicePrototype] = &[
    DevicePrototype { kind: DeviceKind::Capacitor, letter: 'C', nodes: Some(2), refs: 0, value_required: true, models: &[M::C] },
    DevicePrototype { kind: DeviceKind::Diode, letter: 'D', nodes: Some(2), refs: 0, value_required: false, models: &[M::D] },
    DevicePrototype { kind: DeviceKind::Vcvs, letter: 'E', nodes: Some(4), refs: 0, value_required: true, models: &[M::E, M::EZ] },
    DevicePrototype { kind: DeviceKind::Cccs, letter: 'F', nodes: Some(4), refs: 0, value_required: true, models: &[M::F] },
    DevicePrototype { kind: DeviceKind::Vccs, letter: 'G', nodes: Some(4), refs: 0, value_required: true, models: &[M::G, M::Gb] },
    DevicePrototype { kind: DeviceKind::Ccvs, letter: 'H', nodes: Some(4), refs: 0, value_required: true, models: &[M::H, M::HZ] },
    DevicePrototype { kind: DeviceKind::CurrentSource, letter: 'I', nodes: Some(2), refs: 0, value_required: true, models: &[M::I] },
    DevicePrototype { kind: DeviceKind::Jfet, letter: 'J', nodes: Some(3), refs: 0, value_required: false, models: &[M::J] },
    DevicePrototype { kind: DeviceKind::Coupling, letter: 'K', nodes: Some(0), refs: 2, value_required: true, models: &[M::K] },
    DevicePrototype { kind: DeviceKind::Inductor, letter: 'L', nodes: Some(2), refs: 0, value_required: true, models: &[M::L] },
    DevicePrototype { kind: DeviceKind::Mosfet, letter: 'M', nodes: Some(4), refs: 0, value_required: false, models: &[M::M] },
    DevicePrototype { kind: DeviceKind::Nullor, letter: 'N', nodes: Some(4), refs: 0, value_required: false, models: &[M::N] },
    DevicePrototype { kind: DeviceKind::OpAmp, letter: 'O', nodes: Some(4), refs: 0, value_required: true, models: &[M::OV, M::OC] },
    DevicePrototype { kind: DeviceKind::Bjt, letter: 'Q', nodes: Some(4), refs: 0, value_required: false, models: &[M::Q] },
    DevicePrototype { kind: DeviceKind::Resistor, letter: 'R', nodes: Some(2), refs: 0, value_required: true, models: &[M::R, M::Rb] },
    DevicePrototype { kind: DeviceKind::Transformer, letter: 'T', nodes: Some(4), refs: 0, value_required: true, models: &[M::T] },
    DevicePrototype { kind: DeviceKind::VoltageSource, letter: 'V', nodes: Some(2), refs: 0, value_required: true, models: &[M::V] },
    DevicePrototype { kind: DeviceKind::Gyrator, letter: 'W', nodes: Some(4), refs: 0, value_required: true, models: &[M::W] },
    DevicePrototype { kind: DeviceKind::Subcircuit, letter: 'X', nodes: None, refs: 0, value_required: true, models: &[] },
];

impl DeviceKind {
    /// Look up the device for an element reference designator.
    pub fn from_ref_des(ref_des: &str) -> Option<Self> {
        ref_des
            .chars()
            .next()
            .and_then(|c| Self::from_letter(c.to_ascii_uppercase()))
    }

    /// Look up the device for an (upper case) element letter.
    pub fn from_letter(letter: char) -> Option<Self> {
        DEVICES.iter().find(|d| d.letter == letter).map(|d| d.kind)
    }

    /// The static catalogue entry.
    pub fn prototype(self) -> &'static DevicePrototype {
        // DEVICES is ordered like the enum
        &DEVICES[self as usize]
    }

    pub fn letter(self) -> char {
        self.prototype().letter
    }

    /// Default primitive model for elements given only a value.
    pub fn default_model(self) -> Option<ModelKind> {
        self.prototype().models.first().copied()
    }

    /// Check whether `model` may be used with this device.
    pub fn accepts(self, model: ModelKind) -> bool {
        self.prototype().models.contains(&model)
    }

    /// Independent sources drive the circuit with externally given values.
    pub fn is_independent_source(self) -> bool {
        matches!(self, Self::VoltageSource | Self::CurrentSource)
    }

    /// Controlled sources can serve as loop gain references.
    pub fn is_controlled_source(self) -> bool {
        matches!(self, Self::Vcvs | Self::Cccs | Self::Vccs | Self::Ccvs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_enum() {
        for device in DEVICES {
            assert_eq!(device.kind.prototype().letter, device.letter);
        }
    }

    #[test]
    fn test_lookup_by_ref_des() {
        assert_eq!(DeviceKind::from_ref_des("R1"), Some(DeviceKind::Resistor));
        assert_eq!(DeviceKind::from_ref_des("xamp"), Some(DeviceKind::Subcircuit));
        assert_eq!(DeviceKind::from_ref_des("Z1"), None);
        assert_eq!(DeviceKind::Resistor.default_model(), Some(ModelKind::R));
        assert!(DeviceKind::Resistor.accepts(ModelKind::Rb));
        assert!(!DeviceKind::Capacitor.accepts(ModelKind::R));
    }

    #[test]
    fn test_every_model_belongs_to_a_device() {
        for model in ModelKind::ALL {
            assert!(
                DEVICES.iter().any(|d| d.models.contains(model)),
                "model {} unused",
                model.name()
            );
        }
    }
}
