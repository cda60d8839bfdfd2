//! Primitive model table.

/// A legal parameter of a primitive model.
#[derive(Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    /// Whether the Laplace variable may appear in the value
    pub laplace: bool,
    /// Value used when neither element nor model supplies one
    pub default: f64,
}

const fn p(name: &'static str, laplace: bool, default: f64) -> ParamSpec {
    ParamSpec {
        name,
        laplace,
        default,
    }
}

/// Primitive model kinds.
///
/// `Gb` and `Rb` are the lower-case models `g` and `r`, the variants that
/// introduce a branch current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelKind {
    C,
    D,
    E,
    EZ,
    F,
    G,
    Gb,
    H,
    HZ,
    I,
    J,
    K,
    L,
    M,
    N,
    OC,
    OV,
    Q,
    R,
    Rb,
    T,
    V,
    W,
}

/// Static description of a primitive model.
#[derive(Debug)]
pub struct ModelPrototype {
    pub kind: ModelKind,
    /// Name as written in netlists (case sensitive)
    pub name: &'static str,
    /// Built-in sub-circuit this model is expanded from; `None` for stamps
    pub expansion: Option<&'static str>,
    /// Suffixes of extra dependent variables, named `<suffix>_<refDes>`
    pub dep_vars: &'static [&'static str],
    pub params: &'static [ParamSpec],
}

const SOURCE_PARAMS: &[ParamSpec] = &[
    p("value", true, 0.0),
    p("noise", false, 0.0),
    p("dc", false, 0.0),
    p("dcvar", false, 0.0),
];

const RESISTOR_PARAMS: &[ParamSpec] = &[
    p("value", true, 0.0),
    p("noisetemp", false, 0.0),
    p("noiseflow", false, 0.0),
    p("dcvar", false, 0.0),
    p("dcvarlot", false, 0.0),
];

const GAIN_PARAMS: &[ParamSpec] = &[p("value", true, 1.0)];

const GAIN_ZO_PARAMS: &[ParamSpec] = &[p("value", true, 1.0), p("zo", true, 0.0)];

static MODELS: &[ModelPrototype] = &[
    ModelPrototype {
        kind: ModelKind::C,
        name: "C",
        expansion: None,
        dep_vars: &[],
        params: &[p("value", false, 0.0), p("vinit", false, 0.0)],
    },
    ModelPrototype {
        kind: ModelKind::D,
        name: "D",
        expansion: Some("D"),
        dep_vars: &[],
        params: &[
            p("ID", false, 1e-3),
            p("n", false, 1.0),
            p("cj", false, 0.0),
            p("rs", false, 0.0),
        ],
    },
    ModelPrototype {
        kind: ModelKind::E,
        name: "E",
        expansion: None,
        dep_vars: &["Io"],
        params: GAIN_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::EZ,
        name: "EZ",
        expansion: None,
        dep_vars: &["Io"],
        params: GAIN_ZO_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::F,
        name: "F",
        expansion: None,
        dep_vars: &["Ii"],
        params: GAIN_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::G,
        name: "G",
        expansion: None,
        dep_vars: &[],
        params: GAIN_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::Gb,
        name: "g",
        expansion: None,
        dep_vars: &["Io"],
        params: GAIN_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::H,
        name: "H",
        expansion: None,
        dep_vars: &["Io", "Ii"],
        params: GAIN_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::HZ,
        name: "HZ",
        expansion: None,
        dep_vars: &["Io", "Ii"],
        params: GAIN_ZO_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::I,
        name: "I",
        expansion: None,
        dep_vars: &[],
        params: SOURCE_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::J,
        name: "J",
        expansion: Some("J"),
        dep_vars: &[],
        params: &[
            p("gm", false, 1e-3),
            p("go", false, 1e-5),
            p("cgs", false, 0.0),
            p("cgd", false, 0.0),
        ],
    },
    ModelPrototype {
        kind: ModelKind::K,
        name: "K",
        expansion: None,
        dep_vars: &[],
        params: &[p("value", false, 0.0)],
    },
    ModelPrototype {
        kind: ModelKind::L,
        name: "L",
        expansion: None,
        dep_vars: &["I"],
        params: &[p("value", false, 0.0), p("iinit", false, 0.0)],
    },
    ModelPrototype {
        kind: ModelKind::M,
        name: "M",
        expansion: Some("M"),
        dep_vars: &[],
        params: &[
            p("gm", false, 1e-3),
            p("gb", false, 0.0),
            p("go", false, 1e-5),
            p("cgs", false, 0.0),
            p("cgd", false, 0.0),
            p("cdb", false, 0.0),
        ],
    },
    ModelPrototype {
        kind: ModelKind::N,
        name: "N",
        expansion: None,
        dep_vars: &["Io"],
        params: &[],
    },
    ModelPrototype {
        kind: ModelKind::OC,
        name: "OC",
        expansion: None,
        dep_vars: &["Io"],
        params: &[
            p("cd", false, 0.0),
            p("cc", false, 0.0),
            p("gd", false, 0.0),
            p("gc", false, 0.0),
            p("av", true, 1e5),
            p("zo", true, 0.0),
        ],
    },
    ModelPrototype {
        kind: ModelKind::OV,
        name: "OV",
        expansion: None,
        dep_vars: &["Io"],
        params: &[p("value", true, 1e5), p("zo", true, 0.0)],
    },
    ModelPrototype {
        kind: ModelKind::Q,
        name: "Q",
        expansion: Some("Q"),
        dep_vars: &[],
        params: &[
            p("gm", false, 40e-3),
            p("beta", false, 100.0),
            p("go", false, 1e-5),
            p("cpi", false, 0.0),
            p("cmu", false, 0.0),
            p("cs", false, 0.0),
        ],
    },
    ModelPrototype {
        kind: ModelKind::R,
        name: "R",
        expansion: None,
        dep_vars: &[],
        params: RESISTOR_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::Rb,
        name: "r",
        expansion: None,
        dep_vars: &["I"],
        params: RESISTOR_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::T,
        name: "T",
        expansion: None,
        dep_vars: &["Io", "Ii"],
        params: &[p("value", false, 1.0)],
    },
    ModelPrototype {
        kind: ModelKind::V,
        name: "V",
        expansion: None,
        dep_vars: &["I"],
        params: SOURCE_PARAMS,
    },
    ModelPrototype {
        kind: ModelKind::W,
        name: "W",
        expansion: None,
        dep_vars: &[],
        params: &[p("value", false, 1.0)],
    },
];

impl ModelKind {
    /// Every primitive model, in table order.
    pub const ALL: &'static [ModelKind] = &[
        Self::C,
        Self::D,
        Self::E,
        Self::EZ,
        Self::F,
        Self::G,
        Self::Gb,
        Self::H,
        Self::HZ,
        Self::I,
        Self::J,
        Self::K,
        Self::L,
        Self::M,
        Self::N,
        Self::OC,
        Self::OV,
        Self::Q,
        Self::R,
        Self::Rb,
        Self::T,
        Self::V,
        Self::W,
    ];

    /// Look up a primitive model by its netlist name.
    pub fn from_name(name: &str) -> Option<Self> {
        MODELS.iter().find(|m| m.name == name).map(|m| m.kind)
    }

    /// The static catalogue entry.
    pub fn prototype(self) -> &'static ModelPrototype {
        &MODELS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.prototype().name
    }

    /// Stamps are handed to the solver as they are.
    pub fn is_stamp(self) -> bool {
        self.prototype().expansion.is_none()
    }

    /// Look up a legal parameter.
    pub fn param(self, name: &str) -> Option<&'static ParamSpec> {
        self.prototype().params.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_enum() {
        for (i, kind) in ModelKind::ALL.iter().enumerate() {
            assert_eq!(MODELS[i].kind, *kind);
            assert_eq!(ModelKind::from_name(kind.name()), Some(*kind));
        }
    }

    #[test]
    fn test_case_sensitive_names() {
        assert_eq!(ModelKind::from_name("r"), Some(ModelKind::Rb));
        assert_eq!(ModelKind::from_name("R"), Some(ModelKind::R));
        assert_eq!(ModelKind::from_name("Z"), None);
    }

    #[test]
    fn test_param_lookup() {
        let value = ModelKind::R.param("value").unwrap();
        assert!(value.laplace);
        assert!(!ModelKind::C.param("value").unwrap().laplace);
        assert!(ModelKind::R.param("bogus").is_none());
        assert!(!ModelKind::M.is_stamp());
        assert!(ModelKind::V.is_stamp());
    }
}
