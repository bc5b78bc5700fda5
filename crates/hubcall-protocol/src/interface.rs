//! Capability interface descriptors and overload resolution.
//!
//! A capability interface is described once, as a `const`, and shared by
//! callers and implementors:
//!
//! ```rust
//! use hubcall_protocol::{Interface, MethodSpec, ParamType, Returns};
//!
//! const I32: ParamType = ParamType::Primitive("i32");
//!
//! pub const CALCULATOR: Interface = Interface {
//!     name: "Calculator",
//!     methods: &[
//!         MethodSpec {
//!             name: "increment",
//!             action: 1,
//!             params: &[I32],
//!             returns: Returns::Value(I32),
//!         },
//!     ],
//! };
//!
//! assert!(CALCULATOR.validate().is_ok());
//! ```
//!
//! A call on the wire only carries the method name and the runtime type of
//! each argument ([`ArgType`]). The receiving side picks the declared
//! method with [`Interface::resolve`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Static descriptors
// ---------------------------------------------------------------------------

/// Declared type of a method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// A primitive, named by its Rust spelling (`"i32"`, `"bool"`, ...).
    Primitive(&'static str),
    /// A homogeneous sequence.
    Array(&'static ParamType),
    /// A named reference type. Arguments whose lineage includes this name
    /// are assignable to it.
    Reference(&'static str),
    /// Accepts any argument, including null.
    Any,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Primitive(name) | ParamType::Reference(name) => {
                f.write_str(name)
            }
            ParamType::Array(element) => write!(f, "[{element}]"),
            ParamType::Any => f.write_str("any"),
        }
    }
}

/// What a method hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Nothing. The only shape allowed on channel interfaces.
    Void,
    /// A value of the given type.
    Value(ParamType),
}

/// One method of a capability interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: &'static str,
    /// Compact wire identifier chosen by the interface author. Must be
    /// unique within the interface.
    pub action: u16,
    pub params: &'static [ParamType],
    pub returns: Returns,
}

impl MethodSpec {
    /// Returns `true` if the method has no return value.
    pub fn is_void(&self) -> bool {
        self.returns == Returns::Void
    }
}

impl fmt::Display for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A named set of methods an implementor can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub name: &'static str,
    pub methods: &'static [MethodSpec],
}

impl Interface {
    /// Checks that action codes and signatures are unique.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidInterface` naming the first collision.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for (i, a) in self.methods.iter().enumerate() {
            for b in &self.methods[i + 1..] {
                if a.action == b.action {
                    return Err(self.invalid(format!(
                        "action code {} used by both {a} and {b}",
                        a.action
                    )));
                }
                if a.name == b.name && a.params == b.params {
                    return Err(
                        self.invalid(format!("signature {a} declared twice"))
                    );
                }
            }
        }
        Ok(())
    }

    /// Picks the most specific declared method for a call.
    ///
    /// Candidates must match `method` by name and `args` by count, and
    /// every parameter must accept its argument. Each parameter scores
    /// exact primitive/array match over exact reference match over
    /// assignable match; candidates are compared on these scores left to
    /// right and ties go to the method declared first.
    pub fn resolve(
        &self,
        method: &str,
        args: &[ArgType],
    ) -> Option<&'static MethodSpec> {
        let mut best: Option<(&'static MethodSpec, Vec<u8>)> = None;
        for spec in self.methods {
            if spec.name != method || spec.params.len() != args.len() {
                continue;
            }
            let scores: Vec<u8> = spec
                .params
                .iter()
                .zip(args)
                .map(|(param, arg)| param.score(arg))
                .collect();
            if scores.contains(&NOT_APPLICABLE) {
                continue;
            }
            match &best {
                Some((_, current)) if scores <= *current => {}
                _ => best = Some((spec, scores)),
            }
        }
        best.map(|(spec, _)| spec)
    }

    /// Looks a method up by its action code.
    pub fn method_by_action(&self, action: u16) -> Option<&'static MethodSpec> {
        self.methods.iter().find(|m| m.action == action)
    }

    /// Returns `true` if every method is void.
    pub fn is_all_void(&self) -> bool {
        self.methods.iter().all(MethodSpec::is_void)
    }

    fn invalid(&self, reason: String) -> ProtocolError {
        ProtocolError::InvalidInterface {
            interface: self.name,
            reason,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Runtime argument types
// ---------------------------------------------------------------------------

const NOT_APPLICABLE: u8 = 0;
const ASSIGNABLE: u8 = 1;
const EXACT_REFERENCE: u8 = 2;
const EXACT_PRIMITIVE: u8 = 3;

impl ParamType {
    /// How well an argument fits this parameter. Zero means it doesn't.
    fn score(&self, arg: &ArgType) -> u8 {
        match (self, arg) {
            (ParamType::Any, _) => ASSIGNABLE,
            (ParamType::Primitive(p), ArgType::Primitive { name }) => {
                if *p == name.as_str() {
                    EXACT_PRIMITIVE
                } else {
                    NOT_APPLICABLE
                }
            }
            (ParamType::Array(param), ArgType::Array { element }) => {
                match param.score(element) {
                    NOT_APPLICABLE => NOT_APPLICABLE,
                    EXACT_PRIMITIVE | EXACT_REFERENCE => EXACT_PRIMITIVE,
                    _ => ASSIGNABLE,
                }
            }
            (ParamType::Reference(r), ArgType::Reference { name, supertypes }) => {
                if *r == name.as_str() {
                    EXACT_REFERENCE
                } else if supertypes.iter().any(|s| s == r) {
                    ASSIGNABLE
                } else {
                    NOT_APPLICABLE
                }
            }
            (ParamType::Array(_) | ParamType::Reference(_), ArgType::Null) => {
                ASSIGNABLE
            }
            _ => NOT_APPLICABLE,
        }
    }
}

/// The runtime type of one call argument, as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgType {
    Primitive {
        name: String,
    },
    Array {
        element: Box<ArgType>,
    },
    /// A reference type with the names it can be assigned to.
    Reference {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        supertypes: Vec<String>,
    },
    /// An absent value; fits any reference or array parameter.
    Null,
}

impl ArgType {
    pub fn primitive(name: &str) -> Self {
        ArgType::Primitive { name: name.into() }
    }

    pub fn array(element: ArgType) -> Self {
        ArgType::Array {
            element: Box::new(element),
        }
    }

    pub fn reference(name: &str, supertypes: &[&str]) -> Self {
        ArgType::Reference {
            name: name.into(),
            supertypes: supertypes.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Types that can describe themselves as an [`ArgType`].
///
/// Implemented for primitives, strings, `Vec`, `Option` and
/// `serde_json::Value`. Application types implement it with
/// [`ArgType::reference`]:
///
/// ```rust
/// use hubcall_protocol::{ArgType, WireType};
///
/// struct Circle;
///
/// impl WireType for Circle {
///     fn wire_type() -> ArgType {
///         ArgType::reference("Circle", &["Shape"])
///     }
/// }
/// ```
pub trait WireType {
    /// The type every value of `Self` has.
    fn wire_type() -> ArgType;

    /// The type of this particular value. Differs from
    /// [`wire_type`](Self::wire_type) only for values that can be null.
    fn arg_type(&self) -> ArgType
    where
        Self: Sized,
    {
        Self::wire_type()
    }
}

macro_rules! primitive_wire_type {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireType for $ty {
                fn wire_type() -> ArgType {
                    ArgType::primitive(stringify!($ty))
                }
            }
        )*
    };
}

primitive_wire_type!(
    bool, char, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64
);

impl WireType for String {
    fn wire_type() -> ArgType {
        ArgType::reference("String", &[])
    }
}

impl WireType for &str {
    fn wire_type() -> ArgType {
        String::wire_type()
    }
}

impl WireType for serde_json::Value {
    fn wire_type() -> ArgType {
        ArgType::reference("Value", &[])
    }
}

impl<T: WireType> WireType for Vec<T> {
    fn wire_type() -> ArgType {
        ArgType::array(T::wire_type())
    }
}

impl<T: WireType> WireType for Option<T> {
    fn wire_type() -> ArgType {
        T::wire_type()
    }

    fn arg_type(&self) -> ArgType {
        match self {
            Some(value) => value.arg_type(),
            None => ArgType::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const I32: ParamType = ParamType::Primitive("i32");
    const STRING: ParamType = ParamType::Reference("String");
    const SHAPE: ParamType = ParamType::Reference("Shape");
    const CIRCLE: ParamType = ParamType::Reference("Circle");

    fn circle() -> ArgType {
        ArgType::reference("Circle", &["Shape"])
    }

    const DRAWING: Interface = Interface {
        name: "Drawing",
        methods: &[
            MethodSpec {
                name: "draw",
                action: 1,
                params: &[ParamType::Any],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "draw",
                action: 2,
                params: &[SHAPE],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "draw",
                action: 3,
                params: &[CIRCLE],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "place",
                action: 4,
                params: &[SHAPE, CIRCLE],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "place",
                action: 5,
                params: &[CIRCLE, ParamType::Any],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "scale",
                action: 6,
                params: &[I32],
                returns: Returns::Value(I32),
            },
            MethodSpec {
                name: "scale",
                action: 7,
                params: &[ParamType::Any],
                returns: Returns::Value(I32),
            },
            MethodSpec {
                name: "label",
                action: 8,
                params: &[ParamType::Any],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "label",
                action: 9,
                params: &[STRING],
                returns: Returns::Void,
            },
            MethodSpec {
                name: "sum",
                action: 10,
                params: &[ParamType::Array(&I32)],
                returns: Returns::Value(I32),
            },
        ],
    };

    #[test]
    fn test_validate_accepts_overloads_with_distinct_codes() {
        assert!(DRAWING.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_action_code_returns_error() {
        const BAD: Interface = Interface {
            name: "Bad",
            methods: &[
                MethodSpec {
                    name: "a",
                    action: 1,
                    params: &[],
                    returns: Returns::Void,
                },
                MethodSpec {
                    name: "b",
                    action: 1,
                    params: &[],
                    returns: Returns::Void,
                },
            ],
        };
        let err = BAD.validate().unwrap_err();
        assert!(err.to_string().contains("action code 1"));
    }

    #[test]
    fn test_validate_duplicate_signature_returns_error() {
        const BAD: Interface = Interface {
            name: "Bad",
            methods: &[
                MethodSpec {
                    name: "a",
                    action: 1,
                    params: &[I32],
                    returns: Returns::Void,
                },
                MethodSpec {
                    name: "a",
                    action: 2,
                    params: &[I32],
                    returns: Returns::Value(I32),
                },
            ],
        };
        assert!(matches!(
            BAD.validate(),
            Err(ProtocolError::InvalidInterface { interface: "Bad", .. })
        ));
    }

    #[test]
    fn test_resolve_exact_reference_beats_assignable() {
        let spec = DRAWING.resolve("draw", &[circle()]).unwrap();
        assert_eq!(spec.action, 3);
    }

    #[test]
    fn test_resolve_unrelated_reference_only_fits_any() {
        let text = ArgType::reference("Text", &[]);
        let spec = DRAWING.resolve("draw", &[text]).unwrap();
        assert_eq!(spec.action, 1);
    }

    #[test]
    fn test_resolve_exact_primitive_beats_any() {
        let spec = DRAWING
            .resolve("scale", &[ArgType::primitive("i32")])
            .unwrap();
        assert_eq!(spec.action, 6);
    }

    #[test]
    fn test_resolve_primitive_mismatch_falls_back_to_any() {
        let spec = DRAWING
            .resolve("scale", &[ArgType::primitive("i64")])
            .unwrap();
        assert_eq!(spec.action, 7);
    }

    #[test]
    fn test_resolve_compares_parameters_left_to_right() {
        // place(Shape, Circle) scores [1, 2]; place(Circle, any) scores [2, 1].
        let spec = DRAWING.resolve("place", &[circle(), circle()]).unwrap();
        assert_eq!(spec.action, 5);
    }

    #[test]
    fn test_resolve_equal_scores_pick_first_declared() {
        const TIED: Interface = Interface {
            name: "Tied",
            methods: &[
                MethodSpec {
                    name: "f",
                    action: 1,
                    params: &[ParamType::Any],
                    returns: Returns::Void,
                },
                MethodSpec {
                    name: "f",
                    action: 2,
                    params: &[SHAPE],
                    returns: Returns::Void,
                },
            ],
        };
        let square = ArgType::reference("Square", &["Shape"]);
        assert_eq!(TIED.resolve("f", &[square]).unwrap().action, 1);
    }

    #[test]
    fn test_resolve_null_matches_reference() {
        let spec = DRAWING.resolve("label", &[ArgType::Null]).unwrap();
        // Both overloads accept null equally; the first declared wins.
        assert_eq!(spec.action, 8);

        let spec = DRAWING
            .resolve("label", &[String::wire_type()])
            .unwrap();
        assert_eq!(spec.action, 9);
    }

    #[test]
    fn test_resolve_array_of_matching_element() {
        let spec = DRAWING.resolve("sum", &[Vec::<i32>::wire_type()]).unwrap();
        assert_eq!(spec.action, 10);
        assert!(DRAWING.resolve("sum", &[Vec::<bool>::wire_type()]).is_none());
    }

    #[test]
    fn test_resolve_wrong_arity_returns_none() {
        assert!(DRAWING.resolve("draw", &[]).is_none());
        assert!(DRAWING.resolve("missing", &[circle()]).is_none());
    }

    #[test]
    fn test_null_does_not_fit_primitive() {
        const ONLY_I32: Interface = Interface {
            name: "OnlyI32",
            methods: &[MethodSpec {
                name: "f",
                action: 1,
                params: &[I32],
                returns: Returns::Void,
            }],
        };
        assert!(ONLY_I32.resolve("f", &[ArgType::Null]).is_none());
    }

    #[test]
    fn test_option_arg_type_reports_null_for_none() {
        assert_eq!(None::<String>.arg_type(), ArgType::Null);
        assert_eq!(Some(3i32).arg_type(), ArgType::primitive("i32"));
    }

    #[test]
    fn test_method_spec_display_lists_params() {
        let spec = DRAWING.method_by_action(4).unwrap();
        assert_eq!(spec.to_string(), "place(Shape, Circle)");
    }

    #[test]
    fn test_is_all_void() {
        assert!(!DRAWING.is_all_void());
        const EVENTS: Interface = Interface {
            name: "Events",
            methods: &[MethodSpec {
                name: "notify",
                action: 1,
                params: &[],
                returns: Returns::Void,
            }],
        };
        assert!(EVENTS.is_all_void());
    }
}
