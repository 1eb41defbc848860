use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::Value;
use std::fmt;
use std::sync::Arc;

// --- Symbol ---

#[derive(Debug, PartialEq, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub Arc<str>);

impl Symbol {
    pub fn new(s: &str) -> Self {
        Symbol(Arc::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed code is plain data: literals, symbols and cons pairs.
pub type Expression = Value;

// --- Parameter lists (fn params, let patterns) ---

/// One element of a parameter list.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `name`
    Symbol(Symbol),
    /// `(o name default)`; a missing default means `nil`
    Optional { name: Symbol, default: Expression },
    /// Any other list: the paired argument is destructured against it
    Nested(Arc<ParamSpec>),
}

/// A parameter list: positional elements plus an optional dotted rest name.
///
/// The tree maps onto the binding states as follows: an exhausted spec with no
/// `rest` is `Empty`, an exhausted spec with a `rest` is `Rest(name)`, and each
/// positional element is a `Symbol`, `Optional` or `Nested` node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamSpec {
    pub params: Vec<Param>,
    pub rest: Option<Symbol>,
}

const OPTIONAL_MARKER: &str = "o";

impl ParamSpec {
    /// Parse a parameter list as written in `fn`, `def` and `with`.
    /// `procedure` names the form or procedure in error reports.
    pub fn parse(procedure: &str, params: &Value) -> RuntimeResult<ParamSpec> {
        let mut spec = ParamSpec::default();
        let mut cursor = params.clone();
        loop {
            match cursor {
                Value::Nil => return Ok(spec),
                Value::Symbol(name) => {
                    spec.rest = Some(name);
                    return Ok(spec);
                }
                Value::Pair(pair) => {
                    spec.params.push(Param::parse(procedure, &pair.car)?);
                    cursor = pair.cdr.clone();
                }
                other => {
                    return Err(RuntimeError::MalformedParameterSpec {
                        procedure: procedure.to_string(),
                        expected: "symbol, (o name default) or parameter list".to_string(),
                        actual: other.to_string(),
                    })
                }
            }
        }
    }

    /// A spec binding exactly one parameter element (used by `let`).
    pub fn single(param: Param) -> ParamSpec {
        ParamSpec {
            params: vec![param],
            rest: None,
        }
    }

    /// Human readable argument count accepted by this spec, for arity errors.
    pub fn arity(&self) -> String {
        let optional = self
            .params
            .iter()
            .filter(|p| matches!(p, Param::Optional { .. }))
            .count();
        let required = self.params.len() - optional;
        match (&self.rest, optional) {
            (Some(_), _) => format!("at least {}", required),
            (None, 0) => required.to_string(),
            (None, n) => format!("{} to {}", required, required + n),
        }
    }
}

impl Param {
    pub fn parse(procedure: &str, param: &Value) -> RuntimeResult<Param> {
        match param {
            Value::Symbol(name) => Ok(Param::Symbol(name.clone())),
            Value::Pair(_) => match Self::parse_optional(procedure, param)? {
                Some(optional) => Ok(optional),
                None => Ok(Param::Nested(Arc::new(ParamSpec::parse(procedure, param)?))),
            },
            other => Err(RuntimeError::MalformedParameterSpec {
                procedure: procedure.to_string(),
                expected: "symbol, (o name default) or parameter list".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    fn parse_optional(procedure: &str, param: &Value) -> RuntimeResult<Option<Param>> {
        let items = match param.to_vec() {
            Ok(items) => items,
            Err(_) => return Ok(None),
        };
        match items.as_slice() {
            [Value::Symbol(marker), rest @ ..] if marker.as_str() == OPTIONAL_MARKER => match rest {
                [Value::Symbol(name)] => Ok(Some(Param::Optional {
                    name: name.clone(),
                    default: Value::Nil,
                })),
                [Value::Symbol(name), default] => Ok(Some(Param::Optional {
                    name: name.clone(),
                    default: default.clone(),
                })),
                _ => Err(RuntimeError::MalformedParameterSpec {
                    procedure: procedure.to_string(),
                    expected: "(o name) or (o name default)".to_string(),
                    actual: param.to_string(),
                }),
            },
            _ => Ok(None),
        }
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (true, Some(rest)) = (self.params.is_empty(), &self.rest) {
            return write!(f, "{}", rest);
        }
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match param {
                Param::Symbol(name) => write!(f, "{}", name)?,
                Param::Optional { name, default } => write!(f, "(o {} {})", name, default)?,
                Param::Nested(spec) => write!(f, "{}", spec)?,
            }
        }
        if let Some(rest) = &self.rest {
            write!(f, " . {}", rest)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_one;

    fn spec(src: &str) -> ParamSpec {
        ParamSpec::parse("f", &read_one(src).unwrap()).unwrap()
    }

    #[test]
    fn parses_symbols_optionals_nested_and_rest() {
        let parsed = spec("(a (o b 99) (c d) . more)");
        assert_eq!(parsed.params.len(), 3);
        assert_eq!(parsed.params[0], Param::Symbol(Symbol::new("a")));
        assert_eq!(
            parsed.params[1],
            Param::Optional {
                name: Symbol::new("b"),
                default: Value::Integer(99)
            }
        );
        assert!(matches!(parsed.params[2], Param::Nested(_)));
        assert_eq!(parsed.rest, Some(Symbol::new("more")));
    }

    #[test]
    fn bare_symbol_is_rest_only() {
        let parsed = spec("args");
        assert!(parsed.params.is_empty());
        assert_eq!(parsed.rest, Some(Symbol::new("args")));
        assert_eq!(parsed.arity(), "at least 0");
    }

    #[test]
    fn optional_without_default_defaults_to_nil() {
        let parsed = spec("((o x))");
        assert_eq!(
            parsed.params[0],
            Param::Optional {
                name: Symbol::new("x"),
                default: Value::Nil
            }
        );
    }

    #[test]
    fn rejects_literals_in_parameter_position() {
        let err = ParamSpec::parse("f", &read_one("(a 3)").unwrap()).unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedParameterSpec { .. }));
    }

    #[test]
    fn errors_name_the_procedure() {
        let err = ParamSpec::parse("area", &read_one("(w ((o h 1 2)))").unwrap()).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MalformedParameterSpec {
                procedure: "area".to_string(),
                expected: "(o name) or (o name default)".to_string(),
                actual: "(o h 1 2)".to_string(),
            }
        );
        let err = Param::parse("let", &Value::Integer(3)).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MalformedParameterSpec { ref procedure, .. } if procedure == "let"
        ));
    }

    #[test]
    fn arity_descriptions() {
        assert_eq!(spec("(a b)").arity(), "2");
        assert_eq!(spec("(a (o b))").arity(), "1 to 2");
        assert_eq!(spec("(a . r)").arity(), "at least 1");
        assert_eq!(spec("()").arity(), "0");
    }

    #[test]
    fn displays_round_trip_shape() {
        assert_eq!(spec("(a (o b 1) (c) . r)").to_string(), "(a (o b 1) (c) . r)");
    }
}
