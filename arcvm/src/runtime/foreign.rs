//! Foreign-call bridge.
//!
//! A [`ForeignRegistry`] maps call-target descriptors to overload sets. Each
//! overload declares the host types of its parameters; resolution picks the
//! first accessible overload whose arity matches and whose parameter types
//! all accept the runtime shape of the arguments. Conversion in both
//! directions is a table over [`HostType`] and [`HostValue`].

use crate::runtime::host_interface::ForeignCall;
use crate::runtime::values::{ForeignTarget, Value};
use indexmap::IndexMap;
use itertools::Itertools;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForeignError {
    #[error("no foreign target named '{descriptor}'")]
    UnknownTarget { descriptor: String },

    #[error("no overload of '{descriptor}' accepts {arity} argument(s) of shape ({shapes})")]
    NoMatchingOverload {
        descriptor: String,
        arity: usize,
        shapes: String,
    },

    #[error("matching overload of '{descriptor}' is not accessible")]
    Inaccessible { descriptor: String },

    #[error("can't convert {value} to {target_type}")]
    Conversion { value: String, target_type: HostType },

    #[error("'{descriptor}' raised: {message}")]
    TargetRaised { descriptor: String, message: String },
}

/// Static type of a foreign parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    Any,
    Bool,
    Int,
    Long,
    Float,
    Double,
    Str,
    List,
    Map,
}

/// A value on the host side of the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    List(Vec<HostValue>),
    Map(IndexMap<String, HostValue>),
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostType::Any => "any",
            HostType::Bool => "bool",
            HostType::Int => "int",
            HostType::Long => "long",
            HostType::Float => "float",
            HostType::Double => "double",
            HostType::Str => "string",
            HostType::List => "list",
            HostType::Map => "map",
        };
        f.write_str(name)
    }
}

impl HostType {
    /// Whether an argument of this runtime shape can be passed where this
    /// type is declared.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (HostType::Any, _) | (HostType::Bool, _) => true,
            (HostType::Int | HostType::Long, Value::Integer(_)) => true,
            (HostType::Float | HostType::Double, Value::Integer(_) | Value::Float(_)) => true,
            (HostType::Str, Value::Nil | Value::String(_) | Value::Symbol(_)) => true,
            (HostType::List, v) => v.is_nil() || v.to_vec().is_ok(),
            (HostType::Map, v) => v.is_nil() || alist_entries(v).is_some(),
            _ => false,
        }
    }

    /// Convert an accepted argument to this type.
    pub fn convert(&self, value: &Value) -> Result<HostValue, ForeignError> {
        let failed = || ForeignError::Conversion {
            value: value.to_string(),
            target_type: *self,
        };
        match (self, value) {
            (HostType::Bool, v) => Ok(HostValue::Bool(v.is_truthy())),
            (_, Value::Nil) if !self.is_primitive() => Ok(HostValue::Null),
            (HostType::Int, Value::Integer(n)) => i32::try_from(*n).map(HostValue::Int).map_err(|_| failed()),
            (HostType::Long, Value::Integer(n)) => Ok(HostValue::Long(*n)),
            (HostType::Float, Value::Integer(n)) => Ok(HostValue::Float(*n as f32)),
            (HostType::Float, Value::Float(x)) => Ok(HostValue::Float(*x as f32)),
            (HostType::Double, Value::Integer(n)) => Ok(HostValue::Double(*n as f64)),
            (HostType::Double, Value::Float(x)) => Ok(HostValue::Double(*x)),
            (HostType::Str | HostType::Any, Value::String(s)) => Ok(HostValue::Str(s.clone())),
            (HostType::Str | HostType::Any, Value::Symbol(s)) => Ok(HostValue::Str(s.to_string())),
            (HostType::List, Value::Pair(_)) => {
                let items = value.to_vec().map_err(|_| failed())?;
                items
                    .iter()
                    .map(|item| HostType::Any.convert(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(HostValue::List)
            }
            (HostType::Map, Value::Pair(_)) => {
                let entries = alist_entries(value).ok_or_else(failed)?;
                let mut map = IndexMap::new();
                for (key, item) in entries {
                    map.insert(key, HostType::Any.convert(&item)?);
                }
                Ok(HostValue::Map(map))
            }
            (HostType::Any, Value::Boolean(b)) => Ok(HostValue::Bool(*b)),
            (HostType::Any, Value::Integer(n)) => Ok(HostValue::Long(*n)),
            (HostType::Any, Value::Float(x)) => Ok(HostValue::Double(*x)),
            (HostType::Any, Value::Pair(_)) => HostType::List.convert(value),
            _ => Err(failed()),
        }
    }

    fn is_primitive(&self) -> bool {
        matches!(
            self,
            HostType::Int | HostType::Long | HostType::Float | HostType::Double
        )
    }
}

/// `((k . v) ...)` with symbol or string keys.
fn alist_entries(value: &Value) -> Option<Vec<(String, Value)>> {
    let items = value.to_vec().ok()?;
    items
        .iter()
        .map(|item| {
            let pair = item.as_pair()?;
            let key = match &pair.car {
                Value::Symbol(s) => s.to_string(),
                Value::String(s) => s.clone(),
                _ => return None,
            };
            Some((key, pair.cdr.clone()))
        })
        .collect()
}

impl HostValue {
    /// Convert a host result back into a runtime value.
    pub fn into_value(self) -> Value {
        match self {
            HostValue::Null | HostValue::Bool(false) => Value::Nil,
            HostValue::Bool(true) => Value::Boolean(true),
            HostValue::Int(n) => Value::Integer(n as i64),
            HostValue::Long(n) => Value::Integer(n),
            HostValue::Float(x) => Value::Float(x as f64),
            HostValue::Double(x) => Value::Float(x),
            HostValue::Str(s) => Value::String(s),
            HostValue::List(items) => Value::list(items.into_iter().map(HostValue::into_value).collect()),
            HostValue::Map(map) => Value::list(
                map.into_iter()
                    .map(|(k, v)| Value::cons(Value::String(k), v.into_value()))
                    .collect(),
            ),
        }
    }
}

pub type ForeignFn = Arc<dyn Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync>;

/// One callable signature of a foreign target.
#[derive(Clone)]
pub struct ForeignOverload {
    pub params: Vec<HostType>,
    pub accessible: bool,
    pub func: ForeignFn,
}

impl ForeignOverload {
    fn matches(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(t, v)| t.accepts(v))
    }
}

impl fmt::Debug for ForeignOverload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignOverload")
            .field("params", &self.params)
            .field("accessible", &self.accessible)
            .finish()
    }
}

/// Table-driven [`ForeignCall`] provider.
#[derive(Debug, Default, Clone)]
pub struct ForeignRegistry {
    targets: IndexMap<String, Vec<ForeignOverload>>,
}

impl ForeignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an overload for `descriptor`. Overloads are tried in registration
    /// order.
    pub fn register<F>(&mut self, descriptor: &str, params: Vec<HostType>, func: F) -> &mut Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        self.targets
            .entry(descriptor.to_string())
            .or_default()
            .push(ForeignOverload {
                params,
                accessible: true,
                func: Arc::new(func),
            });
        self
    }

    /// Declare an overload that exists but may not be called.
    pub fn register_inaccessible(&mut self, descriptor: &str, params: Vec<HostType>) -> &mut Self {
        self.targets
            .entry(descriptor.to_string())
            .or_default()
            .push(ForeignOverload {
                params,
                accessible: false,
                func: Arc::new(|_| Err("inaccessible".to_string())),
            });
        self
    }

    /// Select the overload for `args`.
    pub fn resolve(&self, descriptor: &str, args: &[Value]) -> Result<&ForeignOverload, ForeignError> {
        let overloads = self
            .targets
            .get(descriptor)
            .ok_or_else(|| ForeignError::UnknownTarget {
                descriptor: descriptor.to_string(),
            })?;
        match overloads.iter().find(|o| o.matches(args)) {
            Some(overload) if overload.accessible => Ok(overload),
            Some(_) => Err(ForeignError::Inaccessible {
                descriptor: descriptor.to_string(),
            }),
            None => Err(ForeignError::NoMatchingOverload {
                descriptor: descriptor.to_string(),
                arity: args.len(),
                shapes: args.iter().map(|a| a.type_name()).join(" "),
            }),
        }
    }
}

impl ForeignCall for ForeignRegistry {
    fn invoke(&self, target: &ForeignTarget, args: &[Value]) -> Result<Value, ForeignError> {
        let overload = self.resolve(&target.descriptor, args)?;
        let host_args = overload
            .params
            .iter()
            .zip(args)
            .map(|(t, v)| t.convert(v))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(target = %target.descriptor, arity = args.len(), "invoking foreign target");
        let result = (overload.func)(host_args).map_err(|message| ForeignError::TargetRaised {
            descriptor: target.descriptor.clone(),
            message,
        })?;
        Ok(result.into_value())
    }

    fn targets(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_one;
    use pretty_assertions::assert_eq;

    fn registry() -> ForeignRegistry {
        let mut registry = ForeignRegistry::new();
        registry
            .register("str.len", vec![HostType::Str], |args| match &args[0] {
                HostValue::Str(s) => Ok(HostValue::Long(s.len() as i64)),
                HostValue::Null => Ok(HostValue::Long(0)),
                other => Err(format!("unexpected {:?}", other)),
            })
            .register("math.half", vec![HostType::Int], |args| match args[0] {
                HostValue::Int(n) => Ok(HostValue::Int(n / 2)),
                _ => Err("bad".to_string()),
            })
            .register("math.half", vec![HostType::Double], |args| match args[0] {
                HostValue::Double(x) => Ok(HostValue::Double(x / 2.0)),
                _ => Err("bad".to_string()),
            })
            .register("flag", vec![HostType::Bool], |args| Ok(args[0].clone()))
            .register("fail", vec![], |_| Err("boom".to_string()))
            .register_inaccessible("secret", vec![HostType::Any]);
        registry
    }

    fn call(descriptor: &str, args: Vec<Value>) -> Result<Value, ForeignError> {
        registry().invoke(&ForeignTarget::new(descriptor), &args)
    }

    #[test]
    fn strings_and_symbols_are_equivalent() {
        assert_eq!(call("str.len", vec![Value::string("abc")]), Ok(Value::Integer(3)));
        assert_eq!(call("str.len", vec![Value::symbol("ab")]), Ok(Value::Integer(2)));
        assert_eq!(call("str.len", vec![Value::Nil]), Ok(Value::Integer(0)));
    }

    #[test]
    fn overloads_are_selected_by_runtime_shape() {
        assert_eq!(call("math.half", vec![Value::Integer(9)]), Ok(Value::Integer(4)));
        assert_eq!(call("math.half", vec![Value::Float(9.0)]), Ok(Value::Float(4.5)));
        assert!(matches!(
            call("math.half", vec![Value::string("x")]),
            Err(ForeignError::NoMatchingOverload { arity: 1, .. })
        ));
    }

    #[test]
    fn int_narrowing_overflow_is_a_conversion_error() {
        assert!(matches!(
            call("math.half", vec![Value::Integer(i64::MAX)]),
            Err(ForeignError::Conversion {
                target_type: HostType::Int,
                ..
            })
        ));
    }

    #[test]
    fn booleans_follow_truthiness_and_come_back_as_t_or_nil() {
        assert_eq!(call("flag", vec![Value::Nil]), Ok(Value::Nil));
        assert_eq!(call("flag", vec![Value::Integer(0)]), Ok(Value::Boolean(true)));
    }

    #[test]
    fn failures_carry_a_precise_cause() {
        assert_eq!(
            call("fail", vec![]),
            Err(ForeignError::TargetRaised {
                descriptor: "fail".to_string(),
                message: "boom".to_string()
            })
        );
        assert_eq!(
            call("secret", vec![Value::Nil]),
            Err(ForeignError::Inaccessible {
                descriptor: "secret".to_string()
            })
        );
        assert!(matches!(
            call("missing", vec![]),
            Err(ForeignError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn association_lists_convert_to_maps_and_back() {
        let alist = read_one("((a . 1) (\"b\" . \"two\"))").unwrap();
        assert!(HostType::Map.accepts(&alist));
        let host = HostType::Map.convert(&alist).unwrap();
        let mut expected = IndexMap::new();
        expected.insert("a".to_string(), HostValue::Long(1));
        expected.insert("b".to_string(), HostValue::Str("two".to_string()));
        assert_eq!(host, HostValue::Map(expected));
        assert_eq!(
            host.into_value(),
            read_one("((\"a\" . 1) (\"b\" . \"two\"))").unwrap()
        );
        assert!(!HostType::Map.accepts(&read_one("(1 2)").unwrap()));
    }

    #[test]
    fn lists_convert_elementwise() {
        let list = read_one("(1 x \"y\")").unwrap();
        assert_eq!(
            HostType::List.convert(&list).unwrap(),
            HostValue::List(vec![
                HostValue::Long(1),
                HostValue::Str("x".to_string()),
                HostValue::Str("y".to_string())
            ])
        );
    }
}
