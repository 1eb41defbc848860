// Minimal standard library: structural primitives, arithmetic and the
// control primitives the evaluator implements itself.

use crate::ast::Symbol;
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{Arity, BuiltinFunction, ControlOp, Function, Value};
use itertools::Itertools;
use std::sync::Arc;

pub struct StandardLibrary;

impl StandardLibrary {
    /// Create the root environment every program starts from.
    pub fn create_global_environment() -> RuntimeResult<Environment> {
        let env = Environment::new();
        Self::load_list_functions(&env)?;
        Self::load_arithmetic_functions(&env)?;
        Self::load_error_functions(&env)?;
        Self::load_control_functions(&env)?;
        Ok(env)
    }

    fn define_builtin(
        env: &Environment,
        name: &str,
        arity: Arity,
        func: fn(Vec<Value>) -> RuntimeResult<Value>,
    ) -> RuntimeResult<()> {
        env.define(
            Symbol::new(name),
            Value::Function(Function::Builtin(BuiltinFunction {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            })),
        )
    }

    fn load_list_functions(env: &Environment) -> RuntimeResult<()> {
        Self::define_builtin(env, "cons", Arity::Fixed(2), Self::cons)?;
        Self::define_builtin(env, "car", Arity::Fixed(1), Self::car)?;
        Self::define_builtin(env, "cdr", Arity::Fixed(1), Self::cdr)?;
        Self::define_builtin(env, "list", Arity::Variadic(0), |args| Ok(Value::list(args)))?;
        Self::define_builtin(env, "no", Arity::Fixed(1), |args| {
            Ok(Value::from_bool(!args[0].is_truthy()))
        })?;
        Self::define_builtin(env, "is", Arity::Variadic(1), |args| {
            Ok(Value::from_bool(
                args.iter().tuple_windows().all(|(a, b)| a.is_identical(b)),
            ))
        })?;
        Self::define_builtin(env, "acons", Arity::Fixed(1), |args| {
            Ok(Value::from_bool(matches!(args[0], Value::Pair(_))))
        })?;
        Self::define_builtin(env, "type", Arity::Fixed(1), |args| {
            Ok(Value::symbol(args[0].type_name()))
        })?;
        Ok(())
    }

    fn load_arithmetic_functions(env: &Environment) -> RuntimeResult<()> {
        Self::define_builtin(env, "+", Arity::Variadic(0), Self::add)?;
        Self::define_builtin(env, "-", Arity::Variadic(1), Self::subtract)?;
        Self::define_builtin(env, "*", Arity::Variadic(0), Self::multiply)?;
        Self::define_builtin(env, "<", Arity::Variadic(1), |args| Self::compare("<", args, |o| o.is_lt()))?;
        Self::define_builtin(env, ">", Arity::Variadic(1), |args| Self::compare(">", args, |o| o.is_gt()))?;
        Ok(())
    }

    fn load_error_functions(env: &Environment) -> RuntimeResult<()> {
        Self::define_builtin(env, "err", Arity::Variadic(1), Self::raise)?;
        Self::define_builtin(env, "details", Arity::Fixed(1), Self::details)?;
        Ok(())
    }

    fn load_control_functions(env: &Environment) -> RuntimeResult<()> {
        for op in [ControlOp::CallCc, ControlOp::Apply, ControlOp::OnErr] {
            env.define(Symbol::new(op.name()), Value::Function(Function::Control(op)))?;
        }
        Ok(())
    }

    fn cons(mut args: Vec<Value>) -> RuntimeResult<Value> {
        let cdr = args.pop().unwrap_or(Value::Nil);
        let car = args.pop().unwrap_or(Value::Nil);
        Ok(Value::cons(car, cdr))
    }

    fn car(args: Vec<Value>) -> RuntimeResult<Value> {
        match &args[0] {
            Value::Nil => Ok(Value::Nil),
            Value::Pair(pair) => Ok(pair.car.clone()),
            other => Err(Self::type_error("car", "cons", other)),
        }
    }

    fn cdr(args: Vec<Value>) -> RuntimeResult<Value> {
        match &args[0] {
            Value::Nil => Ok(Value::Nil),
            Value::Pair(pair) => Ok(pair.cdr.clone()),
            other => Err(Self::type_error("cdr", "cons", other)),
        }
    }

    /// `(+ ...)` adds numbers, or concatenates when the first argument is a
    /// string.
    fn add(args: Vec<Value>) -> RuntimeResult<Value> {
        if let Some(Value::String(_)) = args.first() {
            let joined = args
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Nil => String::new(),
                    other => other.to_string(),
                })
                .join("");
            return Ok(Value::String(joined));
        }
        args.iter()
            .try_fold(Value::Integer(0), |acc, v| Self::arith("+", &acc, v, i64::checked_add, |a, b| a + b))
    }

    fn subtract(args: Vec<Value>) -> RuntimeResult<Value> {
        match args.as_slice() {
            [only] => Self::arith("-", &Value::Integer(0), only, i64::checked_sub, |a, b| a - b),
            [first, rest @ ..] => rest
                .iter()
                .try_fold(first.clone(), |acc, v| Self::arith("-", &acc, v, i64::checked_sub, |a, b| a - b)),
            [] => Err(RuntimeError::WrongArity {
                procedure: "-".to_string(),
                expected: "at least 1".to_string(),
                actual: 0,
            }),
        }
    }

    fn multiply(args: Vec<Value>) -> RuntimeResult<Value> {
        args.iter()
            .try_fold(Value::Integer(1), |acc, v| Self::arith("*", &acc, v, i64::checked_mul, |a, b| a * b))
    }

    fn arith(
        operation: &str,
        left: &Value,
        right: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> RuntimeResult<Value> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => int_op(*a, *b).map(Value::Integer).ok_or_else(|| {
                RuntimeError::TypeError {
                    operation: operation.to_string(),
                    expected: "result within integer range".to_string(),
                    actual: format!("{} {} {}", a, operation, b),
                }
            }),
            (a, b) => Ok(Value::Float(float_op(
                Self::as_float(operation, a)?,
                Self::as_float(operation, b)?,
            ))),
        }
    }

    fn as_float(operation: &str, value: &Value) -> RuntimeResult<f64> {
        match value {
            Value::Integer(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            other => Err(Self::type_error(operation, "number", other)),
        }
    }

    fn compare(
        operation: &str,
        args: Vec<Value>,
        holds: fn(std::cmp::Ordering) -> bool,
    ) -> RuntimeResult<Value> {
        for (a, b) in args.iter().tuple_windows() {
            let ordering = match (a, b) {
                (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
                (Value::String(x), Value::String(y)) => x.cmp(y),
                (x, y) => Self::as_float(operation, x)?
                    .partial_cmp(&Self::as_float(operation, y)?)
                    .ok_or_else(|| Self::type_error(operation, "comparable number", y))?,
            };
            if !holds(ordering) {
                return Ok(Value::Nil);
            }
        }
        Ok(Value::Boolean(true))
    }

    /// `(err msg . args)` raises a recoverable error.
    fn raise(args: Vec<Value>) -> RuntimeResult<Value> {
        let message = args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .join(" ");
        Err(RuntimeError::Raised(message))
    }

    /// `(details e)` is the message of a caught error.
    fn details(args: Vec<Value>) -> RuntimeResult<Value> {
        match &args[0] {
            Value::Error(e) => Ok(Value::String(e.message.clone())),
            other => Err(Self::type_error("details", "exception", other)),
        }
    }

    fn type_error(operation: &str, expected: &str, actual: &Value) -> RuntimeError {
        RuntimeError::TypeError {
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual: format!("{} (a {})", actual, actual.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let env = StandardLibrary::create_global_environment().unwrap();
        match env.resolve(&Symbol::new(name)).unwrap() {
            Value::Function(Function::Builtin(b)) => {
                b.check_arity(args.len())?;
                (b.func)(args)
            }
            other => panic!("{} is not a builtin: {:?}", name, other),
        }
    }

    #[test]
    fn list_primitives() {
        let pair = call("cons", vec![Value::Integer(1), Value::Nil]).unwrap();
        assert_eq!(pair, Value::list(vec![Value::Integer(1)]));
        assert_eq!(call("car", vec![pair.clone()]).unwrap(), Value::Integer(1));
        assert_eq!(call("cdr", vec![pair.clone()]).unwrap(), Value::Nil);
        assert_eq!(call("car", vec![Value::Nil]).unwrap(), Value::Nil);
        assert_eq!(call("acons", vec![pair]).unwrap(), Value::Boolean(true));
        assert_eq!(call("no", vec![Value::Nil]).unwrap(), Value::Boolean(true));
        assert_eq!(call("type", vec![Value::Integer(1)]).unwrap(), Value::symbol("int"));
        assert!(matches!(
            call("car", vec![Value::Integer(1)]),
            Err(RuntimeError::TypeError { .. })
        ));
    }

    #[test]
    fn is_compares_atoms_by_value_and_pairs_by_identity() {
        let pair = Value::list(vec![Value::Integer(1)]);
        assert_eq!(
            call("is", vec![pair.clone(), pair]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            call(
                "is",
                vec![Value::list(vec![Value::Integer(1)]), Value::list(vec![Value::Integer(1)])]
            )
            .unwrap(),
            Value::Nil
        );
        assert_eq!(
            call("is", vec![Value::symbol("a"), Value::symbol("a")]).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn arithmetic_promotes_to_float() {
        assert_eq!(
            call("+", vec![Value::Integer(1), Value::Integer(2)]).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            call("+", vec![Value::Integer(1), Value::Float(0.5)]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(call("-", vec![Value::Integer(4)]).unwrap(), Value::Integer(-4));
        assert_eq!(
            call("*", vec![Value::Integer(6), Value::Integer(7)]).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            call("+", vec![Value::string("ab"), Value::string("cd")]).unwrap(),
            Value::string("abcd")
        );
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(
            call("+", vec![Value::Integer(i64::MAX), Value::Integer(1)]),
            Err(RuntimeError::TypeError { .. })
        ));
    }

    #[test]
    fn comparisons_chain() {
        let nums = |xs: &[i64]| xs.iter().map(|&x| Value::Integer(x)).collect::<Vec<_>>();
        assert_eq!(call("<", nums(&[1, 2, 3])).unwrap(), Value::Boolean(true));
        assert_eq!(call("<", nums(&[1, 3, 2])).unwrap(), Value::Nil);
        assert_eq!(call(">", nums(&[3, 2])).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn err_raises_and_details_reads_back() {
        let err = call("err", vec![Value::string("bad"), Value::Integer(3)]).unwrap_err();
        assert_eq!(err, RuntimeError::Raised("bad 3".to_string()));
        assert_eq!(
            call("details", vec![err.to_value()]).unwrap(),
            Value::string("Raised: bad 3")
        );
    }
}
