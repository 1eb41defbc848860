// Runtime value system for ARCVM
// Code and data share this representation: the reader produces Values and the
// evaluator walks them.

use crate::ast::{ParamSpec, Symbol};
use crate::runtime::continuation::Continuation;
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use itertools::Itertools;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(Symbol),
    Pair(Arc<Pair>),
    Function(Function),
    Continuation(Arc<Continuation>),
    Error(ErrorValue),
}

/// An immutable cons cell.
#[derive(Debug)]
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

// Long lists would otherwise drop recursively through their cdr chain.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut next = std::mem::replace(&mut self.cdr, Value::Nil);
        while let Value::Pair(pair) = next {
            match Arc::try_unwrap(pair) {
                Ok(mut inner) => next = std::mem::replace(&mut inner.cdr, Value::Nil),
                Err(_) => break,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub kind: &'static str,
    pub message: String,
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Arc::new(Pair { car, cdr }))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::new(name))
    }

    pub fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    /// Falsity is `nil`; truth is canonically `t`.
    pub fn from_bool(b: bool) -> Value {
        if b {
            Value::Boolean(true)
        } else {
            Value::Nil
        }
    }

    pub fn list(items: Vec<Value>) -> Value {
        Self::list_with_tail(items, Value::Nil)
    }

    pub fn list_with_tail(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |cdr, car| Value::cons(car, cdr))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// `nil` or a pair: the shapes a parameter list can be matched against.
    pub fn is_list_shaped(&self) -> bool {
        matches!(self, Value::Nil | Value::Pair(_))
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    /// Collect a proper list into a vector.
    pub fn to_vec(&self) -> RuntimeResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                Value::Nil => return Ok(items),
                Value::Pair(pair) => {
                    items.push(pair.car.clone());
                    cursor = &pair.cdr;
                }
                other => {
                    return Err(RuntimeError::TypeError {
                        operation: "list traversal".to_string(),
                        expected: "proper list".to_string(),
                        actual: format!("list ending in {}", other),
                    })
                }
            }
        }
    }

    /// Length of the proper prefix of a list.
    pub fn list_len(&self) -> usize {
        let mut len = 0;
        let mut cursor = self;
        while let Value::Pair(pair) = cursor {
            len += 1;
            cursor = &pair.cdr;
        }
        len
    }

    /// Identity comparison used by `is`: atoms by value, everything else by
    /// reference.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Pair(a), Value::Pair(b)) => Arc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => self == other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "sym",
            Value::Boolean(_) => "sym",
            Value::Integer(_) => "int",
            Value::Float(_) => "num",
            Value::String(_) => "string",
            Value::Symbol(_) => "sym",
            Value::Pair(_) => "cons",
            Value::Function(_) => "fn",
            Value::Continuation(_) => "continuation",
            Value::Error(_) => "exception",
        }
    }
}

/// Structural equality for data; procedures and continuations compare by
/// identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Pair(_), Value::Pair(_)) => {
                let (mut left, mut right) = (self, other);
                loop {
                    match (left, right) {
                        (Value::Pair(a), Value::Pair(b)) => {
                            if Arc::ptr_eq(a, b) {
                                return true;
                            }
                            if a.car != b.car {
                                return false;
                            }
                            left = &a.cdr;
                            right = &b.cdr;
                        }
                        (a, b) => return a == b,
                    }
                }
            }
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Continuation(a), Value::Continuation(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(true) => write!(f, "t"),
            Value::Boolean(false) => write!(f, "nil"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{:?}", fl),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Pair(_) => {
                let mut items = Vec::new();
                let mut cursor = self;
                while let Value::Pair(pair) = cursor {
                    items.push(pair.car.to_string());
                    cursor = &pair.cdr;
                }
                match cursor {
                    Value::Nil => write!(f, "({})", items.iter().join(" ")),
                    tail => write!(f, "({} . {})", items.iter().join(" "), tail),
                }
            }
            Value::Function(func) => write!(f, "{}", func),
            Value::Continuation(_) => write!(f, "#<continuation>"),
            Value::Error(e) => write!(f, "#<error: {}>", e.message),
        }
    }
}

// --- Procedures ---

#[derive(Clone)]
pub enum Function {
    Closure(Arc<Closure>),
    Builtin(BuiltinFunction),
    Control(ControlOp),
    Foreign(ForeignTarget),
}

impl Function {
    pub fn new_closure(
        name: Option<Symbol>,
        params: ParamSpec,
        body: Value,
        env: Arc<Environment>,
    ) -> Function {
        Function::Closure(Arc::new(Closure {
            name,
            params: Arc::new(params),
            body,
            env,
        }))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Closure(c) => f
                .debug_struct("Closure")
                .field("name", &c.name)
                .field("params", &c.params)
                .finish(),
            Function::Builtin(b) => write!(f, "BuiltinFunction({})", b.name),
            Function::Control(op) => write!(f, "Control({:?})", op),
            Function::Foreign(t) => write!(f, "Foreign({})", t.descriptor),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Closure(c) => match &c.name {
                Some(name) => write!(f, "#<fn {}>", name),
                None => write!(f, "#<fn>"),
            },
            Function::Builtin(b) => write!(f, "#<builtin {}>", b.name),
            Function::Control(op) => write!(f, "#<builtin {}>", op.name()),
            Function::Foreign(t) => write!(f, "#<foreign {}>", t.descriptor),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Function::Closure(a), Function::Closure(b)) => Arc::ptr_eq(a, b),
            (Function::Builtin(a), Function::Builtin(b)) => a == b,
            (Function::Control(a), Function::Control(b)) => a == b,
            (Function::Foreign(a), Function::Foreign(b)) => a == b,
            _ => false,
        }
    }
}

/// A user procedure: parameter tree, body forms and the defining environment.
pub struct Closure {
    pub name: Option<Symbol>,
    pub params: Arc<ParamSpec>,
    pub body: Value,
    pub env: Arc<Environment>,
}

impl Closure {
    /// Name used in diagnostics.
    pub fn label(&self) -> String {
        self.name
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "#<fn>".to_string())
    }
}

pub type BuiltinFn = Arc<dyn Fn(Vec<Value>) -> RuntimeResult<Value> + Send + Sync>;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: String,
    pub arity: Arity,
    pub func: BuiltinFn,
}

impl BuiltinFunction {
    pub fn check_arity(&self, actual: usize) -> RuntimeResult<()> {
        if self.arity.accepts(actual) {
            Ok(())
        } else {
            Err(RuntimeError::WrongArity {
                procedure: self.name.clone(),
                expected: self.arity.to_string(),
                actual,
            })
        }
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl PartialEq for BuiltinFunction {
    fn eq(&self, other: &Self) -> bool {
        // Compare builtin functions by name and arity, not by function pointer
        self.name == other.name && self.arity == other.arity
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arity {
    Fixed(usize),
    Variadic(usize), // Minimum number of arguments
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Fixed(k) => n == k,
            Arity::Variadic(min) => n >= min,
            Arity::Range(min, max) => n >= min && n <= max,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic(n) => write!(f, "at least {}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

/// Primitives that need the live continuation chain rather than just their
/// arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// `(ccc f)`: call `f` with the current continuation
    CallCc,
    /// `(apply f a b ... list)`
    Apply,
    /// `(on-err handler thunk)`
    OnErr,
}

impl ControlOp {
    pub fn name(&self) -> &'static str {
        match self {
            ControlOp::CallCc => "ccc",
            ControlOp::Apply => "apply",
            ControlOp::OnErr => "on-err",
        }
    }
}

/// A host-bound call target, resolved by the foreign-call capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignTarget {
    pub descriptor: String,
}

impl ForeignTarget {
    pub fn new(descriptor: &str) -> Self {
        ForeignTarget {
            descriptor: descriptor.to_string(),
        }
    }
}
