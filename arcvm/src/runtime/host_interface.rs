//! Host Interface
//!
//! Defines the trait that bridges the evaluator (which only knows values) and
//! the host program (which owns the foreign procedures a program may call).

use crate::runtime::foreign::ForeignError;
use crate::runtime::values::{ForeignTarget, Value};

/// The foreign-call capability. The evaluator hands it fully evaluated
/// arguments; the provider picks an overload, converts arguments to the
/// target's types, invokes it and converts the result back.
pub trait ForeignCall: Send + Sync + std::fmt::Debug {
    /// Invoke `target` with `args`.
    fn invoke(&self, target: &ForeignTarget, args: &[Value]) -> Result<Value, ForeignError>;

    /// Descriptors this provider can resolve. The evaluator binds each one in
    /// the global environment as a callable foreign target.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A host with nothing to offer; every foreign call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForeignCalls;

impl ForeignCall for NoForeignCalls {
    fn invoke(&self, target: &ForeignTarget, _args: &[Value]) -> Result<Value, ForeignError> {
        Err(ForeignError::UnknownTarget {
            descriptor: target.descriptor.clone(),
        })
    }
}
