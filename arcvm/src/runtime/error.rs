// Error handling for the ARCVM runtime

use crate::ast::Symbol;
use crate::runtime::foreign::ForeignError;
use crate::runtime::values::{ErrorValue, Value};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime errors raised while evaluating. Every variant carries the operation
/// and the offending shape so a report can be read without re-running.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Unbound variable: {symbol}")]
    UnboundVariable { symbol: Symbol },

    #[error("Wrong arity in {procedure}: expected {expected} arguments, got {actual}")]
    WrongArity {
        procedure: String,
        expected: String,
        actual: usize,
    },

    #[error("Malformed parameter spec in {procedure}: expected {expected}, got {actual}")]
    MalformedParameterSpec {
        procedure: String,
        expected: String,
        actual: String,
    },

    #[error("Not callable: {operator} (a {type_name})")]
    NonCallableOperator {
        operator: String,
        type_name: &'static str,
    },

    #[error("Foreign call to '{target}' failed: {cause}")]
    ForeignBindingFailure {
        target: String,
        #[source]
        cause: ForeignError,
    },

    #[error("Type error in {operation}: expected {expected}, got {actual}")]
    TypeError {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed {form} form: expected {expected}, got {actual}")]
    MalformedForm {
        form: String,
        expected: String,
        actual: String,
    },

    #[error("Raised: {0}")]
    Raised(String),

    #[error("Step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u64 },

    #[error("Reader error: {0}")]
    ReaderError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RuntimeError {
    /// Whether an `on-err` handler may intercept this error. Resource limits and
    /// broken evaluator invariants always reach the host.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RuntimeError::StepLimitExceeded { .. } | RuntimeError::InternalError(_)
        )
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::UnboundVariable { .. } => "unbound-variable",
            RuntimeError::WrongArity { .. } => "wrong-arity",
            RuntimeError::MalformedParameterSpec { .. } => "malformed-parameter-spec",
            RuntimeError::NonCallableOperator { .. } => "non-callable-operator",
            RuntimeError::ForeignBindingFailure { .. } => "foreign-binding-failure",
            RuntimeError::TypeError { .. } => "type-error",
            RuntimeError::MalformedForm { .. } => "malformed-form",
            RuntimeError::Raised(_) => "raised",
            RuntimeError::StepLimitExceeded { .. } => "step-limit-exceeded",
            RuntimeError::ReaderError(_) => "reader-error",
            RuntimeError::InternalError(_) => "internal-error",
        }
    }

    /// Reify the error so an installed handler can inspect it.
    pub fn to_value(&self) -> Value {
        Value::Error(ErrorValue {
            kind: self.kind(),
            message: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_operation_and_shape() {
        let err = RuntimeError::WrongArity {
            procedure: "f".to_string(),
            expected: "2".to_string(),
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Wrong arity in f: expected 2 arguments, got 3"
        );
        assert_eq!(err.kind(), "wrong-arity");
    }

    #[test]
    fn limits_are_not_recoverable() {
        assert!(!RuntimeError::StepLimitExceeded { limit: 10 }.is_recoverable());
        assert!(RuntimeError::UnboundVariable {
            symbol: Symbol::new("x")
        }
        .is_recoverable());
    }

    #[test]
    fn reified_errors_keep_kind_and_message() {
        let value = RuntimeError::Raised("boom".to_string()).to_value();
        match value {
            Value::Error(e) => {
                assert_eq!(e.kind, "raised");
                assert_eq!(e.message, "Raised: boom");
            }
            other => panic!("expected error value, got {:?}", other),
        }
    }
}
