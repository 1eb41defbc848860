// ARCVM Library
// Continuation-passing evaluator core for an Arc-family Lisp
pub mod ast;
pub mod config;
pub mod reader;
pub mod runtime;

// Re-export the reader entry points and the core data types.
pub use ast::{Expression, Param, ParamSpec, Symbol};
pub use config::{ArcvmConfig, ConfigError, EvaluatorConfig, LoggingConfig};
pub use reader::{read, read_one, ReaderError};
pub use runtime::{
    Continuation, Environment, ExecutionContext, Evaluator, ForeignCall, ForeignRegistry,
    RuntimeError, RuntimeResult, Value,
};
