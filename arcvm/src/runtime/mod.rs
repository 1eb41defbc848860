// Runtime system for ARCVM

pub mod context;
pub mod continuation;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod foreign;
pub mod host_interface;
pub mod param_binding;
pub mod stdlib;
pub mod values;

pub use context::ExecutionContext;
pub use continuation::{Continuation, Frame, Step};
pub use environment::Environment;
pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::Evaluator;
pub use foreign::{ForeignError, ForeignRegistry, HostType, HostValue};
pub use host_interface::{ForeignCall, NoForeignCalls};
pub use param_binding::{Binder, PendingFrame};
pub use stdlib::StandardLibrary;
pub use values::{Function, Value};
