//! Reified continuations.
//!
//! A continuation is an explicit stack of [`Frame`]s owned by the execution
//! context. The top frame is "what happens next"; the frame below it is its
//! caller. An empty stack is the terminal continuation: a value delivered to
//! it becomes the context's result.
//!
//! Every frame owns its residual state. [`Continuation::clone_for`] copies
//! the chain and forks the frame of any suspended parameter binder, so a
//! captured continuation can be resumed more than once.

use crate::ast::Symbol;
use crate::runtime::context::ExecutionContext;
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::param_binding::{Binder, PendingFrame};
use crate::runtime::values::Value;
use std::sync::Arc;
use tracing::trace;

/// One unit of trampoline work.
#[derive(Debug)]
pub enum Step {
    /// Evaluate `expr` in `env`, delivering the value to the current top frame.
    Eval { expr: Value, env: Arc<Environment> },
    /// Deliver a value to the current top frame.
    Return(Value),
    /// Apply a procedure to an evaluated argument list.
    Apply { function: Value, args: Value },
    /// Run the parameter binder in its `Consuming` state.
    Bind(Binder),
    /// A binder finished; hand its frame to the current top frame.
    Bound(PendingFrame),
}

#[derive(Debug)]
pub enum Frame {
    /// Remaining clauses of an `if` whose test is being evaluated.
    Branch {
        env: Arc<Environment>,
        then: Value,
        rest: Value,
    },
    /// Remaining forms of a body.
    Sequence { env: Arc<Environment>, remaining: Value },
    /// Operator and operands of an application, collected left to right.
    Arguments {
        env: Arc<Environment>,
        operator: Option<Value>,
        evaluated: Vec<Value>,
        remaining: Value,
    },
    /// Pending `assign`.
    Assign { env: Arc<Environment>, name: Symbol },
    /// A binder suspended while an optional default is evaluated.
    AwaitingDefault(Binder),
    /// A parent binder suspended while a child binds a nested parameter list.
    AwaitingNested(Binder),
    /// A procedure body waiting for its bound frame.
    EnterBody { body: Value },
    /// An `on-err` handler; transparent to normal returns.
    Handler { handler: Value },
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Branch { .. } => "branch",
            Frame::Sequence { .. } => "sequence",
            Frame::Arguments { .. } => "arguments",
            Frame::Assign { .. } => "assign",
            Frame::AwaitingDefault(_) => "awaiting-default",
            Frame::AwaitingNested(_) => "awaiting-nested",
            Frame::EnterBody { .. } => "enter-body",
            Frame::Handler { .. } => "handler",
        }
    }

    /// This frame inside a continuation copy. Pending binder frames are
    /// forked; any other reference to a forked frame follows the fork.
    fn copy_into(&self, copies: &mut FrameCopies) -> RuntimeResult<Frame> {
        Ok(match self {
            Frame::Branch { env, then, rest } => Frame::Branch {
                env: copies.follow(env),
                then: then.clone(),
                rest: rest.clone(),
            },
            Frame::Sequence { env, remaining } => Frame::Sequence {
                env: copies.follow(env),
                remaining: remaining.clone(),
            },
            Frame::Arguments {
                env,
                operator,
                evaluated,
                remaining,
            } => Frame::Arguments {
                env: copies.follow(env),
                operator: operator.clone(),
                evaluated: evaluated.clone(),
                remaining: remaining.clone(),
            },
            Frame::Assign { env, name } => Frame::Assign {
                env: copies.follow(env),
                name: name.clone(),
            },
            Frame::AwaitingDefault(binder) => Frame::AwaitingDefault(binder.copy_into(copies)?),
            Frame::AwaitingNested(binder) => Frame::AwaitingNested(binder.copy_into(copies)?),
            Frame::EnterBody { body } => Frame::EnterBody { body: body.clone() },
            Frame::Handler { handler } => Frame::Handler {
                handler: handler.clone(),
            },
        })
    }

    /// Consume a computed value and decide the next step. Frames that still
    /// have work left push their successor onto `k`.
    pub fn receive(self, value: Value, k: &mut Continuation) -> RuntimeResult<Step> {
        match self {
            Frame::Branch { env, then, rest } => {
                if value.is_truthy() {
                    Ok(Step::Eval { expr: then, env })
                } else {
                    conditional(&rest, env, k)
                }
            }
            Frame::Sequence { env, remaining } => sequence(&remaining, env, k),
            Frame::Arguments {
                env,
                operator,
                mut evaluated,
                remaining,
            } => {
                let operator = match operator {
                    None => value,
                    Some(operator) => {
                        evaluated.push(value);
                        operator
                    }
                };
                match remaining {
                    Value::Nil => Ok(Step::Apply {
                        function: operator,
                        args: Value::list(evaluated),
                    }),
                    Value::Pair(pair) => {
                        k.push(Frame::Arguments {
                            env: Arc::clone(&env),
                            operator: Some(operator),
                            evaluated,
                            remaining: pair.cdr.clone(),
                        });
                        Ok(Step::Eval {
                            expr: pair.car.clone(),
                            env,
                        })
                    }
                    other => Err(RuntimeError::MalformedForm {
                        form: "application".to_string(),
                        expected: "proper operand list".to_string(),
                        actual: other.to_string(),
                    }),
                }
            }
            Frame::Assign { env, name } => {
                env.assign(name, value.clone())?;
                Ok(Step::Return(value))
            }
            Frame::AwaitingDefault(binder) => Ok(Step::Bind(binder.resume_with_default(value)?)),
            Frame::Handler { .. } => Ok(Step::Return(value)),
            other @ (Frame::AwaitingNested(_) | Frame::EnterBody { .. }) => {
                Err(RuntimeError::InternalError(format!(
                    "{} frame received a value instead of bindings",
                    other.name()
                )))
            }
        }
    }

    /// Consume the frame produced by a finished binder.
    pub fn accept_bindings(self, frame: PendingFrame, k: &mut Continuation) -> RuntimeResult<Step> {
        match self {
            Frame::AwaitingNested(parent) => Ok(Step::Bind(parent.resume_with_frame(frame))),
            Frame::EnterBody { body } => sequence(&body, frame.publish(), k),
            other => Err(RuntimeError::InternalError(format!(
                "{} frame received bindings",
                other.name()
            ))),
        }
    }
}

/// Evaluate `(c1 e1 c2 e2 ... else)` clauses. The chosen branch runs with the
/// caller's continuation.
pub fn conditional(clauses: &Value, env: Arc<Environment>, k: &mut Continuation) -> RuntimeResult<Step> {
    match clauses {
        Value::Nil => Ok(Step::Return(Value::Nil)),
        Value::Pair(clause) => match &clause.cdr {
            Value::Nil => Ok(Step::Eval {
                expr: clause.car.clone(),
                env,
            }),
            Value::Pair(branch) => {
                k.push(Frame::Branch {
                    env: Arc::clone(&env),
                    then: branch.car.clone(),
                    rest: branch.cdr.clone(),
                });
                Ok(Step::Eval {
                    expr: clause.car.clone(),
                    env,
                })
            }
            other => Err(malformed_body("if", other)),
        },
        other => Err(malformed_body("if", other)),
    }
}

/// Evaluate body forms in order; the last one runs with the caller's
/// continuation.
pub fn sequence(body: &Value, env: Arc<Environment>, k: &mut Continuation) -> RuntimeResult<Step> {
    match body {
        Value::Nil => Ok(Step::Return(Value::Nil)),
        Value::Pair(form) => {
            if !form.cdr.is_nil() {
                k.push(Frame::Sequence {
                    env: Arc::clone(&env),
                    remaining: form.cdr.clone(),
                });
            }
            Ok(Step::Eval {
                expr: form.car.clone(),
                env,
            })
        }
        other => Err(malformed_body("body", other)),
    }
}

fn malformed_body(form: &str, actual: &Value) -> RuntimeError {
    RuntimeError::MalformedForm {
        form: form.to_string(),
        expected: "proper list of forms".to_string(),
        actual: format!("list ending in {}", actual),
    }
}

/// Frames forked while copying one continuation, keyed by the original.
#[derive(Debug, Default)]
pub(crate) struct FrameCopies {
    forks: Vec<(Arc<Environment>, Arc<Environment>)>,
}

impl FrameCopies {
    /// The copy of `env`, forking it on first sight.
    pub(crate) fn fork(&mut self, env: &Arc<Environment>) -> RuntimeResult<Arc<Environment>> {
        if let Some(copy) = self.get(env) {
            return Ok(copy);
        }
        let copy = Arc::new(env.fork()?);
        self.forks.push((Arc::clone(env), Arc::clone(&copy)));
        Ok(copy)
    }

    /// The copy of `env` if it was forked, otherwise `env` itself.
    fn follow(&self, env: &Arc<Environment>) -> Arc<Environment> {
        self.get(env).unwrap_or_else(|| Arc::clone(env))
    }

    fn get(&self, env: &Arc<Environment>) -> Option<Arc<Environment>> {
        self.forks
            .iter()
            .find(|(original, _)| Arc::ptr_eq(original, env))
            .map(|(_, copy)| Arc::clone(copy))
    }
}

/// A control stack: the live chain of an execution context, or a captured
/// copy of one.
#[derive(Debug, Default)]
pub struct Continuation {
    frames: Vec<Frame>,
}

impl Continuation {
    /// The terminal continuation.
    pub fn halt() -> Self {
        Continuation { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.frames.is_empty()
    }

    /// Copy of this chain for resumption inside `context`. Frames still
    /// being bound are forked, so each resumption of a captured continuation
    /// binds into its own frame. Frames are walked bottom to top, which puts
    /// every binder before the frames of its default expression.
    pub fn clone_for(&self, context: &ExecutionContext) -> RuntimeResult<Continuation> {
        trace!(
            context = context.id(),
            depth = self.depth(),
            "cloning continuation"
        );
        let mut copies = FrameCopies::default();
        let frames = self
            .frames
            .iter()
            .map(|frame| frame.copy_into(&mut copies))
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok(Continuation { frames })
    }

    /// Discard frames up to and including the nearest handler, returning the
    /// handler procedure. Discarded frames are never run.
    pub fn unwind_to_handler(&mut self) -> Option<Value> {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Handler { handler } = frame {
                return Some(handler);
            }
        }
        None
    }

    /// Drop every frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
