//! Resumable parameter binding.
//!
//! A [`Binder`] walks a [`ParamSpec`] against an argument list and accumulates
//! a [`PendingFrame`]. It is a small state machine driven by the trampoline:
//!
//! - `Consuming`: the binder is the payload of a `Step::Bind` and is matching
//!   the next parameter element against the next argument.
//! - `AwaitingDefault`: an optional parameter had no argument; the binder sits
//!   in a `Frame::AwaitingDefault` while the default expression is evaluated.
//! - `AwaitingNested`: a nested parameter list is being bound by a child
//!   binder; the parent sits in a `Frame::AwaitingNested`.
//! - `Done`: the finished frame travels as `Step::Bound`.
//!
//! The frame under construction is a real environment whose parent is the
//! procedure's closure scope. Default expressions run in it, so they see the
//! parameters bound before them, and an `assign` or a closure made inside a
//! default refers to the same frame the body later runs in. Only
//! `Frame::EnterBody` hands that frame to the body.
//!
//! Every suspended state lives in a continuation frame. Capturing a
//! continuation inside a default expression copies the partially bound frame
//! (see [`Continuation::clone_for`]), so the capture can be resumed any number
//! of times.

use crate::ast::{Param, ParamSpec, Symbol};
use crate::runtime::continuation::{Continuation, Frame, FrameCopies, Step};
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::Value;
use std::sync::Arc;
use tracing::trace;

/// A procedure frame that is still being bound.
#[derive(Debug)]
pub struct PendingFrame {
    env: Arc<Environment>,
}

impl PendingFrame {
    /// An empty frame extending `scope`.
    pub fn new(scope: Arc<Environment>) -> Self {
        PendingFrame {
            env: Arc::new(Environment::with_parent(scope)),
        }
    }

    pub fn push(&self, name: Symbol, value: Value) -> RuntimeResult<()> {
        self.env.append(name, value)
    }

    /// Slots bound so far, in binding order.
    pub fn bindings(&self) -> RuntimeResult<Vec<(Symbol, Value)>> {
        self.env.bindings()
    }

    /// The frame itself; default expressions are evaluated here.
    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Another handle on the same frame, for a child binder that binds a
    /// nested parameter list into it.
    fn share(&self) -> PendingFrame {
        PendingFrame {
            env: Arc::clone(&self.env),
        }
    }

    /// This frame inside a continuation copy. Binders that share a frame
    /// keep sharing the copy.
    pub(crate) fn copy_into(&self, copies: &mut FrameCopies) -> RuntimeResult<PendingFrame> {
        Ok(PendingFrame {
            env: copies.fork(&self.env)?,
        })
    }

    /// Turn the finished frame into the procedure's environment.
    pub fn publish(self) -> Arc<Environment> {
        self.env
    }
}

#[derive(Debug)]
pub struct Binder {
    procedure: String,
    spec: Arc<ParamSpec>,
    position: usize,
    args: Value,
    supplied: usize,
    frame: PendingFrame,
}

impl Binder {
    /// Start binding `args` against `spec` for the procedure named
    /// `procedure`, in a new frame extending `scope`.
    pub fn new(procedure: String, spec: Arc<ParamSpec>, args: Value, scope: Arc<Environment>) -> Self {
        Self::with_frame(procedure, spec, args, PendingFrame::new(scope))
    }

    fn with_frame(procedure: String, spec: Arc<ParamSpec>, args: Value, frame: PendingFrame) -> Self {
        let supplied = args.list_len();
        Binder {
            procedure,
            spec,
            position: 0,
            args,
            supplied,
            frame,
        }
    }

    pub fn frame(&self) -> &PendingFrame {
        &self.frame
    }

    /// This binder inside a continuation copy.
    pub(crate) fn copy_into(&self, copies: &mut FrameCopies) -> RuntimeResult<Binder> {
        Ok(Binder {
            procedure: self.procedure.clone(),
            spec: Arc::clone(&self.spec),
            position: self.position,
            args: self.args.clone(),
            supplied: self.supplied,
            frame: self.frame.copy_into(copies)?,
        })
    }

    /// Bind as far as possible without evaluating anything. Returns
    /// `Step::Bound` when done, or an evaluation step after pushing the
    /// suspended binder onto `k`.
    pub fn step(mut self, k: &mut Continuation) -> RuntimeResult<Step> {
        loop {
            let param = match self.spec.params.get(self.position) {
                Some(param) => param.clone(),
                None => return self.finish(),
            };
            match param {
                Param::Symbol(name) => match self.next_argument()? {
                    Some(value) => {
                        self.frame.push(name, value)?;
                        self.position += 1;
                    }
                    None => return Err(self.arity_error()),
                },
                Param::Optional { name, default } => match self.next_argument()? {
                    Some(value) => {
                        self.frame.push(name, value)?;
                        self.position += 1;
                    }
                    None => {
                        trace!(procedure = %self.procedure, param = %name, "evaluating default");
                        let env = Arc::clone(self.frame.env());
                        k.push(Frame::AwaitingDefault(self));
                        return Ok(Step::Eval { expr: default, env });
                    }
                },
                Param::Nested(nested) => {
                    let value = match self.next_argument()? {
                        Some(value) => value,
                        None => return Err(self.arity_error()),
                    };
                    if !value.is_list_shaped() {
                        return Err(RuntimeError::MalformedParameterSpec {
                            procedure: self.procedure.clone(),
                            expected: format!("list to destructure against {}", nested),
                            actual: value.to_string(),
                        });
                    }
                    let child = Binder::with_frame(self.procedure.clone(), nested, value, self.frame.share());
                    self.position += 1;
                    k.push(Frame::AwaitingNested(self));
                    return Ok(Step::Bind(child));
                }
            }
        }
    }

    /// Leave `AwaitingDefault` with the value of the default expression.
    pub fn resume_with_default(mut self, value: Value) -> RuntimeResult<Binder> {
        let name = match self.spec.params.get(self.position) {
            Some(Param::Optional { name, .. }) => name.clone(),
            _ => {
                return Err(RuntimeError::InternalError(format!(
                    "binder for {} resumed with a default at a non-optional parameter",
                    self.procedure
                )))
            }
        };
        self.frame.push(name, value)?;
        self.position += 1;
        Ok(self)
    }

    /// Leave `AwaitingNested` with the frame the child binder produced.
    pub fn resume_with_frame(mut self, frame: PendingFrame) -> Binder {
        self.frame = frame;
        self
    }

    fn next_argument(&mut self) -> RuntimeResult<Option<Value>> {
        match std::mem::replace(&mut self.args, Value::Nil) {
            Value::Nil => Ok(None),
            Value::Pair(pair) => {
                self.args = pair.cdr.clone();
                Ok(Some(pair.car.clone()))
            }
            other => Err(RuntimeError::MalformedParameterSpec {
                procedure: self.procedure.clone(),
                expected: "proper argument list".to_string(),
                actual: format!("list ending in {}", other),
            }),
        }
    }

    fn finish(mut self) -> RuntimeResult<Step> {
        match &self.spec.rest {
            Some(rest) => {
                let remaining = std::mem::replace(&mut self.args, Value::Nil);
                self.frame.push(rest.clone(), remaining)?;
            }
            None => match &self.args {
                Value::Nil => {}
                Value::Pair(_) => return Err(self.arity_error()),
                other => {
                    return Err(RuntimeError::MalformedParameterSpec {
                        procedure: self.procedure.clone(),
                        expected: "proper argument list".to_string(),
                        actual: format!("list ending in {}", other),
                    })
                }
            },
        }
        Ok(Step::Bound(self.frame))
    }

    fn arity_error(&self) -> RuntimeError {
        RuntimeError::WrongArity {
            procedure: self.procedure.clone(),
            expected: self.spec.arity(),
            actual: self.supplied,
        }
    }
}
