// Execution context: one logical thread of control

use crate::runtime::continuation::{Continuation, Frame};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Owns the live continuation chain of one evaluation. Contexts are
/// independent: several can run on different threads against the same
/// global environment, each with its own chain.
#[derive(Debug)]
pub struct ExecutionContext {
    id: u64,
    stack: Continuation,
    steps: u64,
    result: Option<Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, "created execution context");
        ExecutionContext {
            id,
            stack: Continuation::halt(),
            steps: 0,
            result: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make `continuation` the live chain and reset per-run counters.
    pub fn install(&mut self, continuation: Continuation) {
        self.stack = continuation;
        self.steps = 0;
        self.result = None;
    }

    /// Replace the live chain with a deep copy of a captured one.
    pub fn reinstate(&mut self, captured: &Continuation) -> RuntimeResult<()> {
        debug!(
            context = self.id,
            depth = captured.depth(),
            "reinstating captured continuation"
        );
        self.stack = captured.clone_for(self)?;
        Ok(())
    }

    /// Copy of the live chain, suitable for storing as a value.
    pub fn capture(&self) -> RuntimeResult<Continuation> {
        debug!(context = self.id, depth = self.stack.depth(), "capturing continuation");
        self.stack.clone_for(self)
    }

    pub fn push(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    pub fn stack_mut(&mut self) -> &mut Continuation {
        &mut self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Count one trampoline iteration against `limit`.
    pub fn tick(&mut self, limit: Option<u64>) -> RuntimeResult<()> {
        self.steps += 1;
        match limit {
            Some(limit) if self.steps > limit => {
                warn!(context = self.id, limit, "step limit exceeded");
                Err(RuntimeError::StepLimitExceeded { limit })
            }
            _ => Ok(()),
        }
    }

    /// Deliver a value to the terminal continuation.
    pub fn finalize(&mut self, value: Value) {
        debug!(context = self.id, steps = self.steps, "evaluation finished");
        self.result = Some(value);
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Discard the live chain without running any of its frames.
    pub fn abandon(&mut self) {
        if !self.stack.is_terminal() {
            debug!(context = self.id, depth = self.stack.depth(), "abandoning continuation");
        }
        self.stack.clear();
    }

    /// Pop frames up to the nearest handler.
    pub fn unwind(&mut self) -> Option<Value> {
        let handler = self.stack.unwind_to_handler();
        debug!(
            context = self.id,
            handled = handler.is_some(),
            depth = self.stack.depth(),
            "unwound continuation"
        );
        handler
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::environment::Environment;
    use std::sync::Arc;

    #[test]
    fn contexts_get_distinct_ids() {
        let a = ExecutionContext::new();
        let b = ExecutionContext::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn tick_enforces_the_limit() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.tick(Some(2)).is_ok());
        assert!(ctx.tick(Some(2)).is_ok());
        assert_eq!(
            ctx.tick(Some(2)),
            Err(RuntimeError::StepLimitExceeded { limit: 2 })
        );
        assert!(ctx.tick(None).is_ok());
    }

    #[test]
    fn captured_chain_is_independent_of_the_live_one() {
        let mut ctx = ExecutionContext::new();
        ctx.push(Frame::Sequence {
            env: Arc::new(Environment::new()),
            remaining: Value::Nil,
        });
        let captured = ctx.capture().unwrap();
        ctx.abandon();
        assert_eq!(ctx.depth(), 0);
        assert_eq!(captured.depth(), 1);

        ctx.reinstate(&captured).unwrap();
        ctx.pop();
        assert_eq!(captured.depth(), 1);
    }
}
