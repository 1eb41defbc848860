// ARCVM Evaluator - trampoline over an explicit continuation stack

use crate::ast::{Param, ParamSpec, Symbol};
use crate::config::EvaluatorConfig;
use crate::reader::read;
use crate::runtime::context::ExecutionContext;
use crate::runtime::continuation::{conditional, sequence, Continuation, Frame, Step};
use crate::runtime::environment::Environment;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::host_interface::{ForeignCall, NoForeignCalls};
use crate::runtime::param_binding::Binder;
use crate::runtime::stdlib::StandardLibrary;
use crate::runtime::values::{ControlOp, ForeignTarget, Function, Value};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    Quote,
    If,
    Fn,
    Do,
    Let,
    With,
    Assign,
    Def,
}

lazy_static! {
    static ref SPECIAL_FORMS: HashMap<&'static str, SpecialForm> = {
        let mut forms = HashMap::new();
        forms.insert("quote", SpecialForm::Quote);
        forms.insert("if", SpecialForm::If);
        forms.insert("fn", SpecialForm::Fn);
        forms.insert("do", SpecialForm::Do);
        forms.insert("let", SpecialForm::Let);
        forms.insert("with", SpecialForm::With);
        forms.insert("assign", SpecialForm::Assign);
        forms.insert("def", SpecialForm::Def);
        forms
    };
}

/// Shared, immutable evaluator state: the global environment, the host's
/// foreign-call capability and the limits. One evaluator can drive many
/// execution contexts, including on different threads.
#[derive(Debug)]
pub struct Evaluator {
    global: Arc<Environment>,
    host: Arc<dyn ForeignCall>,
    config: EvaluatorConfig,
}

impl Evaluator {
    /// Create an evaluator with the standard library loaded and no foreign
    /// targets.
    pub fn new(config: EvaluatorConfig) -> RuntimeResult<Self> {
        Self::with_host(config, Arc::new(NoForeignCalls))
    }

    /// Create an evaluator whose programs can call the host's foreign
    /// targets by name.
    pub fn with_host(config: EvaluatorConfig, host: Arc<dyn ForeignCall>) -> RuntimeResult<Self> {
        let global = Arc::new(StandardLibrary::create_global_environment()?);
        for descriptor in host.targets() {
            global.define(
                Symbol::new(&descriptor),
                Value::Function(Function::Foreign(ForeignTarget::new(&descriptor))),
            )?;
        }
        Ok(Evaluator {
            global,
            host,
            config,
        })
    }

    pub fn global(&self) -> &Arc<Environment> {
        &self.global
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn new_context(&self) -> ExecutionContext {
        ExecutionContext::new()
    }

    /// Evaluate `expr` in `env`, delivering its value to `continuation`.
    /// Runs until the terminal continuation receives a value or an error
    /// escapes every installed handler.
    pub fn evaluate(
        &self,
        ctx: &mut ExecutionContext,
        env: &Arc<Environment>,
        continuation: Continuation,
        expr: &Value,
    ) -> RuntimeResult<Value> {
        ctx.install(continuation);
        self.run(
            ctx,
            Step::Eval {
                expr: expr.clone(),
                env: Arc::clone(env),
            },
        )
    }

    /// Evaluate one expression in the global environment.
    pub fn eval_expr(&self, expr: &Value) -> RuntimeResult<Value> {
        let mut ctx = self.new_context();
        self.evaluate(&mut ctx, &self.global, Continuation::halt(), expr)
    }

    /// Read and evaluate every form of `source`, returning the last value.
    pub fn eval_source(&self, source: &str) -> RuntimeResult<Value> {
        let forms = read(source).map_err(|e| RuntimeError::ReaderError(e.to_string()))?;
        let mut ctx = self.new_context();
        let mut last = Value::Nil;
        for form in &forms {
            last = self.evaluate(&mut ctx, &self.global, Continuation::halt(), form)?;
        }
        Ok(last)
    }

    /// Deliver `value` to a deep copy of `captured`. The capture itself is
    /// left untouched and can be resumed again.
    pub fn resume(
        &self,
        ctx: &mut ExecutionContext,
        captured: &Continuation,
        value: Value,
    ) -> RuntimeResult<Value> {
        ctx.install(Continuation::halt());
        ctx.reinstate(captured)?;
        self.run(ctx, Step::Return(value))
    }

    fn run(&self, ctx: &mut ExecutionContext, mut step: Step) -> RuntimeResult<Value> {
        loop {
            if let Err(error) = ctx.tick(self.config.max_steps) {
                ctx.abandon();
                return Err(error);
            }
            if self.config.trace_steps {
                trace!(
                    context = ctx.id(),
                    depth = ctx.depth(),
                    step = step_name(&step),
                    "step"
                );
            }
            let next = match step {
                Step::Eval { expr, env } => self.eval(ctx, expr, env),
                Step::Return(value) => match ctx.pop() {
                    Some(frame) => frame.receive(value, ctx.stack_mut()),
                    None => {
                        ctx.finalize(value.clone());
                        return Ok(value);
                    }
                },
                Step::Apply { function, args } => self.apply(ctx, function, args),
                Step::Bind(binder) => binder.step(ctx.stack_mut()),
                Step::Bound(frame) => match ctx.pop() {
                    Some(top) => top.accept_bindings(frame, ctx.stack_mut()),
                    None => Err(RuntimeError::InternalError(
                        "bindings delivered to the terminal continuation".to_string(),
                    )),
                },
            };
            step = match next {
                Ok(next) => next,
                Err(error) => self.unwind(ctx, error)?,
            };
        }
    }

    /// Route an error to the nearest handler, or out to the host.
    fn unwind(&self, ctx: &mut ExecutionContext, error: RuntimeError) -> RuntimeResult<Step> {
        if !error.is_recoverable() {
            ctx.abandon();
            return Err(error);
        }
        match ctx.unwind() {
            Some(handler) => {
                debug!(context = ctx.id(), kind = error.kind(), "error caught by handler");
                Ok(Step::Apply {
                    function: handler,
                    args: Value::list(vec![error.to_value()]),
                })
            }
            None => {
                ctx.abandon();
                Err(error)
            }
        }
    }

    fn eval(&self, ctx: &mut ExecutionContext, expr: Value, env: Arc<Environment>) -> RuntimeResult<Step> {
        match expr {
            Value::Symbol(symbol) => Ok(Step::Return(env.resolve(&symbol)?)),
            Value::Pair(pair) => {
                if let Value::Symbol(head) = &pair.car {
                    if let Some(form) = SPECIAL_FORMS.get(head.as_str()) {
                        return self.eval_special(ctx, *form, &pair.cdr, env);
                    }
                }
                ctx.push(Frame::Arguments {
                    env: Arc::clone(&env),
                    operator: None,
                    evaluated: Vec::new(),
                    remaining: pair.cdr.clone(),
                });
                Ok(Step::Eval {
                    expr: pair.car.clone(),
                    env,
                })
            }
            literal => Ok(Step::Return(literal)),
        }
    }

    fn eval_special(
        &self,
        ctx: &mut ExecutionContext,
        form: SpecialForm,
        rest: &Value,
        env: Arc<Environment>,
    ) -> RuntimeResult<Step> {
        match form {
            SpecialForm::Quote => match rest.as_pair() {
                Some(pair) if pair.cdr.is_nil() => Ok(Step::Return(pair.car.clone())),
                _ => Err(malformed("quote", "(quote datum)", rest)),
            },
            SpecialForm::If => conditional(rest, env, ctx.stack_mut()),
            SpecialForm::Do => sequence(rest, env, ctx.stack_mut()),
            SpecialForm::Fn => self.eval_fn(rest, env),
            SpecialForm::Let => self.eval_let(ctx, rest, env),
            SpecialForm::With => self.eval_with(ctx, rest, env),
            SpecialForm::Assign => self.eval_assign(ctx, rest, env),
            SpecialForm::Def => self.eval_def(rest, env),
        }
    }

    fn eval_fn(&self, rest: &Value, env: Arc<Environment>) -> RuntimeResult<Step> {
        let (params, body) = split_first("fn", "(fn params body...)", rest)?;
        let spec = ParamSpec::parse("fn", &params)?;
        Ok(Step::Return(Value::Function(Function::new_closure(
            None, spec, body, env,
        ))))
    }

    fn eval_def(&self, rest: &Value, env: Arc<Environment>) -> RuntimeResult<Step> {
        let expected = "(def name params body...)";
        let (name, rest) = split_first("def", expected, rest)?;
        let name = match name {
            Value::Symbol(name) => name,
            other => return Err(malformed("def", expected, &other)),
        };
        let (params, body) = split_first("def", expected, &rest)?;
        let spec = ParamSpec::parse(name.as_str(), &params)?;
        let root = env.root();
        let function = Value::Function(Function::new_closure(
            Some(name.clone()),
            spec,
            body,
            env,
        ));
        root.define(name, function.clone())?;
        Ok(Step::Return(function))
    }

    /// `(let pattern value body...)` is a one-argument call of an anonymous
    /// procedure, so the pattern goes through the binder.
    fn eval_let(&self, ctx: &mut ExecutionContext, rest: &Value, env: Arc<Environment>) -> RuntimeResult<Step> {
        let expected = "(let pattern value body...)";
        let (pattern, rest) = split_first("let", expected, rest)?;
        let (value, body) = split_first("let", expected, &rest)?;
        let spec = ParamSpec::single(Param::parse("let", &pattern)?);
        let function = Value::Function(Function::new_closure(
            Some(Symbol::new("let")),
            spec,
            body,
            Arc::clone(&env),
        ));
        Ok(self.apply_to_operands(ctx, function, Value::list(vec![value]), env))
    }

    /// `(with (p1 v1 p2 v2 ...) body...)`: every value is evaluated in the
    /// enclosing scope, then all patterns bind in one frame.
    fn eval_with(&self, ctx: &mut ExecutionContext, rest: &Value, env: Arc<Environment>) -> RuntimeResult<Step> {
        let expected = "(with (pattern value ...) body...)";
        let (bindings, body) = split_first("with", expected, rest)?;
        let items = bindings
            .to_vec()
            .map_err(|_| malformed("with", expected, &bindings))?;
        if items.len() % 2 != 0 {
            return Err(malformed("with", "an even number of binding forms", &bindings));
        }
        let mut params = Vec::with_capacity(items.len() / 2);
        let mut values = Vec::with_capacity(items.len() / 2);
        for chunk in items.chunks(2) {
            params.push(Param::parse("with", &chunk[0])?);
            values.push(chunk[1].clone());
        }
        let spec = ParamSpec { params, rest: None };
        let function = Value::Function(Function::new_closure(
            Some(Symbol::new("with")),
            spec,
            body,
            Arc::clone(&env),
        ));
        Ok(self.apply_to_operands(ctx, function, Value::list(values), env))
    }

    fn eval_assign(&self, ctx: &mut ExecutionContext, rest: &Value, env: Arc<Environment>) -> RuntimeResult<Step> {
        let expected = "(assign name value)";
        let items = rest.to_vec().map_err(|_| malformed("assign", expected, rest))?;
        match items.as_slice() {
            [Value::Symbol(name), value] => {
                ctx.push(Frame::Assign {
                    env: Arc::clone(&env),
                    name: name.clone(),
                });
                Ok(Step::Eval {
                    expr: value.clone(),
                    env,
                })
            }
            _ => Err(malformed("assign", expected, rest)),
        }
    }

    /// Evaluate `operands` left to right, then apply the already known
    /// `function` to them.
    fn apply_to_operands(
        &self,
        ctx: &mut ExecutionContext,
        function: Value,
        operands: Value,
        env: Arc<Environment>,
    ) -> Step {
        match operands {
            Value::Pair(first) => {
                ctx.push(Frame::Arguments {
                    env: Arc::clone(&env),
                    operator: Some(function),
                    evaluated: Vec::new(),
                    remaining: first.cdr.clone(),
                });
                Step::Eval {
                    expr: first.car.clone(),
                    env,
                }
            }
            _ => Step::Apply {
                function,
                args: Value::Nil,
            },
        }
    }

    fn apply(&self, ctx: &mut ExecutionContext, function: Value, args: Value) -> RuntimeResult<Step> {
        match function {
            Value::Function(Function::Closure(closure)) => {
                // The body frame replaces nothing: it is popped again as soon
                // as binding finishes, so tail calls keep the stack flat.
                ctx.push(Frame::EnterBody {
                    body: closure.body.clone(),
                });
                Ok(Step::Bind(Binder::new(
                    closure.label(),
                    Arc::clone(&closure.params),
                    args,
                    Arc::clone(&closure.env),
                )))
            }
            Value::Function(Function::Builtin(builtin)) => {
                let args = args.to_vec()?;
                builtin.check_arity(args.len())?;
                Ok(Step::Return((builtin.func)(args)?))
            }
            Value::Function(Function::Control(op)) => self.apply_control(ctx, op, args),
            Value::Function(Function::Foreign(target)) => {
                let args = args.to_vec()?;
                let result = self.host.invoke(&target, &args).map_err(|cause| {
                    RuntimeError::ForeignBindingFailure {
                        target: target.descriptor.clone(),
                        cause,
                    }
                })?;
                Ok(Step::Return(result))
            }
            Value::Continuation(captured) => {
                let mut args = args.to_vec()?;
                let value = match args.len() {
                    0 => Value::Nil,
                    1 => args.remove(0),
                    n => {
                        return Err(RuntimeError::WrongArity {
                            procedure: "continuation".to_string(),
                            expected: "0 to 1".to_string(),
                            actual: n,
                        })
                    }
                };
                ctx.reinstate(&captured)?;
                Ok(Step::Return(value))
            }
            other => Err(RuntimeError::NonCallableOperator {
                operator: other.to_string(),
                type_name: other.type_name(),
            }),
        }
    }

    fn apply_control(&self, ctx: &mut ExecutionContext, op: ControlOp, args: Value) -> RuntimeResult<Step> {
        let mut args = args.to_vec()?;
        match (op, args.len()) {
            (ControlOp::CallCc, 1) => {
                let captured = ctx.capture()?;
                Ok(Step::Apply {
                    function: args.remove(0),
                    args: Value::list(vec![Value::Continuation(Arc::new(captured))]),
                })
            }
            (ControlOp::Apply, n) if n >= 1 => {
                let function = args.remove(0);
                let spread = match args.pop() {
                    None => Value::Nil,
                    Some(last) if last.is_list_shaped() => Value::list_with_tail(args, last),
                    Some(other) => {
                        return Err(RuntimeError::TypeError {
                            operation: "apply".to_string(),
                            expected: "list as last argument".to_string(),
                            actual: other.to_string(),
                        })
                    }
                };
                Ok(Step::Apply {
                    function,
                    args: spread,
                })
            }
            (ControlOp::OnErr, 2) => {
                let thunk = args.pop().unwrap_or(Value::Nil);
                let handler = args.pop().unwrap_or(Value::Nil);
                ctx.push(Frame::Handler { handler });
                Ok(Step::Apply {
                    function: thunk,
                    args: Value::Nil,
                })
            }
            (op, actual) => Err(RuntimeError::WrongArity {
                procedure: op.name().to_string(),
                expected: match op {
                    ControlOp::CallCc => "1",
                    ControlOp::Apply => "at least 1",
                    ControlOp::OnErr => "2",
                }
                .to_string(),
                actual,
            }),
        }
    }
}

fn step_name(step: &Step) -> &'static str {
    match step {
        Step::Eval { .. } => "eval",
        Step::Return(_) => "return",
        Step::Apply { .. } => "apply",
        Step::Bind(_) => "bind",
        Step::Bound(_) => "bound",
    }
}

fn split_first(form: &str, expected: &str, rest: &Value) -> RuntimeResult<(Value, Value)> {
    match rest.as_pair() {
        Some(pair) => Ok((pair.car.clone(), pair.cdr.clone())),
        None => Err(malformed(form, expected, rest)),
    }
}

fn malformed(form: &str, expected: &str, actual: &Value) -> RuntimeError {
    RuntimeError::MalformedForm {
        form: form.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(source: &str) -> RuntimeResult<Value> {
        Evaluator::new(EvaluatorConfig::default())
            .unwrap()
            .eval_source(source)
    }

    fn read(source: &str) -> Value {
        crate::reader::read_one(source).unwrap()
    }

    #[test]
    fn literals_and_quote() {
        assert_eq!(eval("42").unwrap(), Value::Integer(42));
        assert_eq!(eval("\"s\"").unwrap(), Value::string("s"));
        assert_eq!(eval("'(a b)").unwrap(), read("(a b)"));
        assert_eq!(eval("nil").unwrap(), Value::Nil);
    }

    #[test]
    fn multi_branch_if() {
        assert_eq!(eval("(if nil 1 t 2 3)").unwrap(), Value::Integer(2));
        assert_eq!(eval("(if nil 1 nil 2 3)").unwrap(), Value::Integer(3));
        assert_eq!(eval("(if nil 1)").unwrap(), Value::Nil);
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let result = eval(
            "(def adder (n) (fn (x) (+ x n)))
             (let add5 (adder 5) (add5 10))",
        );
        assert_eq!(result.unwrap(), Value::Integer(15));
    }

    #[test]
    fn let_and_with_destructure_through_the_binder() {
        assert_eq!(
            eval("(let (a (b c)) '(1 (2 3)) (list c b a))").unwrap(),
            read("(3 2 1)")
        );
        assert_eq!(
            eval("(with (x 1 (o y 5) nil) (list x y))").unwrap(),
            read("(1 nil)")
        );
    }

    #[test]
    fn assign_rebinds_nearest_scope() {
        assert_eq!(
            eval("(assign x 1) (let y 2 (assign x (+ x y))) x").unwrap(),
            Value::Integer(3)
        );
    }

    #[test]
    fn apply_spreads_its_last_argument() {
        assert_eq!(eval("(apply + 1 2 '(3 4))").unwrap(), Value::Integer(10));
        assert_eq!(eval("(apply list)").unwrap(), Value::Nil);
    }

    #[test]
    fn escaping_continuation() {
        assert_eq!(
            eval("(+ 1 (ccc (fn (k) (+ 10 (k 5)))))").unwrap(),
            Value::Integer(6)
        );
    }

    #[test]
    fn errors_identify_the_problem() {
        assert_eq!(
            eval("undefined-thing"),
            Err(RuntimeError::UnboundVariable {
                symbol: Symbol::new("undefined-thing")
            })
        );
        assert_eq!(
            eval("(1 2)"),
            Err(RuntimeError::NonCallableOperator {
                operator: "1".to_string(),
                type_name: "int"
            })
        );
        assert!(matches!(
            eval("(quote a b)"),
            Err(RuntimeError::MalformedForm { .. })
        ));
    }

    #[test]
    fn reader_errors_are_wrapped() {
        assert!(matches!(eval("(a"), Err(RuntimeError::ReaderError(_))));
    }
}
