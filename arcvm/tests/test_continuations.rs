// Tail calls, deep recursion and re-entrant continuations

use arcvm::{Evaluator, EvaluatorConfig, RuntimeError, Symbol, Value};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

fn evaluator() -> Evaluator {
    Evaluator::new(EvaluatorConfig::default()).expect("evaluator")
}

fn read(source: &str) -> Value {
    arcvm::read_one(source).expect("datum")
}

/// Run `f` on a thread with a deliberately small native stack.
fn on_small_stack<F>(f: F) -> Value
where
    F: FnOnce() -> Value + Send + 'static,
{
    thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(f)
        .expect("spawn")
        .join()
        .expect("evaluation thread panicked")
}

#[test]
fn self_tail_calls_run_in_constant_native_stack() {
    let result = on_small_stack(|| {
        evaluator()
            .eval_source(
                "(def count-down (n) (if (is n 0) 'done (count-down (- n 1))))
                 (count-down 1000000)",
            )
            .expect("count-down")
    });
    assert_eq!(result, Value::symbol("done"));
}

#[test]
fn mutual_tail_calls_run_in_constant_native_stack() {
    let result = on_small_stack(|| {
        evaluator()
            .eval_source(
                "(def even? (n) (if (is n 0) t (odd? (- n 1))))
                 (def odd? (n) (if (is n 0) nil (even? (- n 1))))
                 (even? 100001)",
            )
            .expect("even?")
    });
    assert_eq!(result, Value::Nil);
}

#[test]
fn tail_calls_through_let_and_do_stay_flat() {
    let result = on_small_stack(|| {
        evaluator()
            .eval_source(
                "(def loop (n acc)
                   (let m (- n 1)
                     (do (if (< m 0) acc (loop m (+ acc 1))))))
                 (loop 200000 0)",
            )
            .expect("loop")
    });
    assert_eq!(result, Value::Integer(200_000));
}

#[test]
fn deep_non_tail_recursion_uses_heap_frames() {
    let result = on_small_stack(|| {
        evaluator()
            .eval_source(
                "(def sum (n) (if (is n 0) 0 (+ n (sum (- n 1)))))
                 (sum 100000)",
            )
            .expect("sum")
    });
    assert_eq!(result, Value::Integer(5_000_050_000));
}

#[test]
fn continuation_captured_mid_binding_resumes_independently() {
    let ev = evaluator();
    ev.eval_source(
        "(assign saved nil)
         (def f (a (o b (ccc (fn (k) (assign saved k) 10))) (o c (+ b 1)))
           (list a b c))",
    )
    .unwrap();

    assert_eq!(ev.eval_source("(f 1)").unwrap(), read("(1 10 11)"));
    assert_eq!(ev.eval_source("(saved 20)").unwrap(), read("(1 20 21)"));
    assert_eq!(ev.eval_source("(saved 30)").unwrap(), read("(1 30 31)"));
    // The earlier resumption did not disturb the captured partial frame.
    assert_eq!(ev.eval_source("(saved 20)").unwrap(), read("(1 20 21)"));
}

#[test]
fn each_resumption_binds_into_its_own_copy_of_the_frame() {
    let ev = evaluator();
    ev.eval_source(
        "(assign saved nil)
         (def f (a (o b (ccc (fn (k) (assign saved k) 10))) (o get (fn () (list a b))))
           (assign a (+ a 100))
           (get))",
    )
    .unwrap();

    assert_eq!(ev.eval_source("(f 1)").unwrap(), read("(101 10)"));
    // Without a fresh frame per resumption `a` would keep growing.
    assert_eq!(ev.eval_source("(saved 20)").unwrap(), read("(101 20)"));
    assert_eq!(ev.eval_source("(saved 30)").unwrap(), read("(101 30)"));
}

#[test]
fn continuation_captured_inside_nested_destructuring() {
    let ev = evaluator();
    ev.eval_source(
        "(assign saved nil)
         (def g (x (a (o b (ccc (fn (k) (assign saved k) 1))))) (list x a b))",
    )
    .unwrap();
    assert_eq!(ev.eval_source("(g 0 '(5))").unwrap(), read("(0 5 1)"));
    assert_eq!(ev.eval_source("(saved 7)").unwrap(), read("(0 5 7)"));
    assert_eq!(ev.eval_source("(saved 8)").unwrap(), read("(0 5 8)"));
}

#[test]
fn resume_through_the_host_api() {
    let ev = evaluator();
    ev.eval_source("(assign saved nil) (+ 100 (ccc (fn (k) (assign saved k) 1)))")
        .unwrap();
    let captured = match ev.global().resolve(&Symbol::new("saved")).unwrap() {
        Value::Continuation(k) => k,
        other => panic!("expected a continuation, got {:?}", other),
    };

    let mut ctx = ev.new_context();
    assert_eq!(
        ev.resume(&mut ctx, &captured, Value::Integer(5)).unwrap(),
        Value::Integer(105)
    );
    assert_eq!(ctx.result(), Some(&Value::Integer(105)));
    assert_eq!(
        ev.resume(&mut ctx, &captured, Value::Integer(-100)).unwrap(),
        Value::Integer(0)
    );
}

#[test]
fn continuation_invoked_with_no_value_delivers_nil() {
    assert_eq!(
        evaluator()
            .eval_source("(list 1 (ccc (fn (k) (k))))")
            .unwrap(),
        read("(1 nil)")
    );
}

#[test]
fn continuation_rejects_extra_values() {
    assert!(matches!(
        evaluator().eval_source("(ccc (fn (k) (k 1 2)))"),
        Err(RuntimeError::WrongArity { .. })
    ));
}

#[test]
fn reentering_a_top_level_form_replays_only_that_form() {
    let ev = evaluator();
    let result = ev
        .eval_source(
            "(assign seen nil)
             (assign again nil)
             (assign n (ccc (fn (k) (assign again k) 0)))
             (assign seen (cons n seen))
             seen",
        )
        .unwrap();
    assert_eq!(result, read("(0)"));

    // Re-entering the top-level `assign` form only replays that form.
    ev.eval_source("(again 1)").unwrap();
    assert_eq!(
        ev.global().resolve(&Symbol::new("n")).unwrap(),
        Value::Integer(1)
    );
}

#[test]
fn contexts_on_different_threads_share_the_global_environment() {
    let ev = Arc::new(evaluator());
    ev.eval_source("(def count-down (n) (if (is n 0) 'done (count-down (- n 1))))")
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ev = Arc::clone(&ev);
            thread::spawn(move || {
                let source = format!("(def f{} () {}) (list (count-down 5000) (f{}))", i, i, i);
                ev.eval_source(&source).unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.join().unwrap();
        assert_eq!(
            value,
            Value::list(vec![Value::symbol("done"), Value::Integer(i as i64)])
        );
    }
    for i in 0..4 {
        assert!(ev
            .global()
            .contains(&Symbol::new(&format!("f{}", i)))
            .unwrap());
    }
}
