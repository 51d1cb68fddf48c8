use super::{capturing, lines, run};
use crate::language::build::*;
use crate::runtime::{error::RuntimeError, value::Value};

#[test]
fn rescue_handles_a_raised_value() {
    let (value, _) = run(vec![expr_stmt(rescue(
        do_block(vec![
            raise(string("boom")),
            expr_stmt(call_fn("print", vec![string("unreachable")])),
        ]),
        vec![clause(pid("e"), string("handled"))],
    ))]);
    assert!(value.equals(&Value::string("handled")));
}

#[test]
fn ensure_around_rescue_cleans_up_once() {
    let (value, output) = run(vec![expr_stmt(ensure(
        rescue(
            do_block(vec![raise(string("bad"))]),
            vec![clause(wildcard(), string("rescued"))],
        ),
        block(vec![expr_stmt(call_fn("print", vec![string("cleanup")]))]),
    ))]);
    assert!(value.equals(&Value::string("rescued")));
    assert_eq!(output, lines(&["cleanup"]));
}

#[test]
fn ensure_runs_once_across_a_suspension() {
    let (value, output) = run(vec![
        let_(
            "p",
            proc_expr(ensure(
                do_block(vec![
                    expr_stmt(call_fn("proc_yield", vec![])),
                    expr_stmt(int(9)),
                ]),
                block(vec![expr_stmt(call_fn("print", vec![string("cleanup")]))]),
            )),
        ),
        expr_stmt(method_call(ident("p"), "value", vec![])),
    ]);
    assert!(value.equals(&Value::int(9)));
    assert_eq!(output, lines(&["cleanup"]));
}

#[test]
fn uncaught_raises_reach_the_host() {
    let mut interp = capturing();
    let err = interp
        .load_module(&module(vec![raise(string("escaped"))]))
        .unwrap_err();
    match err {
        RuntimeError::Raise { value } => assert!(value.to_string().contains("escaped")),
        other => panic!("unexpected error: {other}"),
    }
}
