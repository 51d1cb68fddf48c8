use super::{items, run};
use crate::language::build::*;
use crate::runtime::value::Value;

#[test]
fn exhausted_generators_do_not_rerun_their_body() {
    let (value, output) = run(vec![
        let_(
            "g",
            iterator(
                Some("gen"),
                vec![
                    expr_stmt(call_fn("print", vec![string("body")])),
                    yield_stmt(int(1)),
                ],
            ),
        ),
        expr_stmt(array(vec![
            method_call(ident("g"), "next", vec![]),
            method_call(ident("g"), "next", vec![]),
            method_call(ident("g"), "next", vec![]),
        ])),
    ]);
    let values = items(&value);
    assert!(values[0].equals(&Value::int(1)));
    assert!(matches!(values[1], Value::IteratorEnd));
    assert!(matches!(values[2], Value::IteratorEnd));
    assert_eq!(output, super::lines(&["body"]));
}

#[test]
fn closed_generators_end_without_running() {
    let (value, output) = run(vec![
        let_(
            "g",
            iterator(
                Some("gen"),
                vec![
                    expr_stmt(call_fn("print", vec![string("never")])),
                    yield_stmt(int(1)),
                ],
            ),
        ),
        expr_stmt(method_call(ident("g"), "close", vec![])),
        expr_stmt(method_call(ident("g"), "close", vec![])),
        expr_stmt(method_call(ident("g"), "next", vec![])),
    ]);
    assert!(matches!(value, Value::IteratorEnd));
    assert!(output.is_empty());
}

#[test]
fn generators_yield_across_procs() {
    let (value, output) = run(vec![
        let_(
            "g",
            iterator(
                Some("gen"),
                vec![yield_stmt(string("a")), yield_stmt(string("b"))],
            ),
        ),
        let_(
            "p",
            proc_expr(do_block(vec![
                let_("first", method_call(ident("g"), "next", vec![])),
                expr_stmt(call_fn("proc_yield", vec![])),
                expr_stmt(add(ident("first"), method_call(ident("g"), "next", vec![]))),
            ])),
        ),
        expr_stmt(method_call(ident("p"), "value", vec![])),
    ]);
    assert!(value.equals(&Value::string("ab")));
    assert!(output.is_empty());
}
