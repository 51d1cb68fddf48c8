use super::{capturing, items, lines, run};
use crate::language::{
    ast::{BinaryOp, Expr, Statement},
    build::*,
};
use crate::runtime::value::Value;

fn stepping_proc(name: &str) -> Expr {
    proc_expr(do_block(vec![
        expr_stmt(call_fn("print", vec![string(&format!("{name}-step1"))])),
        expr_stmt(call_fn("proc_yield", vec![])),
        expr_stmt(call_fn("print", vec![string(&format!("{name}-step2"))])),
    ]))
}

#[test]
fn yielding_procs_interleave_in_fifo_order() {
    let (_, output) = run(vec![
        let_("p1", stepping_proc("P1")),
        let_("p2", stepping_proc("P2")),
    ]);
    assert_eq!(output, lines(&["P1-step1", "P2-step1", "P1-step2", "P2-step2"]));
}

#[test]
fn cancelling_before_the_first_run_never_starts_the_body() {
    let (value, output) = run(vec![
        let_(
            "p",
            proc_expr(do_block(vec![expr_stmt(call_fn("print", vec![string("ran")]))])),
        ),
        expr_stmt(method_call(ident("p"), "cancel", vec![])),
        expr_stmt(match_expr(
            method_call(ident("p"), "status", vec![]),
            vec![
                clause(pstruct("Cancelled", vec![]), string("cancelled")),
                clause(wildcard(), string("other")),
            ],
        )),
    ]);
    assert!(value.equals(&Value::string("cancelled")));
    assert!(output.is_empty());
}

#[test]
fn future_values_are_memoized() {
    let (value, _) = run(vec![
        let_("hits", array(vec![])),
        let_(
            "f",
            spawn(do_block(vec![
                expr_stmt(method_call(ident("hits"), "push", vec![int(1)])),
                expr_stmt(int(5)),
            ])),
        ),
        let_("a", method_call(ident("f"), "value", vec![])),
        let_("b", method_call(ident("f"), "value", vec![])),
        expr_stmt(array(vec![
            ident("a"),
            ident("b"),
            method_call(ident("hits"), "len", vec![]),
        ])),
    ]);
    let values = items(&value);
    assert!(values[0].equals(&Value::int(5)));
    assert!(values[1].equals(&values[0]));
    assert!(values[2].equals(&Value::int(1)));
}

fn sum_down() -> Statement {
    fn_stmt(function(
        "sum_down",
        vec![typed_param("n", ty("i32"))],
        vec![expr_stmt(if_expr(
            eq(ident("n"), int(0)),
            block(vec![
                expr_stmt(call_fn("proc_yield", vec![])),
                expr_stmt(int(0)),
            ]),
            vec![else_clause(block(vec![expr_stmt(add(
                ident("n"),
                call_fn("sum_down", vec![sub(ident("n"), int(1))]),
            ))]))],
        ))],
    ))
}

#[test]
fn recursion_resumes_below_a_yield_at_the_base_case() {
    let (value, output) = run(vec![
        sum_down(),
        let_(
            "p",
            proc_expr(do_block(vec![
                expr_stmt(call_fn("print", vec![string("start")])),
                expr_stmt(call_fn("sum_down", vec![int(3)])),
            ])),
        ),
        let_(
            "other",
            proc_expr(do_block(vec![expr_stmt(call_fn("print", vec![string("other")]))])),
        ),
        expr_stmt(method_call(ident("p"), "value", vec![])),
    ]);
    assert!(value.equals(&Value::int(6)));
    assert_eq!(output, lines(&["start", "other"]));
}

#[test]
fn nested_suspension_runs_each_statement_once() {
    let step = |label: &str| expr_stmt(call_fn("print", vec![string(label), ident("i")]));
    let (_, output) = run(vec![expr_stmt(proc_expr(do_block(vec![
        let_("i", int(0)),
        while_loop(
            lt(ident("i"), int(2)),
            block(vec![
                expr_stmt(if_expr(
                    eq(ident("i"), int(0)),
                    block(vec![
                        step("a"),
                        expr_stmt(call_fn("proc_yield", vec![])),
                        step("b"),
                    ]),
                    vec![else_clause(block(vec![expr_stmt(match_expr(
                        ident("i"),
                        vec![clause(
                            wildcard(),
                            do_block(vec![
                                step("c"),
                                expr_stmt(call_fn("proc_yield", vec![])),
                                step("d"),
                            ]),
                        )],
                    ))]))],
                )),
                compound("i", BinaryOp::Add, int(1)),
            ]),
        ),
    ])))]);
    assert_eq!(output, lines(&["a 0", "b 0", "c 1", "d 1"]));
}

#[test]
fn cancelling_a_blocked_sender_settles_it_as_cancelled() {
    let mut interp = capturing();
    let value = interp
        .load_module(&module(vec![
            let_("ch", method_call(ident("Channel"), "new", vec![])),
            let_(
                "p",
                proc_expr(do_block(vec![
                    expr_stmt(method_call(ident("ch"), "send", vec![int(1)])),
                    expr_stmt(call_fn("print", vec![string("sent")])),
                ])),
            ),
            expr_stmt(call_fn("proc_flush", vec![])),
            expr_stmt(method_call(ident("p"), "cancel", vec![])),
            expr_stmt(method_call(ident("p"), "value", vec![])),
            expr_stmt(array(vec![
                match_expr(
                    method_call(ident("p"), "status", vec![]),
                    vec![
                        clause(pstruct("Cancelled", vec![]), string("cancelled")),
                        clause(wildcard(), string("other")),
                    ],
                ),
                method_call(ident("ch"), "try_receive", vec![]),
            ])),
        ]))
        .unwrap();
    let values = items(&value);
    assert!(values[0].equals(&Value::string("cancelled")));
    assert!(values[1].is_nil());
    assert!(interp.output().is_empty());
    assert_eq!(interp.pending_tasks(), 0);
}

fn echo(name: &str) -> Statement {
    fn_stmt(function(
        name,
        vec![param("v")],
        vec![
            expr_stmt(call_fn("print", vec![string(name)])),
            expr_stmt(ident("v")),
        ],
    ))
}

#[test]
fn failed_for_prelude_does_not_disturb_the_next_loop() {
    let (_, output) = run(vec![
        echo("iter"),
        fn_stmt(function(
            "walk",
            vec![param("v")],
            vec![for_loop(
                pid("x"),
                call_fn("iter", vec![ident("v")]),
                block(vec![
                    expr_stmt(call_fn("proc_yield", vec![])),
                    expr_stmt(call_fn("print", vec![ident("x")])),
                ]),
            )],
        )),
        expr_stmt(proc_expr(do_block(vec![
            expr_stmt(rescue(
                call_fn("walk", vec![int(5)]),
                vec![clause(wildcard(), nil())],
            )),
            expr_stmt(call_fn("walk", vec![array(vec![int(1), int(2)])])),
        ]))),
    ]);
    assert_eq!(output, lines(&["iter", "iter", "1", "2"]));
}

#[test]
fn recursion_through_a_suspended_match_subject_keeps_inner_frames() {
    let (_, output) = run(vec![
        echo("g"),
        fn_stmt(function(
            "f",
            vec![param("n")],
            vec![expr_stmt(match_expr(
                call_fn(
                    "g",
                    vec![if_expr(
                        gt(ident("n"), int(0)),
                        block(vec![expr_stmt(call_fn("f", vec![sub(ident("n"), int(1))]))]),
                        vec![else_clause(block(vec![expr_stmt(int(0))]))],
                    )],
                ),
                vec![clause(
                    pid("v"),
                    do_block(vec![
                        expr_stmt(call_fn("proc_yield", vec![])),
                        expr_stmt(add(ident("v"), int(1))),
                    ]),
                )],
            ))],
        )),
        expr_stmt(proc_expr(call_fn("print", vec![call_fn("f", vec![int(1)])]))),
    ]);
    assert_eq!(output, lines(&["g", "g", "2"]));
}
