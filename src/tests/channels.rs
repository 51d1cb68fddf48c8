use super::{capturing, items, run};
use crate::language::build::*;
use crate::runtime::value::Value;

#[test]
fn buffered_channel_scenario() {
    let (value, _) = run(vec![
        let_("ch", method_call(ident("Channel"), "new", vec![int(1)])),
        expr_stmt(method_call(ident("ch"), "send", vec![int(11)])),
        let_("first", method_call(ident("ch"), "receive", vec![])),
        let_("accepted", method_call(ident("ch"), "try_send", vec![int(1)])),
        let_("full", method_call(ident("ch"), "try_send", vec![int(2)])),
        let_("drained", method_call(ident("ch"), "receive", vec![])),
        expr_stmt(method_call(ident("ch"), "close", vec![])),
        expr_stmt(array(vec![
            ident("first"),
            ident("accepted"),
            ident("full"),
            ident("drained"),
            method_call(ident("ch"), "receive", vec![]),
            method_call(ident("ch"), "try_receive", vec![]),
            method_call(ident("ch"), "is_closed", vec![]),
        ])),
    ]);
    let expected = [
        Value::int(11),
        Value::Bool(true),
        Value::Bool(false),
        Value::int(1),
        Value::Nil,
        Value::Nil,
        Value::Bool(true),
    ];
    let values = items(&value);
    assert_eq!(values.len(), expected.len());
    for (actual, expected) in values.iter().zip(expected.iter()) {
        assert!(actual.equals(expected), "{actual} != {expected}");
    }
}

#[test]
fn closing_wakes_every_blocked_receiver_with_nil() {
    let receiver = || {
        proc_expr(do_block(vec![
            let_("v", method_call(ident("ch"), "receive", vec![])),
            expr_stmt(eq(ident("v"), nil())),
        ]))
    };
    let (value, _) = run(vec![
        let_("ch", method_call(ident("Channel"), "new", vec![])),
        let_("a", receiver()),
        let_("b", receiver()),
        expr_stmt(call_fn("proc_flush", vec![])),
        expr_stmt(method_call(ident("ch"), "close", vec![])),
        expr_stmt(array(vec![
            method_call(ident("a"), "value", vec![]),
            method_call(ident("b"), "value", vec![]),
        ])),
    ]);
    for woken in items(&value) {
        assert!(woken.equals(&Value::Bool(true)));
    }
}

#[test]
fn unlocking_an_unlocked_mutex_raises_its_struct() {
    let (value, _) = run(vec![
        let_("m", method_call(ident("Mutex"), "new", vec![])),
        expr_stmt(rescue(
            method_call(ident("m"), "unlock", vec![]),
            vec![
                clause(pstruct("MutexUnlocked", vec![]), string("unlocked")),
                clause(wildcard(), string("other")),
            ],
        )),
    ]);
    assert!(value.equals(&Value::string("unlocked")));
}

#[test]
fn blocked_senders_fail_when_the_channel_closes() {
    let mut interp = capturing();
    let value = interp
        .load_module(&module(vec![
            let_("ch", method_call(ident("Channel"), "new", vec![])),
            let_(
                "p",
                proc_expr(rescue(
                    method_call(ident("ch"), "send", vec![int(3)]),
                    vec![clause(
                        pstruct("ChannelSendOnClosed", vec![]),
                        string("send failed"),
                    )],
                )),
            ),
            expr_stmt(call_fn("proc_flush", vec![])),
            expr_stmt(method_call(ident("ch"), "close", vec![])),
            expr_stmt(method_call(ident("p"), "value", vec![])),
        ]))
        .unwrap();
    assert!(value.equals(&Value::string("send failed")));
}

#[test]
fn lock_waiters_run_in_arrival_order() {
    let worker = |name: &str| {
        proc_expr(do_block(vec![
            expr_stmt(method_call(ident("m"), "lock", vec![])),
            expr_stmt(call_fn("print", vec![string(name)])),
            expr_stmt(method_call(ident("m"), "unlock", vec![])),
        ]))
    };
    let (_, output) = run(vec![
        let_("m", method_call(ident("Mutex"), "new", vec![])),
        expr_stmt(method_call(ident("m"), "lock", vec![])),
        let_("first", worker("first")),
        let_("second", worker("second")),
        expr_stmt(call_fn("proc_flush", vec![])),
        expr_stmt(method_call(ident("m"), "unlock", vec![])),
    ]);
    assert_eq!(output, super::lines(&["first", "second"]));
}

#[test]
fn a_different_task_may_release_a_held_mutex() {
    let (value, output) = run(vec![
        let_("m", method_call(ident("Mutex"), "new", vec![])),
        expr_stmt(method_call(ident("m"), "lock", vec![])),
        let_(
            "releaser",
            proc_expr(do_block(vec![
                expr_stmt(method_call(ident("m"), "unlock", vec![])),
                expr_stmt(call_fn("print", vec![string("released")])),
            ])),
        ),
        expr_stmt(call_fn("proc_flush", vec![])),
        expr_stmt(method_call(ident("m"), "lock", vec![])),
        expr_stmt(method_call(ident("m"), "unlock", vec![])),
        expr_stmt(string("relocked")),
    ]);
    assert_eq!(output, super::lines(&["released"]));
    assert!(value.equals(&Value::string("relocked")));
}
