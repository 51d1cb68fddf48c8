use super::{capturing, items, lines, run};
use crate::language::{
    ast::{BinaryOp, Expr, Statement, UnaryOp},
    build::*,
    types::{FloatKind, IntegerKind, TypeExpr},
};
use crate::runtime::{error::RuntimeError, value::Value};

fn assert_ints(value: &Value, expected: &[i128]) {
    let values = items(value);
    assert_eq!(values.len(), expected.len());
    for (actual, want) in values.iter().zip(expected) {
        assert!(actual.equals(&Value::int(*want)), "expected {want}, got {actual}");
    }
}

fn raised(body: Vec<Statement>) -> String {
    let err = capturing().load_module(&module(body)).unwrap_err();
    match err {
        RuntimeError::Raise { value } => value.to_string(),
        other => panic!("expected a raise, got {other}"),
    }
}

#[test]
fn floor_division_and_div_mod_round_toward_negative_infinity() {
    let (value, _) = run(vec![
        let_("d", binary(BinaryOp::DivMod, int(-7), int(2))),
        expr_stmt(array(vec![
            binary(BinaryOp::FloorDiv, int(-7), int(2)),
            binary(BinaryOp::FloorDiv, int(7), int(2)),
            member(ident("d"), "quotient"),
            member(ident("d"), "remainder"),
            binary(BinaryOp::Rem, int(-7), int(2)),
        ])),
    ]);
    assert_ints(&value, &[-4, 3, -4, 1, -1]);
}

#[test]
fn div_mod_is_a_prelude_struct() {
    let (value, _) = run(vec![expr_stmt(match_expr(
        binary(BinaryOp::DivMod, int(17), int(5)),
        vec![clause(
            pstruct("DivMod", vec![("quotient", pid("q")), ("remainder", pid("r"))]),
            array(vec![ident("q"), ident("r")]),
        )],
    ))]);
    assert_ints(&value, &[3, 2]);
}

#[test]
fn power_and_bitwise_operators_on_integers() {
    let (value, _) = run(vec![expr_stmt(array(vec![
        binary(BinaryOp::Pow, int(2), int(10)),
        binary(BinaryOp::BitAnd, int(12), int(10)),
        binary(BinaryOp::BitOr, int(12), int(10)),
        binary(BinaryOp::BitXor, int(12), int(10)),
        binary(BinaryOp::Shl, int(1), int(4)),
        binary(BinaryOp::Shr, int(-16), int(2)),
        unary(UnaryOp::BitNot, int(5)),
    ]))]);
    assert_ints(&value, &[1024, 8, 14, 6, 16, -4, -6]);
}

#[test]
fn bitwise_not_on_unsigned_stays_in_range() {
    let (value, _) = run(vec![expr_stmt(unary(UnaryOp::BitNot, int_typed(0, IntegerKind::U8)))]);
    match value {
        Value::Integer { value, kind } => {
            assert_eq!(value, 255);
            assert_eq!(kind, IntegerKind::U8);
        }
        other => panic!("expected an integer, got {other}"),
    }
}

#[test]
fn float_power_uses_real_exponents() {
    let (value, _) = run(vec![expr_stmt(binary(BinaryOp::Pow, float(4.0), float(0.5)))]);
    assert!(value.equals(&Value::Float { value: 2.0, kind: FloatKind::F64 }));
}

#[test]
fn out_of_range_shifts_and_exponents_raise() {
    let message = raised(vec![expr_stmt(binary(BinaryOp::Shl, int(1), int(32)))]);
    assert!(message.contains("shift amount"), "{message}");
    let message = raised(vec![expr_stmt(binary(BinaryOp::Shl, int(1), int(31)))]);
    assert!(message.contains("overflow"), "{message}");
    let message = raised(vec![expr_stmt(binary(BinaryOp::Pow, int(2), int(-1)))]);
    assert!(message.contains("negative"), "{message}");
    let message = raised(vec![expr_stmt(binary(BinaryOp::FloorDiv, int(1), int(0)))]);
    assert!(message.contains("division by zero"), "{message}");
}

fn money() -> Vec<Statement> {
    let cents = |name: &str| member(ident(name), "cents");
    let other = || param("other");
    vec![
        struct_stmt(struct_def("Money", vec![("cents", ty("i64"))])),
        interface_stmt(interface("Add", vec![signature("add", vec![self_param(), other()])])),
        interface_stmt(interface("Neg", vec![signature("neg", vec![self_param()])])),
        interface_stmt(interface("Eq", vec![signature("eq", vec![self_param(), other()])])),
        interface_stmt(interface("Ord", vec![signature("cmp", vec![self_param(), other()])])),
        impl_stmt(impl_def(
            "Add",
            ty("Money"),
            vec![function(
                "add",
                vec![self_param(), other()],
                vec![expr_stmt(struct_lit(
                    "Money",
                    vec![("cents", add(cents("self"), cents("other")))],
                ))],
            )],
        )),
        impl_stmt(impl_def(
            "Neg",
            ty("Money"),
            vec![function(
                "neg",
                vec![self_param()],
                vec![expr_stmt(struct_lit("Money", vec![("cents", sub(int(0), cents("self")))]))],
            )],
        )),
        // equal when the whole-unit amounts agree
        impl_stmt(impl_def(
            "Eq",
            ty("Money"),
            vec![function(
                "eq",
                vec![self_param(), other()],
                vec![expr_stmt(eq(
                    binary(BinaryOp::FloorDiv, cents("self"), int(100)),
                    binary(BinaryOp::FloorDiv, cents("other"), int(100)),
                ))],
            )],
        )),
        impl_stmt(impl_def(
            "Ord",
            ty("Money"),
            vec![function(
                "cmp",
                vec![self_param(), other()],
                vec![expr_stmt(if_expr(
                    lt(cents("self"), cents("other")),
                    block(vec![expr_stmt(ident("Less"))]),
                    vec![
                        elsif(
                            gt(cents("self"), cents("other")),
                            block(vec![expr_stmt(ident("Greater"))]),
                        ),
                        else_clause(block(vec![expr_stmt(ident("Equal"))])),
                    ],
                ))],
            )],
        )),
    ]
}

fn cents(amount: i128) -> Expr {
    struct_lit("Money", vec![("cents", int(amount))])
}

#[test]
fn arithmetic_operators_dispatch_to_interface_impls() {
    let mut body = money();
    body.extend([
        let_("total", add(cents(150), cents(25))),
        compound("total", BinaryOp::Add, cents(5)),
        expr_stmt(array(vec![
            member(ident("total"), "cents"),
            member(unary(UnaryOp::Neg, ident("total")), "cents"),
        ])),
    ]);
    let (value, _) = run(body);
    assert_ints(&value, &[180, -180]);
}

#[test]
fn comparisons_dispatch_to_eq_and_ord_impls() {
    let mut body = money();
    body.push(expr_stmt(array(vec![
        eq(cents(120), cents(199)),
        binary(BinaryOp::NotEq, cents(120), cents(200)),
        lt(cents(1), cents(2)),
        binary(BinaryOp::GtEq, cents(1), cents(2)),
        binary(BinaryOp::LtEq, cents(2), cents(2)),
    ])));
    let (value, _) = run(body);
    let flags: Vec<bool> = items(&value).iter().map(Value::truthy).collect();
    assert_eq!(flags, vec![true, true, true, false, true]);
}

#[test]
fn structs_without_an_operator_impl_are_rejected() {
    let err = capturing()
        .load_module(&module(vec![
            struct_stmt(struct_def("Plain", vec![("n", ty("i32"))])),
            expr_stmt(sub(
                struct_lit("Plain", vec![("n", int(1))]),
                struct_lit("Plain", vec![("n", int(2))]),
            )),
        ]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }), "{err}");
}

fn helpers() -> Vec<Statement> {
    vec![
        fn_stmt(function(
            "minus",
            vec![param("a"), param("b")],
            vec![expr_stmt(sub(ident("a"), ident("b")))],
        )),
        fn_stmt(function("double", vec![param("v")], vec![expr_stmt(mul(ident("v"), int(2)))])),
    ]
}

#[test]
fn pipe_stages_take_the_subject_in_each_form() {
    let mut body = helpers();
    body.push(expr_stmt(array(vec![
        // callable stage: `5 |> double`
        pipe(int(5), ident("double")),
        // call stage prepends the subject: `10 |> minus(3)`
        pipe(int(10), call_fn("minus", vec![int(3)])),
        // topic stage: `5 |> % * % + 1`
        pipe(int(5), add(mul(topic(), topic()), int(1))),
        // placeholder stage: `10 |> minus(1, @)`
        pipe(int(10), call_fn("minus", vec![int(1), placeholder()])),
        // chained: `3 |> double |> minus(1)`
        pipe(pipe(int(3), ident("double")), call_fn("minus", vec![int(1)])),
        // bound method stage: `[1, 2, 3] |> #len()`
        pipe(array(vec![int(1), int(2), int(3)]), call(implicit("len"), vec![])),
    ])));
    let (value, _) = run(body);
    assert_ints(&value, &[10, 7, 26, -9, 5, 3]);
}

#[test]
fn pipe_subject_is_evaluated_once_across_suspension() {
    let (_, output) = run(vec![
        fn_stmt(function(
            "source",
            vec![],
            vec![
                expr_stmt(call_fn("print", vec![string("source")])),
                expr_stmt(int(10)),
            ],
        )),
        fn_stmt(function(
            "step",
            vec![param("v"), param("n")],
            vec![
                expr_stmt(call_fn("proc_yield", vec![])),
                expr_stmt(add(ident("v"), ident("n"))),
            ],
        )),
        expr_stmt(proc_expr(call_fn(
            "print",
            vec![pipe(call_fn("source", vec![]), call_fn("step", vec![int(1)]))],
        ))),
        expr_stmt(proc_expr(call_fn(
            "print",
            vec![pipe(call_fn("source", vec![]), call_fn("step", vec![placeholder(), int(2)]))],
        ))),
    ]);
    let mut sorted = output.clone();
    sorted.sort();
    assert_eq!(sorted, lines(&["11", "12", "source", "source"]));
}

#[test]
fn placeholder_lambdas_take_one_argument_per_placeholder() {
    let (value, _) = run(vec![
        let_(
            "f",
            placeholder_fn(add(placeholder_at(1), mul(placeholder_at(2), int(10)))),
        ),
        let_("inc", placeholder_fn(add(placeholder(), int(1)))),
        expr_stmt(array(vec![
            call(ident("f"), vec![int(1), int(2)]),
            call(ident("inc"), vec![int(41)]),
        ])),
    ]);
    assert_ints(&value, &[21, 42]);
}

#[test]
fn placeholder_lambdas_check_arity() {
    let err = capturing()
        .load_module(&module(vec![
            let_("f", placeholder_fn(add(placeholder_at(1), placeholder_at(2)))),
            expr_stmt(call(ident("f"), vec![int(1)])),
        ]))
        .unwrap_err();
    assert!(
        matches!(err, RuntimeError::ArityMismatch { expected: 2, received: 1, .. }),
        "{err}"
    );
}

#[test]
fn stray_topic_and_placeholder_are_errors() {
    for expr in [topic(), placeholder()] {
        let err = capturing().load_module(&module(vec![expr_stmt(expr)])).unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported { .. }), "{err}");
    }
}

#[test]
fn map_literals_spread_and_override_in_order() {
    let (value, _) = run(vec![
        let_("base", map_lit(vec![(string("a"), int(1)), (string("b"), int(2))])),
        let_(
            "m",
            map_entries(vec![
                pair(string("a"), int(0)),
                spread(ident("base")),
                pair(string("b"), int(20)),
                pair(string("c"), int(3)),
            ]),
        ),
        expr_stmt(array(vec![
            index(ident("m"), string("a")),
            index(ident("m"), string("b")),
            index(ident("m"), string("c")),
            method_call(ident("m"), "len", vec![]),
        ])),
    ]);
    assert_ints(&value, &[1, 20, 3, 3]);
}

#[test]
fn spreading_a_non_map_is_a_type_error() {
    let err = capturing()
        .load_module(&module(vec![expr_stmt(map_entries(vec![spread(int(1))]))]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }), "{err}");
}

#[test]
fn implicit_members_read_the_topic_or_self() {
    let (value, _) = run(vec![
        struct_stmt(struct_def("Dog", vec![("name", ty("String")), ("sound", ty("String"))])),
        methods_stmt(
            ty("Dog"),
            vec![function(
                "greet",
                vec![self_param()],
                vec![expr_stmt(add(string("hi "), implicit("name")))],
            )],
        ),
        let_("rex", struct_lit("Dog", vec![("name", string("rex")), ("sound", string("woof"))])),
        expr_stmt(array(vec![
            method_call(ident("rex"), "greet", vec![]),
            pipe(
                ident("rex"),
                add(implicit("name"), add(string(" says "), member(topic(), "sound"))),
            ),
        ])),
    ]);
    let values = items(&value);
    assert!(values[0].equals(&Value::string("hi rex")));
    assert!(values[1].equals(&Value::string("rex says woof")));
}

fn id_alias() -> Vec<Statement> {
    vec![
        type_alias("Id", vec![], TypeExpr::Union(vec![ty("i64"), ty("String")])),
        fn_stmt(function(
            "show_id",
            vec![typed_param("id", ty("Id"))],
            vec![expr_stmt(interpolate(vec![text("#"), splice(ident("id"))]))],
        )),
    ]
}

#[test]
fn type_aliases_stand_in_for_their_target() {
    let mut body = id_alias();
    body.push(expr_stmt(array(vec![
        call_fn("show_id", vec![int(7)]),
        call_fn("show_id", vec![string("x")]),
    ])));
    let (value, _) = run(body);
    let values = items(&value);
    assert!(values[0].equals(&Value::string("#7")));
    assert!(values[1].equals(&Value::string("#x")));

    let mut body = id_alias();
    body.push(expr_stmt(call_fn("show_id", vec![bool_lit(true)])));
    let err = capturing().load_module(&module(body)).unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }), "{err}");
}

#[test]
fn generic_aliases_substitute_their_arguments() {
    let (value, _) = run(vec![
        type_alias("List", vec![generic("T", vec![])], ty_generic("Array", vec![ty("T")])),
        expr_stmt(match_expr(
            array(vec![int(1), int(2)]),
            vec![
                clause(typed(wildcard(), ty_generic("List", vec![ty("String")])), string("strings")),
                clause(typed(wildcard(), ty_generic("List", vec![ty("i32")])), string("ints")),
            ],
        )),
    ]);
    assert!(value.equals(&Value::string("ints")));
}

#[test]
fn cyclic_aliases_match_nothing() {
    let (value, _) = run(vec![
        type_alias("Ping", vec![], ty("Pong")),
        type_alias("Pong", vec![], ty("Ping")),
        expr_stmt(match_expr(
            int(1),
            vec![
                clause(typed(wildcard(), ty("Ping")), string("ping")),
                clause(wildcard(), string("neither")),
            ],
        )),
    ]);
    assert!(value.equals(&Value::string("neither")));
}

#[test]
fn aliases_cannot_shadow_structs() {
    let err = capturing()
        .load_module(&module(vec![
            struct_stmt(struct_def("Point", vec![])),
            type_alias("Point", vec![], ty("i32")),
        ]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }), "{err}");
}
