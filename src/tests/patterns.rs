use super::{capturing, run};
use crate::language::{ast::Statement, build::*};
use crate::runtime::{error::RuntimeError, value::Value};

fn nested_shapes() -> Vec<Statement> {
    vec![
        struct_stmt(positional_struct_def("Leaf", vec![ty("i32"), ty("i32")])),
        struct_stmt(struct_def("Middle", vec![("leaf", ty("Leaf"))])),
        struct_stmt(struct_def("Outer", vec![("middle", ty("Middle")), ("tag", ty("String"))])),
    ]
}

#[test]
fn destructuring_reaches_three_levels_deep() {
    let mut body = nested_shapes();
    body.extend([
        expr_stmt(declare(
            pstruct(
                "Outer",
                vec![
                    (
                        "middle",
                        pstruct("Middle", vec![("leaf", ppositional("Leaf", vec![pid("a"), pid("b")]))]),
                    ),
                    ("tag", pid("tag")),
                ],
            ),
            struct_lit(
                "Outer",
                vec![
                    (
                        "middle",
                        struct_lit("Middle", vec![("leaf", positional_lit("Leaf", vec![int(3), int(4)]))]),
                    ),
                    ("tag", string("sum")),
                ],
            ),
        )),
        expr_stmt(array(vec![ident("tag"), add(ident("a"), ident("b"))])),
    ]);
    let (value, _) = run(body);
    assert!(value.equals(&Value::array(vec![Value::string("sum"), Value::int(7)])));
}

#[test]
fn match_falls_through_to_a_later_shape() {
    let mut body = nested_shapes();
    body.extend([
        let_("leaf", positional_lit("Leaf", vec![int(1), int(2)])),
        expr_stmt(match_expr(
            ident("leaf"),
            vec![
                clause(ppositional("Leaf", vec![pint(0), wildcard()]), string("zero")),
                clause(ppositional("Leaf", vec![wildcard(), pid("y")]), ident("y")),
            ],
        )),
    ]);
    let (value, _) = run(body);
    assert!(value.equals(&Value::int(2)));
}

#[test]
fn free_functions_are_callable_as_methods() {
    let (value, _) = run(vec![
        fn_stmt(function(
            "double",
            vec![typed_param("x", ty("i32"))],
            vec![expr_stmt(mul(ident("x"), int(2)))],
        )),
        expr_stmt(method_call(int(21), "double", vec![])),
    ]);
    assert!(value.equals(&Value::int(42)));
}

#[test]
fn interface_methods_dispatch_on_the_receiver() {
    let (value, _) = run(vec![
        struct_stmt(struct_def("Celsius", vec![("degrees", ty("i32"))])),
        interface_stmt(interface(
            "Describe",
            vec![
                signature("describe", vec![self_param()]),
                default_signature(
                    "shout",
                    vec![self_param()],
                    vec![expr_stmt(add(method_call(ident("self"), "describe", vec![]), string("!")))],
                ),
            ],
        )),
        impl_stmt(impl_def(
            "Describe",
            ty("Celsius"),
            vec![function("describe", vec![self_param()], vec![expr_stmt(string("warm"))])],
        )),
        expr_stmt(method_call(
            struct_lit("Celsius", vec![("degrees", int(30))]),
            "shout",
            vec![],
        )),
    ]);
    assert!(value.equals(&Value::string("warm!")));
}

fn show_impls() -> Vec<Statement> {
    vec![
        interface_stmt(interface("Show", vec![signature("show", vec![self_param()])])),
        struct_stmt(struct_def("Dog", vec![])),
        struct_stmt(struct_def("Box", vec![("value", ty("T"))]).with_generics(vec![generic("T", vec![])])),
        impl_stmt(impl_def(
            "Show",
            ty("Dog"),
            vec![function("show", vec![self_param()], vec![expr_stmt(string("dog"))])],
        )),
        impl_stmt(
            impl_def(
                "Show",
                ty_generic("Box", vec![ty("X")]),
                vec![function(
                    "show",
                    vec![self_param()],
                    vec![expr_stmt(add(
                        string("box of "),
                        method_call(member(ident("self"), "value"), "show", vec![]),
                    ))],
                )],
            )
            .with_generics(vec![generic("X", vec![ty("Show")])]),
        ),
    ]
}

#[test]
fn generic_impls_apply_when_their_bounds_hold() {
    let mut body = show_impls();
    body.push(expr_stmt(method_call(
        struct_lit("Box", vec![("value", struct_lit("Dog", vec![]))]),
        "show",
        vec![],
    )));
    let (value, _) = run(body);
    assert!(value.equals(&Value::string("box of dog")));
}

#[test]
fn generic_impls_do_not_apply_when_a_bound_fails() {
    let mut body = show_impls();
    body.push(expr_stmt(method_call(
        struct_lit("Box", vec![("value", int(1))]),
        "show",
        vec![],
    )));
    let err = capturing().load_module(&module(body)).unwrap_err();
    match err {
        RuntimeError::UnknownSymbol { name } => assert!(name.ends_with("show"), "{name}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn where_clauses_reject_arguments_missing_the_interface() {
    let mut body = show_impls();
    body.extend([
        fn_stmt(
            function("describe", vec![typed_param("x", ty("T"))], vec![expr_stmt(string("described"))])
                .with_generics(vec![generic("T", vec![])])
                .with_where("T", vec![ty("Show")]),
        ),
        expr_stmt(call_fn("describe", vec![struct_lit("Dog", vec![])])),
    ]);
    let (value, _) = run(body.clone());
    assert!(value.equals(&Value::string("described")));

    body.push(expr_stmt(call_fn("describe", vec![int(1)])));
    let err = capturing().load_module(&module(body)).unwrap_err();
    match err {
        RuntimeError::ConstraintViolation { type_name, interface } => {
            assert_eq!(type_name, "i32");
            assert_eq!(interface, "Show");
        }
        other => panic!("unexpected error: {other}"),
    }
}
