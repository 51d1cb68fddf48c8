use prime_runtime::{
    config::RuntimeConfig,
    diagnostics::{init_tracing, report_config_error, report_runtime_error},
    language::{
        ast::{BinaryOp, Module},
        build::*,
    },
    runtime::Interpreter,
};
use std::env;
use std::path::Path;

fn main() {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: ./prime-runtime [config.toml]");
        std::process::exit(1);
    }

    let config = match args.get(1) {
        Some(path) => match RuntimeConfig::load(Path::new(path)) {
            Ok(config) => config,
            Err(err) => {
                report_config_error(&err);
                std::process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };

    let mut interpreter = Interpreter::new(config);
    if let Err(err) = interpreter.run_module(&pipeline()) {
        report_runtime_error(&err);
        std::process::exit(1);
    }
}

/// A producer and a consumer sharing a one-slot channel.
fn pipeline() -> Module {
    module(vec![
        let_("ch", method_call(ident("Channel"), "new", vec![int(1)])),
        let_(
            "producer",
            proc_expr(do_block(vec![
                for_loop(
                    pid("n"),
                    range(int(1), int(3), true),
                    block(vec![
                        expr_stmt(method_call(ident("ch"), "send", vec![ident("n")])),
                        expr_stmt(call_fn("print", vec![string("sent"), ident("n")])),
                    ]),
                ),
                expr_stmt(method_call(ident("ch"), "close", vec![])),
            ])),
        ),
        let_(
            "consumer",
            proc_expr(do_block(vec![
                let_("total", int(0)),
                let_("item", method_call(ident("ch"), "receive", vec![])),
                while_loop(
                    not(eq(ident("item"), nil())),
                    block(vec![
                        compound("total", BinaryOp::Add, ident("item")),
                        set("item", method_call(ident("ch"), "receive", vec![])),
                    ]),
                ),
                expr_stmt(ident("total")),
            ])),
        ),
        expr_stmt(call_fn(
            "print",
            vec![string("total"), method_call(ident("consumer"), "value", vec![])],
        )),
    ])
}
