//! End-to-end scenarios driven through whole modules.

mod channels;
mod errors;
mod generators;
mod operators;
mod patterns;
mod scheduling;

use crate::config::RuntimeConfig;
use crate::language::{ast::Statement, build::module};
use crate::runtime::{value::Value, Interpreter};

pub(crate) fn capturing() -> Interpreter {
    let mut config = RuntimeConfig::default();
    config.host.capture_output = true;
    Interpreter::new(config)
}

/// Loads `body` and drains every task it scheduled.
pub(crate) fn run(body: Vec<Statement>) -> (Value, Vec<String>) {
    let mut interp = capturing();
    let value = interp.run_module(&module(body)).unwrap();
    (value, interp.output())
}

pub(crate) fn lines(expected: &[&str]) -> Vec<String> {
    expected.iter().map(|line| line.to_string()).collect()
}

pub(crate) fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.borrow().clone(),
        other => panic!("expected an array, got {other}"),
    }
}
