use super::Interpreter;
use crate::language::ast::{Expr, IteratorLiteral};
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    iterator::{GeneratorState, IteratorRef, IteratorSource, IteratorState},
    outcome::{complete, Flow, Suspension},
    value::Value,
};
use std::rc::Rc;

impl Interpreter {
    /// `Iterator { gen => .. }`. The body does not run until the first `next()`.
    pub(super) fn make_generator(&mut self, literal: &Rc<IteratorLiteral>, env: &Environment) -> Value {
        let context = self.next_handle();
        let scope = env.child();
        let iterator = IteratorState::new(IteratorSource::Generator(GeneratorState {
            body: literal.clone(),
            env: scope.clone(),
            context,
            index: 0,
            result: Value::Nil,
        }));
        if let Some(binding) = &literal.binding {
            scope.define(binding, Value::Iterator(iterator.clone()));
        }
        tracing::trace!(context, "generator created");
        Value::Iterator(iterator)
    }

    pub(super) fn iterator_step(&mut self, value: &Value) -> RuntimeResult<Flow> {
        match value {
            Value::Iterator(iterator) => self.iterator_next(iterator),
            other => Err(RuntimeError::type_mismatch(format!(
                "`{}` is not an iterator",
                other.type_name()
            ))),
        }
    }

    pub(super) fn iterator_next(&mut self, iterator: &IteratorRef) -> RuntimeResult<Flow> {
        {
            let state = iterator.borrow();
            if state.finished() {
                return Ok(Flow::Completed(Value::IteratorEnd));
            }
            if state.busy {
                return Err(RuntimeError::Reentrancy {
                    message: "generator resumed while it is running".into(),
                });
            }
        }
        let stepped = iterator.borrow_mut().step_cursor();
        if let Some(value) = stepped {
            return Ok(Flow::Completed(value));
        }
        let adapter = match &iterator.borrow().source {
            IteratorSource::Adapter(inner) => Some(inner.clone()),
            _ => None,
        };
        match adapter {
            Some(inner) => {
                let value = self.call_method(&inner, "next", Vec::new())?;
                if matches!(value, Value::IteratorEnd) {
                    iterator.borrow_mut().done = true;
                }
                Ok(Flow::Completed(value))
            }
            None => self.resume_generator(iterator),
        }
    }

    fn resume_generator(&mut self, iterator: &IteratorRef) -> RuntimeResult<Flow> {
        let (body, env, context, mut index, mut result) = {
            let mut state = iterator.borrow_mut();
            let parts = match &state.source {
                IteratorSource::Generator(generator) => (
                    generator.body.clone(),
                    generator.env.clone(),
                    generator.context,
                    generator.index,
                    generator.result.clone(),
                ),
                _ => return Err(RuntimeError::type_mismatch("iterator is not backed by a generator")),
            };
            state.busy = true;
            parts
        };
        self.generators.push(iterator.clone());
        let outer_yield = self.generator_yield.take();
        self.push_context(context);
        let outcome = self.step_statements(&body.body, &env, &mut index, &mut result);
        self.pop_context();
        self.generators.pop();
        let produced = std::mem::replace(&mut self.generator_yield, outer_yield);
        let closed = {
            let mut state = iterator.borrow_mut();
            state.busy = false;
            if let IteratorSource::Generator(generator) = &mut state.source {
                generator.index = index;
                generator.result = result;
            }
            state.closed
        };
        if closed {
            self.finish_generator(iterator);
            return outcome.map(|_| Flow::Completed(Value::IteratorEnd));
        }
        match outcome {
            Ok(Flow::Suspended(Suspension::GeneratorYield)) => {
                Ok(Flow::Completed(produced.unwrap_or(Value::Nil)))
            }
            Ok(Flow::Suspended(kind @ (Suspension::Yielded | Suspension::Blocked))) => {
                Ok(Flow::Suspended(kind))
            }
            Ok(Flow::Completed(_) | Flow::Returned(_) | Flow::Suspended(Suspension::GeneratorStop)) => {
                self.finish_generator(iterator);
                Ok(Flow::Completed(Value::IteratorEnd))
            }
            Ok(other) => {
                self.finish_generator(iterator);
                Err(RuntimeError::SignalLeak {
                    signal: other.signal_name(),
                    boundary: "generator body".into(),
                })
            }
            Err(err) => {
                self.finish_generator(iterator);
                Err(err)
            }
        }
    }

    fn finish_generator(&mut self, iterator: &IteratorRef) {
        let context = {
            let mut state = iterator.borrow_mut();
            state.done = true;
            match &state.source {
                IteratorSource::Generator(generator) => Some(generator.context),
                _ => None,
            }
        };
        if let Some(context) = context {
            self.continuations.discard(context);
        }
    }

    /// Idempotent. A generator closed mid-run finishes when its body next
    /// suspends.
    pub(super) fn iterator_close(&mut self, iterator: &IteratorRef) -> RuntimeResult<Flow> {
        let (already, busy, adapter) = {
            let mut state = iterator.borrow_mut();
            let already = state.closed;
            state.closed = true;
            let adapter = match &state.source {
                IteratorSource::Adapter(inner) => Some(inner.clone()),
                _ => None,
            };
            (already, state.busy, adapter)
        };
        if already {
            return Ok(Flow::nil());
        }
        if !busy {
            self.finish_generator(iterator);
        }
        if let Some(inner) = adapter {
            if self.has_method(&inner, "close") {
                self.call_method(&inner, "close", Vec::new())?;
            }
        }
        Ok(Flow::nil())
    }

    pub(super) fn eval_yield(&mut self, value: Option<&Expr>, env: &Environment) -> RuntimeResult<Flow> {
        if self.generators.is_empty() {
            return Err(RuntimeError::unsupported("`yield` outside of a generator"));
        }
        let value = match value {
            Some(expr) => complete!(self.eval_expr(expr, env)),
            None => Value::Nil,
        };
        self.generator_yield = Some(value);
        Ok(Flow::Suspended(Suspension::GeneratorYield))
    }

    /// `gen.yield(v)` and `gen.stop()` on the controller of the generator
    /// that is currently running.
    pub(super) fn controller_signal(
        &mut self,
        iterator: &IteratorRef,
        value: Option<Value>,
    ) -> RuntimeResult<Flow> {
        let innermost = self
            .generators
            .last()
            .map_or(false, |running| Rc::ptr_eq(running, iterator));
        if !innermost || !iterator.borrow().busy {
            return Err(RuntimeError::unsupported(
                "generator controller used outside of its own body",
            ));
        }
        match value {
            Some(value) => {
                self.generator_yield = Some(value);
                Ok(Flow::Suspended(Suspension::GeneratorYield))
            }
            None => Ok(Flow::Suspended(Suspension::GeneratorStop)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::build::*;
    use crate::runtime::{error::RuntimeError, value::Value, Interpreter};

    #[test]
    fn generators_resume_after_each_yield() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let value = interp
            .load_module(&module(vec![
                let_(
                    "counter",
                    iterator(
                        Some("gen"),
                        vec![
                            let_("i", int(0)),
                            while_loop(
                                lt(ident("i"), int(3)),
                                block(vec![
                                    expr_stmt(method_call(ident("gen"), "yield", vec![ident("i")])),
                                    compound("i", crate::language::ast::BinaryOp::Add, int(1)),
                                ]),
                            ),
                        ],
                    ),
                ),
                let_("total", int(0)),
                for_loop(
                    pid("n"),
                    ident("counter"),
                    block(vec![compound("total", crate::language::ast::BinaryOp::Add, ident("n"))]),
                ),
                expr_stmt(ident("total")),
            ]))
            .unwrap();
        assert!(value.equals(&Value::int(3)));
    }

    #[test]
    fn next_inside_its_own_body_is_a_reentry_error() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let err = interp
            .load_module(&module(vec![
                let_(
                    "g",
                    iterator(Some("gen"), vec![expr_stmt(method_call(ident("gen"), "next", vec![]))]),
                ),
                expr_stmt(method_call(ident("g"), "next", vec![])),
            ]))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Reentrancy { .. }));
    }

    #[test]
    fn stop_ends_the_sequence() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let value = interp
            .load_module(&module(vec![
                let_(
                    "g",
                    iterator(
                        Some("gen"),
                        vec![
                            yield_stmt(int(1)),
                            expr_stmt(method_call(ident("gen"), "stop", vec![])),
                            yield_stmt(int(2)),
                        ],
                    ),
                ),
                expr_stmt(method_call(ident("g"), "next", vec![])),
                expr_stmt(method_call(ident("g"), "next", vec![])),
            ]))
            .unwrap();
        assert!(matches!(value, Value::IteratorEnd));
    }
}
