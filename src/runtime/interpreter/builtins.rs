//! Globals every interpreter starts with: status and error structs, the
//! `Error` interface, `DivMod` and `Ordering`, scheduler natives and the
//! `Channel`/`Mutex`/`Map` constructors.

use super::{members::optional_callback, Interpreter};
use crate::language::{
    ast::{Expr, Statement, StructDef},
    build::*,
};
use crate::runtime::{
    error::{RuntimeError, RuntimeResult},
    outcome::Flow,
    sync::{ChannelState, MutexState},
    task::{AwaitableKind, NativeAwaitable},
    value::{NativeFunction, Value},
};
use std::cell::RefCell;
use std::rc::Rc;

/// Struct definitions the runtime itself instantiates.
pub(super) struct Prelude {
    pub proc_error: Rc<StructDef>,
    pub pending: Rc<StructDef>,
    pub resolved: Rc<StructDef>,
    pub cancelled: Rc<StructDef>,
    pub failed: Rc<StructDef>,
    pub channel_closed: Rc<StructDef>,
    pub channel_send_on_closed: Rc<StructDef>,
    pub mutex_unlocked: Rc<StructDef>,
    pub div_mod: Rc<StructDef>,
}

impl Prelude {
    pub fn new() -> Self {
        Self {
            proc_error: Rc::new(struct_def("ProcError", vec![("details", ty("String"))])),
            pending: Rc::new(struct_def("Pending", vec![])),
            resolved: Rc::new(struct_def("Resolved", vec![])),
            cancelled: Rc::new(struct_def("Cancelled", vec![])),
            failed: Rc::new(struct_def("Failed", vec![("error", ty("ProcError"))])),
            channel_closed: Rc::new(struct_def("ChannelClosed", vec![])),
            channel_send_on_closed: Rc::new(struct_def("ChannelSendOnClosed", vec![])),
            mutex_unlocked: Rc::new(struct_def("MutexUnlocked", vec![])),
            div_mod: Rc::new(
                struct_def("DivMod", vec![("quotient", ty("T")), ("remainder", ty("T"))])
                    .with_generics(vec![generic("T", vec![])]),
            ),
        }
    }

    fn definitions(&self) -> Vec<Rc<StructDef>> {
        vec![
            self.proc_error.clone(),
            self.pending.clone(),
            self.resolved.clone(),
            self.cancelled.clone(),
            self.failed.clone(),
            self.channel_closed.clone(),
            self.channel_send_on_closed.clone(),
            self.mutex_unlocked.clone(),
            self.div_mod.clone(),
            Rc::new(struct_def("Less", vec![])),
            Rc::new(struct_def("Equal", vec![])),
            Rc::new(struct_def("Greater", vec![])),
        ]
    }
}

fn error_impl(target: &str, message: Expr) -> Statement {
    impl_stmt(impl_def(
        "Error",
        ty(target),
        vec![function("message", vec![self_param()], vec![expr_stmt(message)])],
    ))
}

impl Interpreter {
    pub(super) fn install_prelude(&mut self) {
        if let Err(err) = self.load_prelude() {
            tracing::error!(error = %err, "failed to install prelude");
        }
    }

    fn load_prelude(&mut self) -> RuntimeResult<()> {
        let mut body: Vec<Statement> = self
            .prelude
            .definitions()
            .into_iter()
            .map(Statement::Struct)
            .collect();
        body.extend([
            union_stmt(
                "ProcStatus",
                vec![ty("Pending"), ty("Resolved"), ty("Cancelled"), ty("Failed")],
            ),
            union_stmt("Ordering", vec![ty("Less"), ty("Equal"), ty("Greater")]),
            interface_stmt(interface(
                "Error",
                vec![
                    signature("message", vec![self_param()]),
                    default_signature("cause", vec![self_param()], vec![expr_stmt(nil())]),
                ],
            )),
            error_impl("ProcError", member(ident("self"), "details")),
            error_impl("ChannelClosed", string("close of closed channel")),
            error_impl("ChannelSendOnClosed", string("send on closed channel")),
            error_impl("MutexUnlocked", string("unlock of unlocked mutex")),
        ]);
        self.load_module(&module(body))?;
        self.install_natives();
        self.install_constructors();
        tracing::debug!("prelude installed");
        Ok(())
    }

    fn install_natives(&mut self) {
        let natives = [
            NativeFunction::new("print", None, |interp, args| {
                let mut parts = Vec::with_capacity(args.len());
                for arg in &args {
                    parts.push(interp.display_value(arg)?);
                }
                interp.output.write_line(parts.join(" "));
                Ok(Flow::nil())
            }),
            NativeFunction::new("proc_yield", Some(0), |interp, _| interp.proc_yield()),
            NativeFunction::new("proc_cancelled", Some(0), |interp, _| {
                Ok(Flow::Completed(interp.proc_cancelled()?))
            }),
            NativeFunction::new("proc_flush", None, |interp, args| {
                let limit = match args.first() {
                    None => interp.config.scheduler.max_steps,
                    Some(value) => value
                        .as_integer()
                        .and_then(|limit| usize::try_from(limit).ok())
                        .ok_or_else(|| RuntimeError::type_mismatch("proc_flush expects a non-negative step limit"))?,
                };
                interp.flush(limit)?;
                Ok(Flow::nil())
            }),
            NativeFunction::new("proc_pending_tasks", Some(0), |interp, _| {
                Ok(Flow::Completed(Value::int(interp.executor.pending_tasks() as i128)))
            }),
            NativeFunction::new("await_default", None, |_, args| {
                let callback = optional_callback("await_default", &args, 0)?;
                Ok(Flow::Completed(NativeAwaitable::value(AwaitableKind::Default { callback })))
            }),
            NativeFunction::new("await_sleep_ms", None, |interp, args| {
                let millis = args
                    .first()
                    .and_then(Value::as_integer)
                    .ok_or_else(|| RuntimeError::type_mismatch("await_sleep_ms expects a duration in milliseconds"))?;
                let callback = optional_callback("await_sleep_ms", &args, 1)?;
                let deadline_ms = interp.platform.now_monotonic_ms().saturating_add(millis.max(0));
                Ok(Flow::Completed(NativeAwaitable::value(AwaitableKind::Sleep {
                    deadline_ms,
                    callback,
                })))
            }),
        ];
        for native in natives {
            if let Value::Native(function) = &native {
                self.globals.define(&function.name, native.clone());
            }
        }
        self.globals.define("IteratorEnd", Value::IteratorEnd);
    }

    /// `Channel.new(capacity)`, `Mutex.new()` and `Map.new()`.
    fn install_constructors(&mut self) {
        self.registry.register(
            "Channel",
            "new",
            NativeFunction::new("Channel.new", None, |interp, args| {
                let capacity = match args.first() {
                    None => 0,
                    Some(value) => value
                        .as_integer()
                        .and_then(|capacity| usize::try_from(capacity).ok())
                        .ok_or_else(|| RuntimeError::type_mismatch("channel capacity must be a non-negative integer"))?,
                };
                let id = interp.next_handle();
                tracing::trace!(channel = id, capacity, "channel created");
                Ok(Flow::Completed(Value::Channel(ChannelState::new(id, capacity))))
            }),
            false,
        );
        self.registry.register(
            "Mutex",
            "new",
            NativeFunction::new("Mutex.new", Some(0), |interp, _| {
                let id = interp.next_handle();
                Ok(Flow::Completed(Value::Mutex(MutexState::new(id))))
            }),
            false,
        );
        self.registry.register(
            "Map",
            "new",
            NativeFunction::new("Map.new", Some(0), |_, _| {
                Ok(Flow::Completed(Value::Map(Rc::new(RefCell::new(Vec::new())))))
            }),
            false,
        );
        for package in ["Channel", "Mutex", "Map"] {
            self.globals.define(package, Value::Package(package.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::build::*;
    use crate::runtime::{value::Value, Interpreter};

    #[test]
    fn print_joins_arguments_with_spaces() {
        let mut config = RuntimeConfig::default();
        config.host.capture_output = true;
        let mut interp = Interpreter::new(config);
        interp
            .load_module(&module(vec![expr_stmt(call_fn(
                "print",
                vec![string("total"), int(3), bool_lit(true)],
            ))]))
            .unwrap();
        assert_eq!(interp.output(), vec!["total 3 true".to_string()]);
    }

    #[test]
    fn proc_errors_implement_error() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let value = interp
            .load_module(&module(vec![expr_stmt(method_call(
                struct_lit("ProcError", vec![("details", string("disk full"))]),
                "message",
                vec![],
            ))]))
            .unwrap();
        assert!(value.equals(&Value::string("disk full")));
    }

    #[test]
    fn maps_are_built_through_their_package() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let value = interp
            .load_module(&module(vec![
                let_("m", method_call(ident("Map"), "new", vec![])),
                expr_stmt(method_call(ident("m"), "set", vec![string("k"), int(9)])),
                expr_stmt(method_call(ident("m"), "get", vec![string("k")])),
            ]))
            .unwrap();
        assert!(value.equals(&Value::int(9)));
    }
}
