//! Member access and the methods built into runtime values.

use super::{expressions::map_insert, impl_resolution::method_closure, Interpreter};
use crate::language::ast::{Expr, StructKind};
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    iterator::{IteratorSource, IteratorState},
    outcome::{complete, Flow},
    task::{AwaitableKind, NativeAwaitable, TaskRef, WakerRef},
    value::{BoundMethod, NativeFunction, StructInstance, Value},
};
use std::collections::HashMap;

impl Interpreter {
    pub(super) fn eval_member(&mut self, object: &Expr, member: &str, env: &Environment) -> RuntimeResult<Flow> {
        let object = complete!(self.eval_expr(object, env));
        Ok(Flow::Completed(self.member_value(&object, member, env)?))
    }

    pub(super) fn member_value(&mut self, object: &Value, member: &str, env: &Environment) -> RuntimeResult<Value> {
        match object {
            Value::Struct(instance) => {
                if let Some(value) = instance.get_field(member) {
                    return Ok(value);
                }
                if let Some(value) = member.parse::<usize>().ok().and_then(|at| instance.get_index(at)) {
                    return Ok(value);
                }
            }
            Value::StructDef(def) => {
                if let Some(method) = self.static_method(&def.name, member) {
                    return Ok(method);
                }
                if def.kind != StructKind::Singleton {
                    return Err(RuntimeError::UnknownSymbol {
                        name: format!("{}.{member}", def.name),
                    });
                }
                let instance = Value::Struct(StructInstance::new(def.clone(), Vec::new(), Vec::new()));
                return self.member_value(&instance, member, env);
            }
            Value::ImplNamespace(namespace) => {
                return match namespace.methods.get(member) {
                    Some(def) => Ok(method_closure(def, &namespace.env, &namespace.target, HashMap::new())),
                    None => Err(RuntimeError::UnknownSymbol {
                        name: format!("{}.{member}", namespace.name),
                    }),
                };
            }
            Value::Package(package) => return self.registry.lookup(package, member),
            Value::Error(record) if member == "payload" => {
                return Ok(record.payload.clone().unwrap_or(Value::Nil));
            }
            _ => {}
        }
        match self.find_method(object, member, env)? {
            Some(method) => Ok(method),
            None => Err(RuntimeError::UnknownSymbol {
                name: format!("{}.{member}", object.type_name()),
            }),
        }
    }

    /// Methods every value of a built-in kind carries, already bound to
    /// `receiver`.
    pub(super) fn builtin_method(&self, receiver: &Value, name: &str) -> Option<Value> {
        let native = match receiver {
            Value::Array(items) => {
                let items = items.clone();
                match name {
                    "len" => method(name, 0, move |_, _| done(Value::int(items.borrow().len() as i128))),
                    "is_empty" => method(name, 0, move |_, _| done(Value::Bool(items.borrow().is_empty()))),
                    "push" => method(name, 1, move |_, args| {
                        items.borrow_mut().push(args[1].clone());
                        done(Value::Nil)
                    }),
                    "pop" => method(name, 0, move |_, _| done(items.borrow_mut().pop().unwrap_or(Value::Nil))),
                    "get" => method(name, 1, move |_, args| {
                        let item = args[1]
                            .as_integer()
                            .and_then(|at| usize::try_from(at).ok())
                            .and_then(|at| items.borrow().get(at).cloned());
                        done(item.unwrap_or(Value::Nil))
                    }),
                    "set" => method(name, 2, move |_, args| {
                        let mut items = items.borrow_mut();
                        let len = items.len();
                        let slot = args[1]
                            .as_integer()
                            .and_then(|at| usize::try_from(at).ok())
                            .and_then(|at| items.get_mut(at))
                            .ok_or_else(|| {
                                RuntimeError::type_mismatch(format!("index {} out of bounds for length {len}", args[1]))
                            })?;
                        *slot = args[2].clone();
                        done(Value::Nil)
                    }),
                    "iterator" => method(name, 0, move |_, _| {
                        done(Value::Iterator(IteratorState::new(IteratorSource::Array {
                            items: items.clone(),
                            index: 0,
                        })))
                    }),
                    _ => return None,
                }
            }
            Value::String(text) => {
                let text = text.clone();
                match name {
                    "len" => method(name, 0, move |_, _| done(Value::int(text.chars().count() as i128))),
                    "is_empty" => method(name, 0, move |_, _| done(Value::Bool(text.is_empty()))),
                    _ => return None,
                }
            }
            Value::Map(entries) => {
                let entries = entries.clone();
                match name {
                    "len" => method(name, 0, move |_, _| done(Value::int(entries.borrow().len() as i128))),
                    "get" => method(name, 1, move |_, args| {
                        let found = entries
                            .borrow()
                            .iter()
                            .find(|(key, _)| key.equals(&args[1]))
                            .map(|(_, value)| value.clone());
                        done(found.unwrap_or(Value::Nil))
                    }),
                    "set" => method(name, 2, move |_, args| {
                        map_insert(&mut entries.borrow_mut(), args[1].clone(), args[2].clone());
                        done(Value::Nil)
                    }),
                    "contains" => method(name, 1, move |_, args| {
                        done(Value::Bool(entries.borrow().iter().any(|(key, _)| key.equals(&args[1]))))
                    }),
                    "keys" => method(name, 0, move |_, _| {
                        done(Value::array(entries.borrow().iter().map(|(key, _)| key.clone()).collect()))
                    }),
                    _ => return None,
                }
            }
            Value::Proc(task) | Value::Future(task) => task_method(task, name)?,
            Value::Iterator(iterator) => {
                let iterator = iterator.clone();
                match name {
                    "next" => method(name, 0, move |interp, _| interp.iterator_next(&iterator)),
                    "close" => method(name, 0, move |interp, _| interp.iterator_close(&iterator)),
                    "yield" => method(name, 1, move |interp, args| {
                        interp.controller_signal(&iterator, Some(args[1].clone()))
                    }),
                    "stop" => method(name, 0, move |interp, _| interp.controller_signal(&iterator, None)),
                    "iterator" => method(name, 0, move |_, args| done(args[0].clone())),
                    _ => return None,
                }
            }
            Value::Channel(channel) => {
                let channel = channel.clone();
                match name {
                    "send" => method(name, 1, move |interp, args| interp.channel_send(&channel, args[1].clone())),
                    "receive" => method(name, 0, move |interp, _| interp.channel_receive(&channel)),
                    "try_send" => method(name, 1, move |interp, args| {
                        done(interp.channel_try_send(&channel, args[1].clone())?)
                    }),
                    "try_receive" => method(name, 0, move |interp, _| done(interp.channel_try_receive(&channel))),
                    "close" => method(name, 0, move |interp, _| done(interp.channel_close(&channel)?)),
                    "is_closed" => method(name, 0, move |_, _| done(Value::Bool(channel.borrow().closed))),
                    "recv_arm" => NativeFunction::new(name, None, move |_, args| {
                        let callback = optional_callback("recv_arm", &args, 1)?;
                        done(NativeAwaitable::value(AwaitableKind::ChannelReceive {
                            channel: channel.clone(),
                            callback,
                        }))
                    }),
                    "send_arm" => NativeFunction::new(name, None, move |_, args| {
                        let value = args.get(1).cloned().ok_or_else(|| RuntimeError::ArityMismatch {
                            name: "send_arm".into(),
                            expected: 1,
                            received: 0,
                        })?;
                        let callback = optional_callback("send_arm", &args, 2)?;
                        done(NativeAwaitable::value(AwaitableKind::ChannelSend {
                            channel: channel.clone(),
                            value,
                            callback,
                        }))
                    }),
                    _ => return None,
                }
            }
            Value::Mutex(mutex) => {
                let mutex = mutex.clone();
                match name {
                    "lock" => method(name, 0, move |interp, _| interp.mutex_lock(&mutex)),
                    "unlock" => method(name, 0, move |interp, _| done(interp.mutex_unlock(&mutex)?)),
                    "is_locked" => method(name, 0, move |_, _| done(Value::Bool(mutex.borrow().locked))),
                    "lock_arm" => NativeFunction::new(name, None, move |_, args| {
                        let callback = optional_callback("lock_arm", &args, 1)?;
                        done(NativeAwaitable::value(AwaitableKind::MutexLock {
                            mutex: mutex.clone(),
                            callback,
                        }))
                    }),
                    _ => return None,
                }
            }
            Value::Waker(waker) => {
                let waker = waker.clone();
                match name {
                    "wake" => method(name, 0, move |interp, _| {
                        interp.wake_waker(&waker);
                        done(Value::Nil)
                    }),
                    _ => return None,
                }
            }
            Value::Registration(registration) => {
                let registration = registration.clone();
                match name {
                    "cancel" => method(name, 0, move |_, _| {
                        registration.cancelled.set(true);
                        done(Value::Nil)
                    }),
                    "is_cancelled" => method(name, 0, move |_, _| done(Value::Bool(registration.cancelled.get()))),
                    _ => return None,
                }
            }
            Value::Awaitable(awaitable) => {
                let awaitable = awaitable.clone();
                match name {
                    "is_ready" => method(name, 0, move |interp, _| done(Value::Bool(interp.awaitable_ready(&awaitable)))),
                    "is_default" => method(name, 0, move |_, _| done(Value::Bool(awaitable.is_default()))),
                    "register" => method(name, 1, move |interp, args| {
                        let waker = waker_arg(&args[1])?;
                        done(Value::Registration(interp.awaitable_register(&awaitable, waker)))
                    }),
                    "commit" => method(name, 0, move |interp, _| interp.awaitable_commit(&awaitable)),
                    _ => return None,
                }
            }
            Value::Error(record) => {
                let record = record.clone();
                match name {
                    "message" => method(name, 0, move |_, _| done(Value::string(record.message.clone()))),
                    "cause" => method(name, 0, move |_, _| done(record.cause.clone().unwrap_or(Value::Nil))),
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(BoundMethod::bind(receiver.clone(), native))
    }
}

fn task_method(task: &TaskRef, name: &str) -> Option<Value> {
    let task = task.clone();
    let native = match name {
        "value" => method(name, 0, move |interp, _| interp.task_value(&task)),
        "status" => method(name, 0, move |interp, _| done(interp.task_status(&task))),
        "cancel" => method(name, 0, move |interp, _| {
            interp.cancel_task(&task);
            done(Value::Nil)
        }),
        "is_ready" => method(name, 0, move |_, _| done(Value::Bool(!task.borrow().status.is_pending()))),
        "is_default" => method(name, 0, |_, _| done(Value::Bool(false))),
        "register" => method(name, 1, move |interp, args| {
            let waker = waker_arg(&args[1])?;
            done(Value::Registration(interp.task_register(&task, waker)))
        }),
        "commit" => method(name, 0, move |interp, _| interp.task_value(&task)),
        _ => return None,
    };
    Some(native)
}

/// A native whose first argument is the receiver.
fn method<F>(name: &str, arity: usize, func: F) -> Value
where
    F: Fn(&mut Interpreter, Vec<Value>) -> RuntimeResult<Flow> + 'static,
{
    NativeFunction::new(name, Some(arity + 1), func)
}

fn done(value: Value) -> RuntimeResult<Flow> {
    Ok(Flow::Completed(value))
}

pub(super) fn optional_callback(name: &str, args: &[Value], position: usize) -> RuntimeResult<Option<Value>> {
    if args.len() > position + 1 {
        return Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected: position + 1,
            received: args.len(),
        });
    }
    match args.get(position) {
        None | Some(Value::Nil) => Ok(None),
        Some(callback) if callback.is_callable() => Ok(Some(callback.clone())),
        Some(other) => Err(RuntimeError::type_mismatch(format!(
            "`{name}` expected a callback, found `{}`",
            other.type_name()
        ))),
    }
}

fn waker_arg(value: &Value) -> RuntimeResult<WakerRef> {
    match value {
        Value::Waker(waker) => Ok(waker.clone()),
        other => Err(RuntimeError::type_mismatch(format!(
            "register expected an AwaitWaker, found `{}`",
            other.type_name()
        ))),
    }
}
