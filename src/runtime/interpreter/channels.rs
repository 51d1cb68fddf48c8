//! Channel and mutex operations.
//!
//! A blocked task keeps a pending record in `TaskState::waits`; its call node
//! retries the operation on resume and the record tells it whether a partner
//! completed the hand-off in the meantime.

use super::Interpreter;
use crate::language::ast::StructDef;
use crate::runtime::{
    error::{RuntimeError, RuntimeResult},
    outcome::{Flow, Suspension},
    sync::{ChannelRef, MutexRef},
    task::{PendingReceive, PendingSend, RegistrationRef, TaskRef},
    value::{ErrorValue, StructInstance, Value},
};
use std::collections::VecDeque;
use std::rc::Rc;

impl Interpreter {
    pub(super) fn channel_send(&mut self, channel: &ChannelRef, value: Value) -> RuntimeResult<Flow> {
        let task = self.current_task();
        if let Some(task) = &task {
            if let Some(flow) = self.resume_send(task, channel)? {
                return Ok(flow);
            }
        }
        if channel.borrow().closed {
            return Err(self.send_on_closed());
        }
        if self.offer(channel, value.clone()) {
            return Ok(Flow::nil());
        }
        let task = match task {
            Some(task) => task,
            None => {
                let watched = channel.clone();
                self.drive_until(move || watched.borrow().send_ready())?;
                if !channel.borrow().send_ready() {
                    return Err(RuntimeError::WouldBlock {
                        operation: "Channel.send".into(),
                    });
                }
                return self.channel_send(channel, value);
            }
        };
        self.checkpoint(&task)?;
        {
            let mut state = channel.borrow_mut();
            state.send_waiters.push_back((task.clone(), value.clone()));
        }
        {
            let mut state = task.borrow_mut();
            state.waits.send = Some(PendingSend {
                channel: channel.clone(),
                value,
                delivered: false,
                error: None,
            });
            state.await_blocked = true;
        }
        tracing::trace!(channel = channel.borrow().id, task = task.borrow().id, "send blocked");
        let receivers = std::mem::take(&mut channel.borrow_mut().await_receive);
        self.fire_all(receivers);
        Ok(Flow::Suspended(Suspension::Blocked))
    }

    /// Outcome of a send this task parked on `channel` earlier, if any.
    fn resume_send(&mut self, task: &TaskRef, channel: &ChannelRef) -> RuntimeResult<Option<Flow>> {
        let taken = task.borrow_mut().waits.send.take();
        let pending = match taken {
            Some(pending) if Rc::ptr_eq(&pending.channel, channel) => pending,
            Some(other) => {
                task.borrow_mut().waits.send = Some(other);
                return Ok(None);
            }
            None => return Ok(None),
        };
        if let Some(error) = pending.error {
            return Err(RuntimeError::Raise { value: error });
        }
        if pending.delivered {
            return Ok(Some(Flow::nil()));
        }
        if let Err(err) = self.checkpoint(task) {
            channel.borrow_mut().forget_task(task);
            return Err(err);
        }
        let mut state = task.borrow_mut();
        state.waits.send = Some(pending);
        state.await_blocked = true;
        Ok(Some(Flow::Suspended(Suspension::Blocked)))
    }

    /// Hands `value` to a waiting receiver or buffers it. `false` when the
    /// channel has neither.
    fn offer(&mut self, channel: &ChannelRef, value: Value) -> bool {
        let receiver = pop_live(&mut channel.borrow_mut().receive_waiters);
        if let Some(receiver) = receiver {
            if let Some(pending) = receiver.borrow_mut().waits.receive.as_mut() {
                pending.ready = true;
                pending.value = Some(value);
            }
            self.wake_task(&receiver);
            return true;
        }
        if !channel.borrow().has_room() {
            return false;
        }
        channel.borrow_mut().queue.push_back(value);
        let receivers = std::mem::take(&mut channel.borrow_mut().await_receive);
        self.fire_all(receivers);
        true
    }

    pub(super) fn channel_receive(&mut self, channel: &ChannelRef) -> RuntimeResult<Flow> {
        let task = self.current_task();
        if let Some(task) = &task {
            if let Some(flow) = self.resume_receive(task, channel)? {
                return Ok(flow);
            }
        }
        if let Some(value) = self.take(channel) {
            return Ok(Flow::Completed(value));
        }
        if channel.borrow().closed {
            return Ok(Flow::nil());
        }
        let task = match task {
            Some(task) => task,
            None => {
                let watched = channel.clone();
                self.drive_until(move || watched.borrow().receive_ready())?;
                if !channel.borrow().receive_ready() {
                    return Err(RuntimeError::WouldBlock {
                        operation: "Channel.receive".into(),
                    });
                }
                return self.channel_receive(channel);
            }
        };
        self.checkpoint(&task)?;
        channel.borrow_mut().receive_waiters.push_back(task.clone());
        {
            let mut state = task.borrow_mut();
            state.waits.receive = Some(PendingReceive {
                channel: channel.clone(),
                ready: false,
                value: None,
            });
            state.await_blocked = true;
        }
        tracing::trace!(channel = channel.borrow().id, task = task.borrow().id, "receive blocked");
        let senders = std::mem::take(&mut channel.borrow_mut().await_send);
        self.fire_all(senders);
        Ok(Flow::Suspended(Suspension::Blocked))
    }

    fn resume_receive(&mut self, task: &TaskRef, channel: &ChannelRef) -> RuntimeResult<Option<Flow>> {
        let taken = task.borrow_mut().waits.receive.take();
        let pending = match taken {
            Some(pending) if Rc::ptr_eq(&pending.channel, channel) => pending,
            Some(other) => {
                task.borrow_mut().waits.receive = Some(other);
                return Ok(None);
            }
            None => return Ok(None),
        };
        if pending.ready {
            return Ok(Some(Flow::Completed(pending.value.unwrap_or(Value::Nil))));
        }
        if let Err(err) = self.checkpoint(task) {
            channel.borrow_mut().forget_task(task);
            return Err(err);
        }
        let mut state = task.borrow_mut();
        state.waits.receive = Some(pending);
        state.await_blocked = true;
        Ok(Some(Flow::Suspended(Suspension::Blocked)))
    }

    /// Takes the next value from the buffer or straight from a blocked sender.
    fn take(&mut self, channel: &ChannelRef) -> Option<Value> {
        let buffered = channel.borrow_mut().queue.pop_front();
        if let Some(value) = buffered {
            let promoted = pop_live_sender(channel);
            if let Some((sender, queued)) = promoted {
                channel.borrow_mut().queue.push_back(queued);
                self.mark_delivered(&sender);
            }
            let senders = std::mem::take(&mut channel.borrow_mut().await_send);
            self.fire_all(senders);
            return Some(value);
        }
        let (sender, value) = pop_live_sender(channel)?;
        self.mark_delivered(&sender);
        Some(value)
    }

    fn mark_delivered(&mut self, sender: &TaskRef) {
        if let Some(pending) = sender.borrow_mut().waits.send.as_mut() {
            pending.delivered = true;
        }
        self.wake_task(sender);
    }

    pub(super) fn channel_try_send(&mut self, channel: &ChannelRef, value: Value) -> RuntimeResult<Value> {
        if channel.borrow().closed {
            return Err(self.send_on_closed());
        }
        Ok(Value::Bool(self.offer(channel, value)))
    }

    pub(super) fn channel_try_receive(&mut self, channel: &ChannelRef) -> Value {
        self.take(channel).unwrap_or(Value::Nil)
    }

    /// Receivers wake with nil; blocked senders fail with `ChannelSendOnClosed`.
    pub(super) fn channel_close(&mut self, channel: &ChannelRef) -> RuntimeResult<Value> {
        if channel.borrow().closed {
            let error = self.concurrency_error(self.prelude.channel_closed.clone(), "close of closed channel");
            return Err(RuntimeError::Raise { value: error });
        }
        let (receivers, senders, await_send, await_receive) = {
            let mut state = channel.borrow_mut();
            state.closed = true;
            (
                std::mem::take(&mut state.receive_waiters),
                std::mem::take(&mut state.send_waiters),
                std::mem::take(&mut state.await_send),
                std::mem::take(&mut state.await_receive),
            )
        };
        tracing::debug!(
            channel = channel.borrow().id,
            receivers = receivers.len(),
            senders = senders.len(),
            "channel closed"
        );
        for receiver in receivers {
            if let Some(pending) = receiver.borrow_mut().waits.receive.as_mut() {
                pending.ready = true;
                pending.value = None;
            }
            self.wake_task(&receiver);
        }
        for (sender, _) in senders {
            let error = self.concurrency_error(self.prelude.channel_send_on_closed.clone(), "send on closed channel");
            if let Some(pending) = sender.borrow_mut().waits.send.as_mut() {
                pending.error = Some(error);
            }
            self.wake_task(&sender);
        }
        self.fire_all(await_send);
        self.fire_all(await_receive);
        Ok(Value::Nil)
    }

    /// Acquires `mutex` for the running task. Waiters are woken on unlock and
    /// retry the acquisition.
    pub(super) fn mutex_lock(&mut self, mutex: &MutexRef) -> RuntimeResult<Flow> {
        let task = self.current_task();
        if !mutex.borrow().locked {
            mutex.borrow_mut().locked = true;
            if let Some(task) = &task {
                let mut state = task.borrow_mut();
                if matches!(&state.waits.mutex, Some(waiting) if Rc::ptr_eq(waiting, mutex)) {
                    state.waits.mutex = None;
                }
            }
            return Ok(Flow::nil());
        }
        let task = match task {
            Some(task) => task,
            None => {
                let watched = mutex.clone();
                self.drive_until(move || !watched.borrow().locked)?;
                if mutex.borrow().locked {
                    return Err(RuntimeError::WouldBlock {
                        operation: "Mutex.lock".into(),
                    });
                }
                return self.mutex_lock(mutex);
            }
        };
        if let Err(err) = self.checkpoint(&task) {
            mutex.borrow_mut().waiters.retain(|waiter| !Rc::ptr_eq(waiter, &task));
            task.borrow_mut().waits.mutex = None;
            return Err(err);
        }
        {
            let mut state = mutex.borrow_mut();
            if !state.waiters.iter().any(|waiter| Rc::ptr_eq(waiter, &task)) {
                state.waiters.push_back(task.clone());
            }
        }
        {
            let mut state = task.borrow_mut();
            state.waits.mutex = Some(mutex.clone());
            state.await_blocked = true;
        }
        Ok(Flow::Suspended(Suspension::Blocked))
    }

    pub(super) fn mutex_unlock(&mut self, mutex: &MutexRef) -> RuntimeResult<Value> {
        if !mutex.borrow().locked {
            let error = self.concurrency_error(self.prelude.mutex_unlocked.clone(), "unlock of unlocked mutex");
            return Err(RuntimeError::Raise { value: error });
        }
        let (next, awaiters) = {
            let mut state = mutex.borrow_mut();
            state.locked = false;
            (pop_live(&mut state.waiters), std::mem::take(&mut state.awaiters))
        };
        if let Some(next) = next {
            self.wake_task(&next);
        }
        self.fire_all(awaiters);
        Ok(Value::Nil)
    }

    fn send_on_closed(&self) -> RuntimeError {
        RuntimeError::Raise {
            value: self.concurrency_error(self.prelude.channel_send_on_closed.clone(), "send on closed channel"),
        }
    }

    fn concurrency_error(&self, def: Rc<StructDef>, message: &str) -> Value {
        ErrorValue::with_payload(message, Value::Struct(StructInstance::new(def, Vec::new(), Vec::new())))
    }

    pub(super) fn fire_all(&mut self, registrations: Vec<RegistrationRef>) {
        for registration in registrations {
            self.fire_registration(&registration);
        }
    }
}

fn pop_live(queue: &mut VecDeque<TaskRef>) -> Option<TaskRef> {
    while let Some(task) = queue.pop_front() {
        if task.borrow().status.is_pending() {
            return Some(task);
        }
    }
    None
}

fn pop_live_sender(channel: &ChannelRef) -> Option<(TaskRef, Value)> {
    let mut state = channel.borrow_mut();
    while let Some((task, value)) = state.send_waiters.pop_front() {
        if task.borrow().status.is_pending() {
            return Some((task, value));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::build::*;
    use crate::runtime::{error::RuntimeError, value::Value, Interpreter};

    fn interpreter() -> Interpreter {
        let mut config = RuntimeConfig::default();
        config.host.capture_output = true;
        Interpreter::new(config)
    }

    fn new_channel(capacity: i128) -> crate::language::ast::Expr {
        method_call(ident("Channel"), "new", vec![int(capacity)])
    }

    #[test]
    fn buffered_channels_round_trip_without_tasks() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![
                let_("ch", new_channel(2)),
                expr_stmt(method_call(ident("ch"), "send", vec![int(1)])),
                expr_stmt(method_call(ident("ch"), "send", vec![int(2)])),
                let_("first", method_call(ident("ch"), "receive", vec![])),
                expr_stmt(add(ident("first"), method_call(ident("ch"), "receive", vec![]))),
            ]))
            .unwrap();
        assert!(value.equals(&Value::int(3)));
    }

    #[test]
    fn sending_on_a_closed_channel_raises_its_struct() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![
                let_("ch", new_channel(1)),
                expr_stmt(method_call(ident("ch"), "close", vec![])),
                expr_stmt(rescue(
                    method_call(ident("ch"), "send", vec![int(1)]),
                    vec![
                        clause(pstruct("ChannelSendOnClosed", vec![]), string("closed")),
                        clause(wildcard(), string("other")),
                    ],
                )),
            ]))
            .unwrap();
        assert!(value.equals(&Value::string("closed")));
    }

    #[test]
    fn receive_on_an_empty_channel_outside_tasks_would_block() {
        let mut interp = interpreter();
        let err = interp
            .load_module(&module(vec![
                let_("ch", new_channel(0)),
                expr_stmt(method_call(ident("ch"), "receive", vec![])),
            ]))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::WouldBlock { .. }));
    }

    #[test]
    fn unbuffered_hand_off_between_procs() {
        let mut interp = interpreter();
        let value = interp
            .run_module(&module(vec![
                let_("ch", new_channel(0)),
                let_(
                    "producer",
                    proc_expr(do_block(vec![
                        expr_stmt(method_call(ident("ch"), "send", vec![string("ping")])),
                        expr_stmt(call_fn("print", vec![string("sent")])),
                    ])),
                ),
                let_(
                    "consumer",
                    proc_expr(do_block(vec![
                        let_("got", method_call(ident("ch"), "receive", vec![])),
                        expr_stmt(call_fn("print", vec![ident("got")])),
                        expr_stmt(ident("got")),
                    ])),
                ),
                expr_stmt(method_call(ident("consumer"), "value", vec![])),
            ]))
            .unwrap();
        assert!(value.equals(&Value::string("ping")));
        let output = interp.output();
        assert!(output.contains(&"ping".to_string()));
        assert!(output.contains(&"sent".to_string()));
    }

    #[test]
    fn mutex_waiters_acquire_after_unlock() {
        let mut interp = interpreter();
        interp
            .run_module(&module(vec![
                let_("m", method_call(ident("Mutex"), "new", vec![])),
                expr_stmt(method_call(ident("m"), "lock", vec![])),
                let_(
                    "worker",
                    proc_expr(do_block(vec![
                        expr_stmt(method_call(ident("m"), "lock", vec![])),
                        expr_stmt(call_fn("print", vec![string("worker locked")])),
                        expr_stmt(method_call(ident("m"), "unlock", vec![])),
                    ])),
                ),
                expr_stmt(call_fn("proc_flush", vec![])),
                expr_stmt(call_fn("print", vec![string("main unlocking")])),
                expr_stmt(method_call(ident("m"), "unlock", vec![])),
            ]))
            .unwrap();
        assert_eq!(
            interp.output(),
            vec!["main unlocking".to_string(), "worker locked".to_string()]
        );
    }
}
