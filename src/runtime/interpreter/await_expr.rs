//! `await [arms..]` and the awaitable protocol: `is_ready`, `register(waker)`,
//! `commit` and `is_default`. Built-in arms are dispatched directly; any
//! other value goes through its methods.

use super::Interpreter;
use crate::language::ast::AwaitExpr;
use crate::runtime::{
    continuation::{AwaitArm, AwaitState, NodeState},
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    outcome::{complete, Flow, Suspension},
    task::{AwaitableKind, NativeAwaitable, RegistrationRef, RegistrationState, TaskRef, WakerRef, WakerState},
    value::Value,
};

impl Interpreter {
    pub(super) fn eval_await(&mut self, node: &AwaitExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Await(state)) => Some(state),
            _ => None,
        };
        let outcome = self.run_await(node, env, &mut state);
        self.leave_node(entry, state.map(NodeState::Await), &outcome);
        outcome
    }

    fn run_await(&mut self, node: &AwaitExpr, env: &Environment, state: &mut Option<AwaitState>) -> RuntimeResult<Flow> {
        let mut current = match state.take() {
            Some(current) => current,
            None => {
                let arms = complete!(self.eval_expr(&node.arms, env));
                self.build_arms(arms)?
            }
        };
        let outcome = self.poll_await(&mut current);
        if let Ok(Flow::Suspended(_)) = outcome {
            *state = Some(current);
        }
        outcome
    }

    fn build_arms(&mut self, arms: Value) -> RuntimeResult<AwaitState> {
        let items = match arms {
            Value::Array(items) => items.borrow().clone(),
            other => {
                return Err(RuntimeError::type_mismatch(format!(
                    "await expects an array of arms, found `{}`",
                    other.type_name()
                )))
            }
        };
        if items.is_empty() {
            return Err(RuntimeError::unsupported("await needs at least one arm"));
        }
        let mut state = AwaitState {
            arms: Vec::with_capacity(items.len()),
            default_arm: None,
            waker: None,
        };
        for (index, awaitable) in items.into_iter().enumerate() {
            let is_default = self.arm_is_default(&awaitable)?;
            if is_default {
                if state.default_arm.is_some() {
                    return Err(RuntimeError::unsupported("await allows only one default arm"));
                }
                state.default_arm = Some(index);
            }
            state.arms.push(AwaitArm {
                awaitable,
                is_default,
                registration: None,
            });
        }
        Ok(state)
    }

    fn poll_await(&mut self, state: &mut AwaitState) -> RuntimeResult<Flow> {
        loop {
            let task = self.current_task();
            if let Some(task) = &task {
                if let Err(err) = self.checkpoint(task) {
                    self.cancel_registrations(state)?;
                    return Err(err);
                }
            }
            let mut ready = Vec::new();
            for (index, arm) in state.arms.iter().enumerate() {
                if !arm.is_default && self.arm_ready(&arm.awaitable)? {
                    ready.push(index);
                }
            }
            if !ready.is_empty() {
                let chosen = ready[self.await_rotation % ready.len()];
                self.await_rotation = self.await_rotation.wrapping_add(1);
                return self.commit_arm(state, chosen);
            }
            if let Some(default) = state.default_arm {
                return self.commit_arm(state, default);
            }
            let task = match task {
                Some(task) => task,
                None => {
                    if self.step_executor()? {
                        continue;
                    }
                    if let Some(deadline) = earliest_sleep(state) {
                        let now = self.platform.now_monotonic_ms();
                        self.platform.sleep_ms(deadline - now);
                        continue;
                    }
                    return Err(RuntimeError::WouldBlock {
                        operation: "await".into(),
                    });
                }
            };
            let waker = self.arm_wakers(state, &task)?;
            if waker.triggered.get() {
                continue;
            }
            task.borrow_mut().await_blocked = true;
            tracing::trace!(task = task.borrow().id, arms = state.arms.len(), "await blocked");
            return Ok(Flow::Suspended(Suspension::Blocked));
        }
    }

    /// Keeps the current registrations while their waker is unspent; a fired
    /// waker means the resource changed, so every arm registers again.
    fn arm_wakers(&mut self, state: &mut AwaitState, task: &TaskRef) -> RuntimeResult<WakerRef> {
        if let Some(waker) = &state.waker {
            if !waker.triggered.get() {
                return Ok(waker.clone());
            }
        }
        self.cancel_registrations(state)?;
        let waker = WakerState::new(task.clone());
        state.waker = Some(waker.clone());
        for index in 0..state.arms.len() {
            if state.arms[index].is_default {
                continue;
            }
            let awaitable = state.arms[index].awaitable.clone();
            let registration = self.arm_register(&awaitable, waker.clone())?;
            state.arms[index].registration = Some(registration);
        }
        Ok(waker)
    }

    fn commit_arm(&mut self, state: &mut AwaitState, chosen: usize) -> RuntimeResult<Flow> {
        self.cancel_registrations(state)?;
        let awaitable = state.arms[chosen].awaitable.clone();
        tracing::trace!(arm = chosen, "await committed");
        match &awaitable {
            Value::Awaitable(native) => self.awaitable_commit(native),
            Value::Proc(task) | Value::Future(task) => self.task_value(task),
            other => Ok(Flow::Completed(self.call_method(other, "commit", Vec::new())?)),
        }
    }

    fn cancel_registrations(&mut self, state: &mut AwaitState) -> RuntimeResult<()> {
        for arm in &mut state.arms {
            match arm.registration.take() {
                Some(Value::Registration(registration)) => registration.cancelled.set(true),
                Some(Value::Nil) | None => {}
                Some(other) => {
                    if self.has_method(&other, "cancel") {
                        self.call_method(&other, "cancel", Vec::new())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn arm_is_default(&mut self, awaitable: &Value) -> RuntimeResult<bool> {
        match awaitable {
            Value::Awaitable(native) => Ok(native.is_default()),
            Value::Proc(_) | Value::Future(_) => Ok(false),
            other if self.has_method(other, "is_default") => {
                Ok(self.call_method(other, "is_default", Vec::new())?.truthy())
            }
            _ => Ok(false),
        }
    }

    fn arm_ready(&mut self, awaitable: &Value) -> RuntimeResult<bool> {
        match awaitable {
            Value::Awaitable(native) => Ok(self.awaitable_ready(native)),
            Value::Proc(task) | Value::Future(task) => Ok(!task.borrow().status.is_pending()),
            other => Ok(self.call_method(other, "is_ready", Vec::new())?.truthy()),
        }
    }

    fn arm_register(&mut self, awaitable: &Value, waker: WakerRef) -> RuntimeResult<Value> {
        match awaitable {
            Value::Awaitable(native) => Ok(Value::Registration(self.awaitable_register(native, waker))),
            Value::Proc(task) | Value::Future(task) => Ok(Value::Registration(self.task_register(task, waker))),
            other => self.call_method(other, "register", vec![Value::Waker(waker)]),
        }
    }

    pub(super) fn awaitable_ready(&self, awaitable: &NativeAwaitable) -> bool {
        match &awaitable.kind {
            AwaitableKind::Default { .. } => true,
            AwaitableKind::Sleep { deadline_ms, .. } => self.platform.now_monotonic_ms() >= *deadline_ms,
            AwaitableKind::ChannelReceive { channel, .. } => channel.borrow().receive_ready(),
            AwaitableKind::ChannelSend { channel, .. } => channel.borrow().send_ready(),
            AwaitableKind::MutexLock { mutex, .. } => !mutex.borrow().locked,
        }
    }

    pub(super) fn awaitable_register(&mut self, awaitable: &NativeAwaitable, waker: WakerRef) -> RegistrationRef {
        let registration = RegistrationState::new(waker);
        match &awaitable.kind {
            AwaitableKind::Default { .. } => return RegistrationState::inert(),
            AwaitableKind::Sleep { deadline_ms, .. } => self.executor.add_timer(*deadline_ms, registration.clone()),
            AwaitableKind::ChannelReceive { channel, .. } => {
                channel.borrow_mut().await_receive.push(registration.clone())
            }
            AwaitableKind::ChannelSend { channel, .. } => channel.borrow_mut().await_send.push(registration.clone()),
            AwaitableKind::MutexLock { mutex, .. } => mutex.borrow_mut().awaiters.push(registration.clone()),
        }
        registration
    }

    /// Completes a ready built-in arm and runs its callback, if any.
    pub(super) fn awaitable_commit(&mut self, awaitable: &NativeAwaitable) -> RuntimeResult<Flow> {
        let (callback, args) = match &awaitable.kind {
            AwaitableKind::Default { callback } | AwaitableKind::Sleep { callback, .. } => (callback, Vec::new()),
            AwaitableKind::ChannelReceive { channel, callback } => {
                let value = self.channel_try_receive(channel);
                if callback.is_none() {
                    return Ok(Flow::Completed(value));
                }
                (callback, vec![value])
            }
            AwaitableKind::ChannelSend {
                channel,
                value,
                callback,
            } => {
                if !self.channel_try_send(channel, value.clone())?.truthy() {
                    return Err(RuntimeError::unsupported("send arm committed without a ready receiver"));
                }
                (callback, Vec::new())
            }
            AwaitableKind::MutexLock { mutex, callback } => {
                complete!(self.mutex_lock(mutex));
                (callback, Vec::new())
            }
        };
        match callback {
            Some(callback) => Ok(Flow::Completed(self.call_value(callback, args)?)),
            None => Ok(Flow::nil()),
        }
    }

    /// Registers `waker` to fire when `task` settles. A settled task fires it
    /// straight away.
    pub(super) fn task_register(&mut self, task: &TaskRef, waker: WakerRef) -> RegistrationRef {
        let registration = RegistrationState::new(waker);
        if task.borrow().status.is_pending() {
            task.borrow_mut().awaiters.push(registration.clone());
        } else {
            self.fire_registration(&registration);
        }
        registration
    }
}

fn earliest_sleep(state: &AwaitState) -> Option<i128> {
    state
        .arms
        .iter()
        .filter_map(|arm| match &arm.awaitable {
            Value::Awaitable(native) => match &native.kind {
                AwaitableKind::Sleep { deadline_ms, .. } => Some(*deadline_ms),
                _ => None,
            },
            _ => None,
        })
        .min()
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::build::*;
    use crate::runtime::{
        error::RuntimeError,
        platform::{ManualPlatform, Platform},
        value::Value,
        Interpreter,
    };
    use std::rc::Rc;

    #[test]
    fn default_arm_fires_when_nothing_is_ready() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let value = interp
            .load_module(&module(vec![
                let_("ch", method_call(ident("Channel"), "new", vec![int(0)])),
                expr_stmt(await_expr(array(vec![
                    method_call(ident("ch"), "recv_arm", vec![]),
                    call_fn("await_default", vec![lambda(vec![], string("idle"))]),
                ]))),
            ]))
            .unwrap();
        assert!(value.equals(&Value::string("idle")));
    }

    #[test]
    fn sleep_arms_advance_the_host_clock_outside_tasks() {
        let platform = Rc::new(ManualPlatform::default());
        let mut interp = Interpreter::with_platform(RuntimeConfig::default(), platform.clone());
        let value = interp
            .load_module(&module(vec![expr_stmt(await_expr(array(vec![
                call_fn("await_sleep_ms", vec![int(50), lambda(vec![], string("late"))]),
                call_fn("await_sleep_ms", vec![int(10), lambda(vec![], string("early"))]),
            ])))]))
            .unwrap();
        assert!(value.equals(&Value::string("early")));
        assert_eq!(platform.now_monotonic_ms(), 10);
    }

    #[test]
    fn huge_sleep_durations_saturate_the_deadline() {
        let platform = Rc::new(ManualPlatform::default());
        platform.advance(i128::MAX - 100);
        let mut interp = Interpreter::with_platform(RuntimeConfig::default(), platform.clone());
        let value = interp
            .load_module(&module(vec![expr_stmt(await_expr(array(vec![
                call_fn("await_sleep_ms", vec![int(i128::MAX), lambda(vec![], string("never"))]),
                call_fn("await_sleep_ms", vec![int(5), lambda(vec![], string("soon"))]),
            ])))]))
            .unwrap();
        assert!(value.equals(&Value::string("soon")));
        assert_eq!(platform.now_monotonic_ms(), i128::MAX - 95);
    }

    #[test]
    fn two_default_arms_are_rejected() {
        let mut interp = Interpreter::new(RuntimeConfig::default());
        let err = interp
            .load_module(&module(vec![expr_stmt(await_expr(array(vec![
                call_fn("await_default", vec![]),
                call_fn("await_default", vec![]),
            ])))]))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported { .. }));
    }
}
