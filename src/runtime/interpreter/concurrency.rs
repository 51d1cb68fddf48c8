//! Procs, futures and the scheduling loop that drives them.

use super::{errors::error_value, Interpreter};
use crate::language::ast::Expr;
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    outcome::{Flow, Suspension},
    task::{
        RegistrationRef, RegistrationState, TaskKind, TaskRef, TaskState, TaskStatus, TaskWaits,
        ValueWait, WakerRef, WakerState,
    },
    value::{ErrorValue, StructInstance, Value},
};
use std::rc::Rc;

impl Interpreter {
    pub(super) fn spawn_task(&mut self, kind: TaskKind, body: &Rc<Expr>, env: &Environment) -> Value {
        let id = self.next_handle();
        let task = TaskState::new(id, kind, body.clone(), env.clone());
        self.executor.schedule(&task);
        tracing::debug!(task = id, kind = kind.label(), "task spawned");
        match kind {
            TaskKind::Proc => Value::Proc(task),
            TaskKind::Future => Value::Future(task),
        }
    }

    /// Runs one slice of `task`: from its root until it settles or suspends.
    fn run_task(&mut self, task: &TaskRef) -> RuntimeResult<()> {
        let (id, kind, body, env, context) = {
            let mut state = task.borrow_mut();
            if !state.status.is_pending() || state.is_evaluating {
                return Ok(());
            }
            state.has_started = true;
            state.is_evaluating = true;
            state.await_blocked = false;
            (
                state.id,
                state.kind,
                state.body.clone(),
                state.env.clone(),
                state.context,
            )
        };
        tracing::trace!(task = id, "task running");
        let outer_generators = std::mem::take(&mut self.generators);
        let outer_yield = self.generator_yield.take();
        self.tasks.push(task.clone());
        self.push_context(context);
        let outcome = self.eval_expr(&body, &env);
        self.pop_context();
        self.tasks.pop();
        self.generators = outer_generators;
        self.generator_yield = outer_yield;

        let cancel_requested = {
            let mut state = task.borrow_mut();
            state.is_evaluating = false;
            state.cancel_requested
        };
        match outcome {
            Ok(Flow::Completed(value)) | Ok(Flow::Returned(value)) => {
                let status = if cancel_requested {
                    TaskStatus::Cancelled(self.cancelled_error(kind))
                } else {
                    TaskStatus::Resolved(value)
                };
                self.settle(task, status);
            }
            Ok(Flow::Suspended(Suspension::Yielded | Suspension::Blocked)) => {
                let parked = task.borrow().await_blocked;
                tracing::trace!(task = id, parked, "task suspended");
                if !parked {
                    self.executor.schedule(task);
                }
            }
            Ok(other) => {
                let error = RuntimeError::SignalLeak {
                    signal: other.signal_name(),
                    boundary: format!("{} boundary", kind.label()),
                };
                let status = self.failed_status(kind, error.to_string());
                self.settle(task, status);
                return Err(error);
            }
            Err(RuntimeError::Cancelled { .. }) if cancel_requested => {
                let status = TaskStatus::Cancelled(self.cancelled_error(kind));
                self.settle(task, status);
            }
            Err(err) if err.is_fatal() => {
                let status = self.failed_status(kind, err.to_string());
                self.settle(task, status);
                return Err(err);
            }
            Err(err) => {
                let details = match error_value(err) {
                    Value::Error(record) => record.message.clone(),
                    other => other.to_string(),
                };
                let status = self.failed_status(kind, details);
                self.settle(task, status);
            }
        }
        Ok(())
    }

    fn settle(&mut self, task: &TaskRef, status: TaskStatus) {
        let (id, context, waits, awaiters) = {
            let mut state = task.borrow_mut();
            tracing::debug!(task = state.id, status = status.label(), "task settled");
            state.status = status;
            state.yield_pending = false;
            state.await_blocked = false;
            (
                state.id,
                state.context,
                std::mem::take(&mut state.waits),
                std::mem::take(&mut state.awaiters),
            )
        };
        self.release_waits(task, waits);
        self.continuations.discard(context);
        tracing::trace!(task = id, awaiters = awaiters.len(), "notifying awaiters");
        for registration in awaiters {
            self.fire_registration(&registration);
        }
    }

    fn release_waits(&mut self, task: &TaskRef, waits: TaskWaits) {
        if let Some(send) = waits.send {
            send.channel.borrow_mut().forget_task(task);
        }
        if let Some(receive) = waits.receive {
            receive.channel.borrow_mut().forget_task(task);
        }
        if let Some(mutex) = waits.mutex {
            mutex
                .borrow_mut()
                .waiters
                .retain(|waiter| !Rc::ptr_eq(waiter, task));
        }
        if let Some(wait) = waits.value {
            wait.registration.cancelled.set(true);
        }
    }

    pub(super) fn proc_error(&self, details: impl Into<String>) -> Value {
        Value::Struct(StructInstance::new(
            self.prelude.proc_error.clone(),
            vec![Value::string(details)],
            Vec::new(),
        ))
    }

    fn cancelled_error(&self, kind: TaskKind) -> Value {
        let message = format!("{} cancelled", kind.label());
        ErrorValue::with_payload(message.clone(), self.proc_error(message))
    }

    fn failed_status(&self, kind: TaskKind, details: String) -> TaskStatus {
        TaskStatus::Failed {
            error: ErrorValue::with_payload(
                format!("{} failed: {details}", kind.label()),
                self.proc_error(details.clone()),
            ),
            details,
        }
    }

    /// Cancellation before the first run settles immediately; otherwise the
    /// task sees the request at its next suspension checkpoint.
    pub(super) fn cancel_task(&mut self, task: &TaskRef) {
        let (pending, started, evaluating, kind) = {
            let state = task.borrow();
            (
                state.status.is_pending(),
                state.has_started,
                state.is_evaluating,
                state.kind,
            )
        };
        if !pending {
            return;
        }
        if !started {
            let status = TaskStatus::Cancelled(self.cancelled_error(kind));
            self.settle(task, status);
            return;
        }
        tracing::debug!(task = task.borrow().id, "cancel requested");
        {
            let mut state = task.borrow_mut();
            state.cancel_requested = true;
            if evaluating {
                return;
            }
            state.await_blocked = false;
        }
        self.executor.schedule(task);
    }

    /// Fails with `Cancelled` when the running task has been asked to stop.
    pub(super) fn checkpoint(&self, task: &TaskRef) -> RuntimeResult<()> {
        let state = task.borrow();
        if state.cancel_requested {
            return Err(RuntimeError::cancelled(format!("{} cancelled", state.kind.label())));
        }
        Ok(())
    }

    /// `handle.value()`: parks the calling task until `target` settles, or
    /// drives the executor when called from outside any task.
    pub(super) fn task_value(&mut self, target: &TaskRef) -> RuntimeResult<Flow> {
        if let Some(value) = target.borrow().status.settled_value() {
            return Ok(Flow::Completed(value));
        }
        let current = match self.current_task() {
            Some(current) => current,
            None => {
                let watched = target.clone();
                self.drive_until(move || !watched.borrow().status.is_pending())?;
                let settled = target.borrow().status.settled_value();
                return match settled {
                    Some(value) => Ok(Flow::Completed(value)),
                    None => Err(RuntimeError::WouldBlock {
                        operation: "value()".into(),
                    }),
                };
            }
        };
        if Rc::ptr_eq(&current, target) {
            return Err(RuntimeError::Reentrancy {
                message: "a task cannot wait for its own value()".into(),
            });
        }
        self.checkpoint(&current)?;
        let registered = match &current.borrow().waits.value {
            Some(wait) => Rc::ptr_eq(&wait.target, target) && wait.registration.is_live(),
            None => false,
        };
        if !registered {
            let registration = RegistrationState::new(WakerState::new(current.clone()));
            target.borrow_mut().awaiters.push(registration.clone());
            current.borrow_mut().waits.value = Some(ValueWait {
                target: target.clone(),
                registration,
            });
        }
        current.borrow_mut().await_blocked = true;
        Ok(Flow::Suspended(Suspension::Blocked))
    }

    pub(super) fn task_status(&self, task: &TaskRef) -> Value {
        let singleton = |def| Value::Struct(StructInstance::new(def, Vec::new(), Vec::new()));
        match &task.borrow().status {
            TaskStatus::Pending => singleton(self.prelude.pending.clone()),
            TaskStatus::Resolved(_) => singleton(self.prelude.resolved.clone()),
            TaskStatus::Cancelled(_) => singleton(self.prelude.cancelled.clone()),
            TaskStatus::Failed { error, details } => {
                let proc_error = match error {
                    Value::Error(record) => record.payload.clone(),
                    _ => None,
                }
                .unwrap_or_else(|| self.proc_error(details.clone()));
                Value::Struct(StructInstance::new(
                    self.prelude.failed.clone(),
                    vec![proc_error],
                    Vec::new(),
                ))
            }
        }
    }

    /// First call suspends; the replayed call completes with nil.
    pub(super) fn proc_yield(&mut self) -> RuntimeResult<Flow> {
        let task = self.current_task().ok_or_else(|| {
            RuntimeError::unsupported("proc_yield must be called inside an asynchronous task")
        })?;
        self.checkpoint(&task)?;
        let mut state = task.borrow_mut();
        if state.yield_pending {
            state.yield_pending = false;
            return Ok(Flow::nil());
        }
        state.yield_pending = true;
        Ok(Flow::Suspended(Suspension::Yielded))
    }

    pub(super) fn proc_cancelled(&self) -> RuntimeResult<Value> {
        let task = self.current_task().ok_or_else(|| {
            RuntimeError::unsupported("proc_cancelled must be called inside an asynchronous task")
        })?;
        let state = task.borrow();
        Ok(Value::Bool(state.kind == TaskKind::Proc && state.cancel_requested))
    }

    /// Runs up to `limit` ready tasks. Tasks already running further up the
    /// stack are skipped and stay queued.
    pub(super) fn flush(&mut self, limit: usize) -> RuntimeResult<()> {
        self.fire_due_timers();
        let mut skipped = Vec::new();
        let mut steps = 0;
        let mut outcome = Ok(());
        while steps < limit {
            let task = match self.executor.next_ready() {
                Some(task) => task,
                None => break,
            };
            if task.borrow().is_evaluating {
                skipped.push(task);
                continue;
            }
            steps += 1;
            outcome = self.run_task(&task);
            if outcome.is_err() {
                break;
            }
        }
        for task in skipped {
            self.executor.schedule(&task);
        }
        tracing::trace!(steps, pending = self.executor.pending_tasks(), "flush finished");
        outcome
    }

    /// One unit of progress: fire due timers, run the next ready task, or
    /// sleep until the nearest timer. `false` means nothing can progress.
    pub(super) fn step_executor(&mut self) -> RuntimeResult<bool> {
        if self.fire_due_timers() {
            return Ok(true);
        }
        let mut deferred = Vec::new();
        let mut ran = Ok(false);
        while let Some(task) = self.executor.next_ready() {
            if task.borrow().is_evaluating {
                deferred.push(task);
                continue;
            }
            ran = self.run_task(&task).map(|_| true);
            break;
        }
        for task in deferred {
            self.executor.schedule(&task);
        }
        if ran? {
            return Ok(true);
        }
        match self.executor.next_deadline() {
            Some(deadline) => {
                let now = self.platform.now_monotonic_ms();
                self.platform.sleep_ms(deadline - now);
                self.fire_due_timers();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn fire_due_timers(&mut self) -> bool {
        if !self.executor.has_timers() {
            return false;
        }
        let now = self.platform.now_monotonic_ms();
        let due = self.executor.take_due_timers(now);
        for registration in &due {
            self.fire_registration(registration);
        }
        !due.is_empty()
    }

    pub(super) fn drive_until(&mut self, mut done: impl FnMut() -> bool) -> RuntimeResult<()> {
        while !done() {
            if !self.step_executor()? {
                break;
            }
        }
        Ok(())
    }

    pub(super) fn drain_executor(&mut self) -> RuntimeResult<()> {
        self.drive_until(|| false)
    }

    pub(super) fn wake_task(&mut self, task: &TaskRef) {
        {
            let mut state = task.borrow_mut();
            if !state.status.is_pending() {
                return;
            }
            state.await_blocked = false;
        }
        self.executor.schedule(task);
    }

    /// A waker fires at most once.
    pub(super) fn wake_waker(&mut self, waker: &WakerRef) {
        if waker.triggered.replace(true) {
            return;
        }
        self.wake_task(&waker.task);
    }

    pub(super) fn fire_registration(&mut self, registration: &RegistrationRef) {
        if !registration.is_live() {
            return;
        }
        registration.cancelled.set(true);
        if let Some(waker) = &registration.waker {
            self.wake_waker(waker);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::build::*;
    use crate::runtime::{value::Value, Interpreter};

    fn interpreter() -> Interpreter {
        let mut config = RuntimeConfig::default();
        config.host.capture_output = true;
        Interpreter::new(config)
    }

    #[test]
    fn value_outside_a_task_drives_the_executor() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![
                let_("p", proc_expr(add(int(20), int(22)))),
                expr_stmt(method_call(ident("p"), "value", vec![])),
            ]))
            .unwrap();
        assert!(value.equals(&Value::int(42)));
        assert_eq!(interp.pending_tasks(), 0);
    }

    #[test]
    fn failed_tasks_report_a_proc_error() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![
                let_("p", proc_expr(do_block(vec![raise(string("boom"))]))),
                expr_stmt(method_call(ident("p"), "value", vec![])),
                expr_stmt(match_expr(
                    method_call(ident("p"), "status", vec![]),
                    vec![
                        clause(
                            pstruct("Failed", vec![("error", pstruct("ProcError", vec![("details", pid("d"))]))]),
                            ident("d"),
                        ),
                        clause(wildcard(), string("not failed")),
                    ],
                )),
            ]))
            .unwrap();
        assert!(value.equals(&Value::string("boom")));
    }

    #[test]
    fn proc_yield_outside_a_task_is_rejected() {
        let mut interp = interpreter();
        assert!(interp
            .load_module(&module(vec![expr_stmt(call_fn("proc_yield", vec![]))]))
            .is_err());
    }
}
