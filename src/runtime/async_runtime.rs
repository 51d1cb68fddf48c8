//! Cooperative executor for procs and futures.
//! A single FIFO ready queue; the interpreter pops tasks and runs each one
//! until it completes or suspends. Timers back `await_sleep_ms` arms and are
//! fired against the host's monotonic clock.

use crate::runtime::task::{RegistrationRef, TaskRef};
use std::collections::VecDeque;

#[derive(Default)]
pub struct Executor {
    ready: VecDeque<TaskRef>,
    timers: Vec<Timer>,
}

struct Timer {
    deadline_ms: i128,
    registration: RegistrationRef,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `task` unless it is already waiting in the queue.
    pub fn schedule(&mut self, task: &TaskRef) -> bool {
        {
            let mut state = task.borrow_mut();
            if state.queued {
                return false;
            }
            state.queued = true;
        }
        tracing::trace!(task = task.borrow().id, "task queued");
        self.ready.push_back(task.clone());
        true
    }

    pub fn next_ready(&mut self) -> Option<TaskRef> {
        let task = self.ready.pop_front()?;
        task.borrow_mut().queued = false;
        Some(task)
    }

    pub fn pending_tasks(&self) -> usize {
        self.ready.len()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn add_timer(&mut self, deadline_ms: i128, registration: RegistrationRef) {
        self.timers.push(Timer {
            deadline_ms,
            registration,
        });
    }

    pub fn has_timers(&self) -> bool {
        self.timers
            .iter()
            .any(|timer| !timer.registration.cancelled.get())
    }

    pub fn next_deadline(&self) -> Option<i128> {
        self.timers
            .iter()
            .filter(|timer| !timer.registration.cancelled.get())
            .map(|timer| timer.deadline_ms)
            .min()
    }

    /// Removes and returns registrations whose deadline has passed.
    pub fn take_due_timers(&mut self, now_ms: i128) -> Vec<RegistrationRef> {
        let mut due = Vec::new();
        self.timers.retain(|timer| {
            if timer.registration.cancelled.get() {
                return false;
            }
            if timer.deadline_ms <= now_ms {
                due.push(timer.registration.clone());
                return false;
            }
            true
        });
        due
    }
}
