use crate::runtime::{
    task::{RegistrationRef, TaskRef},
    value::Value,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type ChannelRef = Rc<RefCell<ChannelState>>;
pub type MutexRef = Rc<RefCell<MutexState>>;

pub struct ChannelState {
    pub id: u64,
    pub capacity: usize,
    pub queue: VecDeque<Value>,
    pub closed: bool,
    pub send_waiters: VecDeque<(TaskRef, Value)>,
    pub receive_waiters: VecDeque<TaskRef>,
    pub await_send: Vec<RegistrationRef>,
    pub await_receive: Vec<RegistrationRef>,
}

impl ChannelState {
    pub fn new(id: u64, capacity: usize) -> ChannelRef {
        Rc::new(RefCell::new(ChannelState {
            id,
            capacity,
            queue: VecDeque::new(),
            closed: false,
            send_waiters: VecDeque::new(),
            receive_waiters: VecDeque::new(),
            await_send: Vec::new(),
            await_receive: Vec::new(),
        }))
    }

    pub fn has_room(&self) -> bool {
        self.capacity > 0 && self.queue.len() < self.capacity
    }

    /// A receive would complete without blocking.
    pub fn receive_ready(&self) -> bool {
        !self.queue.is_empty() || !self.send_waiters.is_empty() || self.closed
    }

    /// A send would complete without blocking. Closed channels report ready so
    /// the send can raise.
    pub fn send_ready(&self) -> bool {
        self.closed || !self.receive_waiters.is_empty() || self.has_room()
    }

    pub fn forget_task(&mut self, task: &TaskRef) {
        self.send_waiters.retain(|(waiter, _)| !Rc::ptr_eq(waiter, task));
        self.receive_waiters.retain(|waiter| !Rc::ptr_eq(waiter, task));
    }
}

pub struct MutexState {
    pub id: u64,
    pub locked: bool,
    pub waiters: VecDeque<TaskRef>,
    pub awaiters: Vec<RegistrationRef>,
}

impl MutexState {
    pub fn new(id: u64) -> MutexRef {
        Rc::new(RefCell::new(MutexState {
            id,
            locked: false,
            waiters: VecDeque::new(),
            awaiters: Vec::new(),
        }))
    }
}
