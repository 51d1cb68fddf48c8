use crate::language::ast::Expr;
use crate::runtime::{
    continuation::ContextId,
    environment::Environment,
    sync::{ChannelRef, MutexRef},
    value::Value,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub type TaskRef = Rc<RefCell<TaskState>>;
pub type WakerRef = Rc<WakerState>;
pub type RegistrationRef = Rc<RegistrationState>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Proc,
    Future,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Proc => "Proc",
            TaskKind::Future => "Future",
        }
    }
}

#[derive(Clone)]
pub enum TaskStatus {
    Pending,
    Resolved(Value),
    /// Holds the error value handed out by `value()`.
    Cancelled(Value),
    Failed { error: Value, details: String },
}

impl TaskStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Resolved(_) => "resolved",
            TaskStatus::Cancelled(_) => "cancelled",
            TaskStatus::Failed { .. } => "failed",
        }
    }

    /// What `value()` hands back once the task has settled.
    pub fn settled_value(&self) -> Option<Value> {
        match self {
            TaskStatus::Pending => None,
            TaskStatus::Resolved(value) | TaskStatus::Cancelled(value) => Some(value.clone()),
            TaskStatus::Failed { error, .. } => Some(error.clone()),
        }
    }
}

pub struct TaskState {
    pub id: u64,
    pub kind: TaskKind,
    pub body: Rc<Expr>,
    pub env: Environment,
    pub context: ContextId,
    pub status: TaskStatus,
    pub has_started: bool,
    pub is_evaluating: bool,
    pub cancel_requested: bool,
    /// Parked on a resource; only a waker may requeue it.
    pub await_blocked: bool,
    pub queued: bool,
    /// `proc_yield()` suspended and has not been resumed yet.
    pub yield_pending: bool,
    pub awaiters: Vec<RegistrationRef>,
    pub waits: TaskWaits,
}

impl TaskState {
    pub fn new(id: u64, kind: TaskKind, body: Rc<Expr>, env: Environment) -> TaskRef {
        Rc::new(RefCell::new(TaskState {
            id,
            kind,
            body,
            env,
            context: id,
            status: TaskStatus::Pending,
            has_started: false,
            is_evaluating: false,
            cancel_requested: false,
            await_blocked: false,
            queued: false,
            yield_pending: false,
            awaiters: Vec::new(),
            waits: TaskWaits::default(),
        }))
    }
}

/// Bookkeeping for an operation the task is parked on.
#[derive(Default)]
pub struct TaskWaits {
    pub send: Option<PendingSend>,
    pub receive: Option<PendingReceive>,
    pub value: Option<ValueWait>,
    pub mutex: Option<MutexRef>,
}

pub struct PendingSend {
    pub channel: ChannelRef,
    pub value: Value,
    pub delivered: bool,
    pub error: Option<Value>,
}

pub struct PendingReceive {
    pub channel: ChannelRef,
    pub ready: bool,
    pub value: Option<Value>,
}

pub struct ValueWait {
    pub target: TaskRef,
    pub registration: RegistrationRef,
}

pub struct WakerState {
    pub task: TaskRef,
    pub triggered: Cell<bool>,
}

impl WakerState {
    pub fn new(task: TaskRef) -> WakerRef {
        Rc::new(WakerState {
            task,
            triggered: Cell::new(false),
        })
    }
}

/// Cancellation handle for a waker installed on a resource.
pub struct RegistrationState {
    pub waker: Option<WakerRef>,
    pub cancelled: Cell<bool>,
}

impl RegistrationState {
    pub fn new(waker: WakerRef) -> RegistrationRef {
        Rc::new(RegistrationState {
            waker: Some(waker),
            cancelled: Cell::new(false),
        })
    }

    /// A registration with nothing to cancel.
    pub fn inert() -> RegistrationRef {
        Rc::new(RegistrationState {
            waker: None,
            cancelled: Cell::new(false),
        })
    }

    pub fn is_live(&self) -> bool {
        self.waker.is_some() && !self.cancelled.get()
    }
}

pub enum AwaitableKind {
    Default {
        callback: Option<Value>,
    },
    Sleep {
        deadline_ms: i128,
        callback: Option<Value>,
    },
    ChannelReceive {
        channel: ChannelRef,
        callback: Option<Value>,
    },
    ChannelSend {
        channel: ChannelRef,
        value: Value,
        callback: Option<Value>,
    },
    MutexLock {
        mutex: MutexRef,
        callback: Option<Value>,
    },
}

pub struct NativeAwaitable {
    pub kind: AwaitableKind,
}

impl NativeAwaitable {
    pub fn value(kind: AwaitableKind) -> Value {
        Value::Awaitable(Rc::new(NativeAwaitable { kind }))
    }

    pub fn is_default(&self) -> bool {
        matches!(self.kind, AwaitableKind::Default { .. })
    }
}
