//! Non-error results of evaluating a node.
//!
//! Every evaluator function returns `RuntimeResult<Flow>`. Ordinary control
//! flow and suspension travel as `Ok(Flow::..)`; only user raises and internal
//! failures use `Err`.

use crate::runtime::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suspension {
    /// `proc_yield()`: give other tasks a turn, then carry on.
    Yielded,
    /// Waiting on a resource; the suspended step is retried on resume.
    Blocked,
    /// A generator produced its next value.
    GeneratorYield,
    /// A generator finished early through `gen.stop()`.
    GeneratorStop,
}

impl Suspension {
    pub fn name(self) -> &'static str {
        match self {
            Suspension::Yielded => "proc_yield",
            Suspension::Blocked => "blocked",
            Suspension::GeneratorYield => "generator yield",
            Suspension::GeneratorStop => "generator stop",
        }
    }
}

#[derive(Clone, Debug)]
pub enum Flow {
    Completed(Value),
    Suspended(Suspension),
    Broke { label: Option<String>, value: Value },
    Continued(Option<String>),
    Returned(Value),
}

impl Flow {
    pub fn nil() -> Self {
        Flow::Completed(Value::Nil)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Flow::Suspended(_))
    }

    /// Short name used when a flow escapes the construct meant to catch it.
    pub fn signal_name(&self) -> String {
        match self {
            Flow::Completed(_) => "completion".into(),
            Flow::Suspended(kind) => kind.name().into(),
            Flow::Broke { label: Some(label), .. } => format!("break '{label}"),
            Flow::Broke { label: None, .. } => "break".into(),
            Flow::Continued(_) => "continue".into(),
            Flow::Returned(_) => "return".into(),
        }
    }
}

/// Unwraps a completed value, or returns any other flow to the caller.
macro_rules! complete {
    ($eval:expr) => {
        match $eval? {
            $crate::runtime::outcome::Flow::Completed(value) => value,
            other => return Ok(other),
        }
    };
}

pub(crate) use complete;
