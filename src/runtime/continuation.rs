//! Resumable per-node state.
//!
//! Each task (and each generator) owns a context. Inside a context every
//! suspendable node keeps a stack of frames indexed by activation depth: the
//! n-th live activation of a node uses the n-th frame, which keeps recursion
//! and re-entrant calls apart. Frames survive suspension and are dropped on
//! completion or failure.

use crate::language::ast::{FunctionDef, LambdaExpr, PlaceholderLambda};
use crate::runtime::{
    environment::Environment,
    error::RuntimeResult,
    outcome::Flow,
    task::WakerRef,
    value::Value,
};
use std::collections::HashMap;
use std::rc::Rc;

pub type ContextId = u64;

pub enum NodeState {
    Block(BlockState),
    If(IfStage),
    While(LoopState),
    Loop(LoopState),
    For(ForState),
    Match(MatchState),
    Ensure(EnsureState),
    Interpolation(InterpolationState),
    Call(CallState),
    Await(AwaitState),
    Rescue(RescueState),
    OrElse(OrElseState),
    Pipe(PipeState),
}

impl NodeState {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeState::Block(_) => "block",
            NodeState::If(_) => "if",
            NodeState::While(_) => "while",
            NodeState::Loop(_) => "loop",
            NodeState::For(_) => "for",
            NodeState::Match(_) => "match",
            NodeState::Ensure(_) => "ensure",
            NodeState::Interpolation(_) => "interpolation",
            NodeState::Call(_) => "call",
            NodeState::Await(_) => "await",
            NodeState::Rescue(_) => "rescue",
            NodeState::OrElse(_) => "or_else",
            NodeState::Pipe(_) => "pipe",
        }
    }
}

pub struct BlockState {
    pub env: Environment,
    pub index: usize,
    pub result: Value,
}

/// Branch 0 is the `if` itself, branch `n` is `or_clauses[n - 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfStage {
    Condition(usize),
    Body(usize),
}

pub struct LoopState {
    pub in_body: bool,
    pub result: Value,
}

pub enum ForSource {
    Items(Vec<Value>),
    Iterator(Value),
}

pub struct ForState {
    pub source: ForSource,
    pub index: usize,
    pub base: Environment,
    /// Set while the body of the current element is running.
    pub iteration: Option<Environment>,
    pub result: Value,
}

pub struct MatchState {
    pub subject: Value,
    pub clause: Option<(usize, Environment)>,
}

pub enum EnsureState {
    Body,
    Cleanup(Option<RuntimeResult<Flow>>),
}

pub struct InterpolationState {
    pub index: usize,
    pub rendered: String,
}

#[derive(Clone)]
pub enum BodySource {
    Function(Rc<FunctionDef>),
    Lambda(Rc<LambdaExpr>),
    Placeholder(Rc<PlaceholderLambda>),
}

#[derive(Clone)]
pub struct PreparedBody {
    pub name: String,
    pub source: BodySource,
    pub env: Environment,
}

pub enum CallState {
    /// Callee known, some arguments evaluated.
    Args { callee: Value, args: Vec<Value> },
    /// A native blocked; call it again with the same arguments.
    Retry { callee: Value, args: Vec<Value> },
    /// A user body suspended; re-enter it.
    Body(PreparedBody),
    /// A native yielded; the call evaluates to nil on resume.
    Resumed,
}

/// A pipe whose subject is known. `scope` binds the topic for the stage;
/// `call` is set once the stage is being called with the subject.
pub struct PipeState {
    pub subject: Value,
    pub scope: Environment,
    pub call: Option<CallState>,
}

pub struct AwaitArm {
    pub awaitable: Value,
    pub is_default: bool,
    pub registration: Option<Value>,
}

pub struct AwaitState {
    pub arms: Vec<AwaitArm>,
    pub default_arm: Option<usize>,
    pub waker: Option<WakerRef>,
}

pub enum RescueState {
    Monitored,
    Handler {
        clause: usize,
        env: Environment,
        error: Value,
    },
}

pub struct OrElseState {
    pub env: Environment,
}

#[derive(Default)]
struct NodeFrames {
    states: Vec<Option<NodeState>>,
    active: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    context: ContextId,
    node: u32,
    depth: usize,
}

#[derive(Default)]
pub struct Continuations {
    contexts: HashMap<ContextId, HashMap<u32, NodeFrames>>,
}

impl Continuations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the next activation of `node`, handing back its saved state if
    /// this activation was suspended earlier.
    pub fn enter(&mut self, context: ContextId, node: u32) -> (FrameSlot, Option<NodeState>) {
        let frames = self
            .contexts
            .entry(context)
            .or_default()
            .entry(node)
            .or_default();
        let depth = frames.active;
        frames.active += 1;
        let resumed = if depth < frames.states.len() {
            frames.states[depth].take()
        } else {
            frames.states.push(None);
            None
        };
        (
            FrameSlot {
                context,
                node,
                depth,
            },
            resumed,
        )
    }

    pub fn save(&mut self, slot: FrameSlot, state: NodeState) {
        tracing::trace!(
            context = slot.context,
            node = slot.node,
            depth = slot.depth,
            kind = state.kind(),
            "saving continuation frame"
        );
        if let Some(frames) = self.frames_mut(slot) {
            if slot.depth < frames.states.len() {
                frames.states[slot.depth] = Some(state);
            }
            frames.active = slot.depth;
        }
    }

    /// Leaves an activation that suspended before building any state. Frames
    /// of deeper activations stay in place for the replay.
    pub fn vacate(&mut self, slot: FrameSlot) {
        if let Some(frames) = self.frames_mut(slot) {
            if let Some(state) = frames.states.get_mut(slot.depth) {
                *state = None;
            }
            frames.active = slot.depth;
        }
    }

    pub fn release(&mut self, slot: FrameSlot) {
        if let Some(frames) = self.frames_mut(slot) {
            frames.states.truncate(slot.depth);
            frames.active = slot.depth;
        }
    }

    /// Resets activation cursors before a context is replayed from its root.
    pub fn rewind(&mut self, context: ContextId) {
        if let Some(nodes) = self.contexts.get_mut(&context) {
            nodes.retain(|_, frames| !frames.states.is_empty());
            for frames in nodes.values_mut() {
                frames.active = 0;
            }
        }
    }

    pub fn discard(&mut self, context: ContextId) {
        self.contexts.remove(&context);
    }

    /// Number of saved frames held by `context`.
    pub fn live_frames(&self, context: ContextId) -> usize {
        self.contexts.get(&context).map_or(0, |nodes| {
            nodes
                .values()
                .map(|frames| frames.states.iter().filter(|state| state.is_some()).count())
                .sum()
        })
    }

    fn frames_mut(&mut self, slot: FrameSlot) -> Option<&mut NodeFrames> {
        self.contexts
            .get_mut(&slot.context)
            .and_then(|nodes| nodes.get_mut(&slot.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_state() -> NodeState {
        NodeState::Loop(LoopState {
            in_body: true,
            result: Value::Nil,
        })
    }

    #[test]
    fn nested_activations_get_their_own_frames() {
        let mut arena = Continuations::new();
        let (outer, state) = arena.enter(1, 10);
        assert!(state.is_none());
        let (inner, _) = arena.enter(1, 10);
        arena.save(inner, loop_state());
        arena.save(outer, loop_state());
        assert_eq!(arena.live_frames(1), 2);

        arena.rewind(1);
        let (outer, state) = arena.enter(1, 10);
        assert!(matches!(state, Some(NodeState::Loop(_))));
        let (inner, state) = arena.enter(1, 10);
        assert!(matches!(state, Some(NodeState::Loop(_))));
        arena.release(inner);
        arena.release(outer);
        assert_eq!(arena.live_frames(1), 0);
    }

    #[test]
    fn releasing_an_outer_frame_drops_nested_ones() {
        let mut arena = Continuations::new();
        let (outer, _) = arena.enter(7, 3);
        let (inner, _) = arena.enter(7, 3);
        arena.save(inner, loop_state());
        arena.release(outer);
        assert_eq!(arena.live_frames(7), 0);
        let (again, state) = arena.enter(7, 3);
        assert!(state.is_none());
        arena.release(again);
    }

    #[test]
    fn vacating_keeps_deeper_suspended_frames() {
        let mut arena = Continuations::new();
        let (outer, _) = arena.enter(4, 2);
        let (inner, _) = arena.enter(4, 2);
        arena.save(inner, loop_state());
        arena.vacate(outer);
        assert_eq!(arena.live_frames(4), 1);

        arena.rewind(4);
        let (outer, state) = arena.enter(4, 2);
        assert!(state.is_none());
        let (inner, state) = arena.enter(4, 2);
        assert!(matches!(state, Some(NodeState::Loop(_))));
        arena.release(inner);
        arena.release(outer);
        assert_eq!(arena.live_frames(4), 0);
    }

    #[test]
    fn contexts_are_isolated() {
        let mut arena = Continuations::new();
        let (slot, _) = arena.enter(1, 5);
        arena.save(slot, loop_state());
        let (other, state) = arena.enter(2, 5);
        assert!(state.is_none());
        arena.release(other);
        arena.discard(1);
        assert_eq!(arena.live_frames(1), 0);
    }
}
