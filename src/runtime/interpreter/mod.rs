//! Tree-walking evaluator with resumable nodes.
//!
//! `Interpreter` owns every runtime table: the global scope, struct and
//! interface definitions, impls, the package registry, the executor and the
//! continuation arena. Behaviour is split across the submodules as
//! `impl Interpreter` blocks.
//!
//! Suspendable nodes follow one shape: `enter_node` hands back any state saved
//! by an earlier run of the same activation, the node advances from there, and
//! `leave_node` either stores the state again (the node suspended) or drops it.

mod await_expr;
mod builtins;
mod channels;
mod concurrency;
mod control_flow;
mod definitions;
mod errors;
mod expressions;
mod functions;
mod generators;
mod impl_resolution;
mod members;
mod patterns;

use crate::config::RuntimeConfig;
use crate::language::{
    ast::{Expr, InterfaceDef, Module, NodeId, Statement, StructDef, TypeAliasDef, UnionDef},
    index::{NodeIdAllocator, NodeIndexer},
};
use crate::runtime::{
    async_runtime::Executor,
    continuation::{ContextId, Continuations, FrameSlot, NodeState},
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    iterator::IteratorRef,
    outcome::{complete, Flow},
    platform::{OutputSink, Platform, StdPlatform},
    registry::PackageRegistry,
    task::{TaskKind, TaskRef},
    value::{Closure, FunctionSource, Value},
};
use builtins::Prelude;
use impl_resolution::{ImplEntry, MethodSet};
use std::collections::HashMap;
use std::rc::Rc;

/// Host-facing entry points.
pub trait Evaluator {
    /// Evaluates a module's top-level statements and returns the last value.
    fn evaluate_module(&mut self, module: &Module) -> RuntimeResult<Value>;
    /// Evaluates a single expression in the global scope.
    fn evaluate_expr(&mut self, expr: &Expr) -> RuntimeResult<Value>;
    /// Drives scheduled tasks until nothing is runnable.
    fn run_until_idle(&mut self) -> RuntimeResult<()>;
}

struct ContextFrame {
    id: ContextId,
    /// Set when a node under the running statement stored its state.
    child_kept_state: bool,
}

struct NodeEntry {
    slot: Option<FrameSlot>,
}

pub struct Interpreter {
    config: RuntimeConfig,
    globals: Environment,
    ids: NodeIdAllocator,
    continuations: Continuations,
    contexts: Vec<ContextFrame>,
    executor: Executor,
    platform: Rc<dyn Platform>,
    output: OutputSink,
    registry: PackageRegistry,
    prelude: Prelude,
    structs: HashMap<String, Rc<StructDef>>,
    interfaces: HashMap<String, Rc<InterfaceDef>>,
    unions: HashMap<String, Rc<UnionDef>>,
    aliases: HashMap<String, Rc<TypeAliasDef>>,
    inherent: HashMap<String, Vec<MethodSet>>,
    impls: Vec<ImplEntry>,
    tasks: Vec<TaskRef>,
    generators: Vec<IteratorRef>,
    generator_yield: Option<Value>,
    rethrow: Vec<Value>,
    call_depth: usize,
    next_handle: u64,
    await_rotation: usize,
}

impl Interpreter {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_platform(config, Rc::new(StdPlatform::default()))
    }

    pub fn with_platform(config: RuntimeConfig, platform: Rc<dyn Platform>) -> Self {
        let output = if config.host.capture_output {
            OutputSink::captured()
        } else {
            OutputSink::Stdout
        };
        let mut interpreter = Self {
            config,
            globals: Environment::new(),
            ids: NodeIdAllocator::new(),
            continuations: Continuations::new(),
            contexts: Vec::new(),
            executor: Executor::new(),
            platform,
            output,
            registry: PackageRegistry::new(),
            prelude: Prelude::new(),
            structs: HashMap::new(),
            interfaces: HashMap::new(),
            unions: HashMap::new(),
            aliases: HashMap::new(),
            inherent: HashMap::new(),
            impls: Vec::new(),
            tasks: Vec::new(),
            generators: Vec::new(),
            generator_yield: None,
            rethrow: Vec::new(),
            call_depth: 0,
            next_handle: 0,
            await_rotation: 0,
        };
        interpreter.install_prelude();
        interpreter
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn globals(&self) -> &Environment {
        &self.globals
    }

    /// Lines written by `print` while output capture is enabled.
    pub fn output(&self) -> Vec<String> {
        self.output.lines()
    }

    pub fn pending_tasks(&self) -> usize {
        self.executor.pending_tasks()
    }

    /// Saved continuation frames still held for `context`.
    pub fn live_frames(&self, context: ContextId) -> usize {
        self.continuations.live_frames(context)
    }

    /// Indexes and evaluates `module`. Tasks it schedules are left queued.
    pub fn load_module(&mut self, module: &Module) -> RuntimeResult<Value> {
        NodeIndexer::new(&mut self.ids).index_module(module);
        let env = match &module.package {
            Some(_) => self.globals.child(),
            None => self.globals.clone(),
        };
        let value = self.run_top_level(&module.body, &env)?;
        if let Some(package) = &module.package {
            self.export_package(package, &module.body, &env)?;
        }
        Ok(value)
    }

    /// Loads `module` and then drives every task it scheduled to quiescence.
    pub fn run_module(&mut self, module: &Module) -> RuntimeResult<Value> {
        let value = self.load_module(module)?;
        self.drain_executor()?;
        Ok(value)
    }

    fn run_top_level(&mut self, statements: &[Statement], env: &Environment) -> RuntimeResult<Value> {
        let mut last = Value::Nil;
        for statement in statements {
            match self.eval_statement(statement, env)? {
                Flow::Completed(value) => last = value,
                Flow::Returned(value) => return Ok(value),
                other => {
                    return Err(RuntimeError::SignalLeak {
                        signal: other.signal_name(),
                        boundary: "module entry".into(),
                    })
                }
            }
        }
        Ok(last)
    }

    fn export_package(
        &mut self,
        package: &str,
        statements: &[Statement],
        env: &Environment,
    ) -> RuntimeResult<()> {
        for statement in statements {
            let (name, private) = match statement {
                Statement::Function(def) => (def.name.clone(), def.is_private),
                Statement::Struct(def) => (def.name.clone(), def.is_private),
                Statement::Union(def) => (def.name.clone(), def.is_private),
                Statement::Interface(def) => (def.name.clone(), def.is_private),
                Statement::Impl(def) => match &def.impl_name {
                    Some(name) => (name.clone(), def.is_private),
                    None => continue,
                },
                Statement::Extern(def) => (def.name.clone(), false),
                _ => continue,
            };
            let value = env.lookup(&name)?;
            self.registry.register(package, &name, value, private);
        }
        tracing::debug!(package, "registered package exports");
        Ok(())
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Environment) -> RuntimeResult<Flow> {
        match expr {
            Expr::Literal(literal) => Ok(Flow::Completed(self.literal_value(literal))),
            Expr::Interpolation(node) => self.eval_interpolation(node, env),
            Expr::Array(items) => self.eval_array(items, env),
            Expr::Identifier(name) => Ok(Flow::Completed(env.lookup(name)?)),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, env),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, env),
            Expr::Range {
                start,
                end,
                inclusive,
            } => self.eval_range(start, end, *inclusive, env),
            Expr::Assign(node) => self.eval_assignment(node, env),
            Expr::Block(block) => self.eval_block(block, env),
            Expr::If(node) => self.eval_if(node, env),
            Expr::Match(node) => self.eval_match(node, env),
            Expr::Loop(node) => self.eval_loop(node, env),
            Expr::Breakpoint(node) => self.eval_breakpoint(node, env),
            Expr::Call(node) => self.eval_call(node, env),
            Expr::Member { object, member } => self.eval_member(object, member, env),
            Expr::Index { object, index } => self.eval_index(object, index, env),
            Expr::Lambda(lambda) => Ok(Flow::Completed(Value::Function(Closure::new(
                FunctionSource::Lambda(lambda.clone()),
                env.clone(),
            )))),
            Expr::StructLiteral(node) => self.eval_struct_literal(node, env),
            Expr::Rescue(node) => self.eval_rescue(node, env),
            Expr::Ensure(node) => self.eval_ensure(node, env),
            Expr::OrElse(node) => self.eval_or_else(node, env),
            Expr::Propagate(inner) => self.eval_propagate(inner, env),
            Expr::Proc(body) => Ok(Flow::Completed(self.spawn_task(TaskKind::Proc, body, env))),
            Expr::Spawn(body) => Ok(Flow::Completed(self.spawn_task(TaskKind::Future, body, env))),
            Expr::Await(node) => self.eval_await(node, env),
            Expr::Iterator(literal) => Ok(Flow::Completed(self.make_generator(literal, env))),
            Expr::Pipe(node) => self.eval_pipe(node, env),
            Expr::Topic => Ok(Flow::Completed(self.topic_value(env)?)),
            Expr::Placeholder(index) => Ok(Flow::Completed(self.placeholder_value(*index, env)?)),
            Expr::PlaceholderLambda(lambda) => Ok(Flow::Completed(Value::Function(Closure::new(
                FunctionSource::Placeholder(lambda.clone()),
                env.clone(),
            )))),
            Expr::MapLiteral(entries) => self.eval_map_literal(entries, env),
            Expr::ImplicitMember(name) => self.eval_implicit_member(name, env),
        }
    }

    fn eval_statement(&mut self, statement: &Statement, env: &Environment) -> RuntimeResult<Flow> {
        match statement {
            Statement::Expr(expr) => self.eval_expr(expr, env),
            Statement::Return(value) => {
                let value = match value {
                    Some(expr) => complete!(self.eval_expr(expr, env)),
                    None => Value::Nil,
                };
                Ok(Flow::Returned(value))
            }
            Statement::Break(stmt) => {
                let value = match &stmt.value {
                    Some(expr) => complete!(self.eval_expr(expr, env)),
                    None => Value::Nil,
                };
                Ok(Flow::Broke {
                    label: stmt.label.clone(),
                    value,
                })
            }
            Statement::Continue(label) => Ok(Flow::Continued(label.clone())),
            Statement::Raise(expr) => self.eval_raise(expr, env),
            Statement::Rethrow => self.eval_rethrow(),
            Statement::Yield(value) => self.eval_yield(value.as_ref(), env),
            Statement::While(node) => self.eval_while(node, env),
            Statement::For(node) => self.eval_for(node, env),
            Statement::Function(def) => self.define_function(def, env),
            Statement::Struct(def) => self.define_struct(def, env),
            Statement::Union(def) => self.define_union(def, env),
            Statement::Interface(def) => self.define_interface(def, env),
            Statement::Impl(def) => self.define_impl(def, env),
            Statement::Methods(def) => self.define_methods(def, env),
            Statement::Extern(def) => self.define_extern(def, env),
            Statement::Import(import) => self.eval_import(import, env),
            Statement::TypeAlias(def) => self.define_type_alias(def),
        }
    }

    fn push_context(&mut self, id: ContextId) {
        self.contexts.push(ContextFrame {
            id,
            child_kept_state: false,
        });
        self.continuations.rewind(id);
    }

    fn pop_context(&mut self) {
        self.contexts.pop();
    }

    fn enter_node(&mut self, id: &NodeId) -> (NodeEntry, Option<NodeState>) {
        let context = self.contexts.last().map(|frame| frame.id);
        match context {
            Some(context) if id.is_assigned() => {
                let (slot, resumed) = self.continuations.enter(context, id.get());
                (NodeEntry { slot: Some(slot) }, resumed)
            }
            _ => (NodeEntry { slot: None }, None),
        }
    }

    fn leave_node(&mut self, entry: NodeEntry, state: Option<NodeState>, result: &RuntimeResult<Flow>) {
        let slot = match entry.slot {
            Some(slot) => slot,
            None => return,
        };
        match (result, state) {
            (Ok(Flow::Suspended(_)), Some(state)) => {
                self.continuations.save(slot, state);
                if let Some(frame) = self.contexts.last_mut() {
                    frame.child_kept_state = true;
                }
            }
            // Deeper activations of this node may still hold suspended frames.
            (Ok(Flow::Suspended(_)), None) => self.continuations.vacate(slot),
            _ => self.continuations.release(slot),
        }
    }

    fn clear_child_marker(&mut self) {
        if let Some(frame) = self.contexts.last_mut() {
            frame.child_kept_state = false;
        }
    }

    fn take_child_marker(&mut self) -> bool {
        self.contexts
            .last_mut()
            .map_or(false, |frame| std::mem::replace(&mut frame.child_kept_state, false))
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn current_task(&self) -> Option<TaskRef> {
        self.tasks.last().cloned()
    }
}

impl Evaluator for Interpreter {
    fn evaluate_module(&mut self, module: &Module) -> RuntimeResult<Value> {
        self.load_module(module)
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> RuntimeResult<Value> {
        NodeIndexer::new(&mut self.ids).index_expr(expr);
        let env = self.globals.clone();
        match self.eval_expr(expr, &env)? {
            Flow::Completed(value) | Flow::Returned(value) => Ok(value),
            other => Err(RuntimeError::SignalLeak {
                signal: other.signal_name(),
                boundary: "expression entry".into(),
            }),
        }
    }

    fn run_until_idle(&mut self) -> RuntimeResult<()> {
        self.drain_executor()
    }
}
