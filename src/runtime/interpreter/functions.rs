use super::{expressions::placeholder_binding, impl_resolution::unify_types, Interpreter};
use crate::language::{
    ast::{CallExpr, FunctionDef},
    types::TypeExpr,
};
use crate::runtime::{
    continuation::{BodySource, CallState, NodeState, PreparedBody},
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    outcome::{Flow, Suspension},
    value::{Closure, FunctionSource, Value},
};
use std::collections::HashMap;
use std::rc::Rc;

/// What calling a value produced: a native's flow, or a user body that is
/// ready to run.
pub(super) enum Invocation {
    Native(Flow),
    Body(PreparedBody),
}

impl Interpreter {
    pub(super) fn eval_call(&mut self, node: &CallExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Call(state)) => Some(state),
            _ => None,
        };
        let outcome = self.run_call(node, env, &mut state);
        self.leave_node(entry, state.map(NodeState::Call), &outcome);
        outcome
    }

    fn run_call(&mut self, node: &CallExpr, env: &Environment, state: &mut Option<CallState>) -> RuntimeResult<Flow> {
        loop {
            match state.take() {
                None => {
                    let callee = match self.eval_expr(&node.callee, env)? {
                        Flow::Completed(callee) => callee,
                        other => return Ok(other),
                    };
                    *state = Some(CallState::Args {
                        callee,
                        args: Vec::with_capacity(node.args.len()),
                    });
                }
                Some(CallState::Args { callee, mut args }) => {
                    while let Some(arg) = node.args.get(args.len()) {
                        match self.eval_expr(arg, env)? {
                            Flow::Completed(value) => args.push(value),
                            other => {
                                *state = Some(CallState::Args { callee, args });
                                return Ok(other);
                            }
                        }
                    }
                    let scope_types = env.type_bindings();
                    let type_args: Vec<TypeExpr> = node
                        .type_args
                        .iter()
                        .map(|ty| ty.substitute(&scope_types))
                        .collect();
                    match self.invoke(&callee, args.clone(), &type_args)? {
                        Invocation::Native(flow) => return Ok(park_native(state, flow, callee, args)),
                        Invocation::Body(body) => *state = Some(CallState::Body(body)),
                    }
                }
                Some(other) => {
                    *state = Some(other);
                    return self.drive_call(state);
                }
            }
        }
    }

    /// Runs a call whose callee and arguments are settled, from a fresh
    /// `Retry` or from wherever an earlier run suspended.
    pub(super) fn drive_call(&mut self, state: &mut Option<CallState>) -> RuntimeResult<Flow> {
        loop {
            match state.take() {
                Some(CallState::Retry { callee, args }) => match self.invoke(&callee, args.clone(), &[])? {
                    Invocation::Native(flow) => return Ok(park_native(state, flow, callee, args)),
                    Invocation::Body(body) => *state = Some(CallState::Body(body)),
                },
                Some(CallState::Body(body)) => {
                    let flow = self.run_body(&body)?;
                    if flow.is_suspended() {
                        *state = Some(CallState::Body(body));
                    }
                    return Ok(flow);
                }
                Some(CallState::Args { .. }) | Some(CallState::Resumed) | None => return Ok(Flow::nil()),
            }
        }
    }

    /// Resolves `callee` down to something runnable. Natives run right away.
    pub(super) fn invoke(&mut self, callee: &Value, args: Vec<Value>, type_args: &[TypeExpr]) -> RuntimeResult<Invocation> {
        match callee {
            Value::Native(native) => {
                if let Some(expected) = native.arity {
                    if expected != args.len() {
                        return Err(RuntimeError::ArityMismatch {
                            name: native.name.clone(),
                            expected,
                            received: args.len(),
                        });
                    }
                }
                Ok(Invocation::Native((native.func)(self, args)?))
            }
            Value::BoundMethod(bound) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(bound.receiver.clone());
                full.extend(args);
                self.invoke(&bound.method, full, type_args)
            }
            Value::Overloads(set) => {
                let chosen = self.select_overload(set, &args)?;
                self.invoke(&chosen, args, type_args)
            }
            Value::Function(closure) => Ok(Invocation::Body(self.prepare_body(closure, args, type_args)?)),
            other => Err(RuntimeError::type_mismatch(format!(
                "`{}` is not callable",
                other.type_name()
            ))),
        }
    }

    fn select_overload(&mut self, set: &[Value], args: &[Value]) -> RuntimeResult<Value> {
        let mut name = String::from("<overloads>");
        for candidate in set {
            let closure = match candidate {
                Value::Function(closure) => closure,
                _ => continue,
            };
            name = closure.name().to_string();
            let params = closure.params();
            if params.len() != args.len() {
                continue;
            }
            let accepts = params.iter().zip(args.iter()).all(|(param, arg)| match &param.ty {
                Some(ty) => self.value_matches_type(arg, ty, &closure.env),
                None => true,
            });
            if accepts {
                return Ok(candidate.clone());
            }
        }
        Err(RuntimeError::type_mismatch(format!(
            "no overload of `{name}` accepts {} argument(s) of these types",
            args.len()
        )))
    }

    fn prepare_body(&mut self, closure: &Rc<Closure>, args: Vec<Value>, type_args: &[TypeExpr]) -> RuntimeResult<PreparedBody> {
        let params = closure.params();
        if closure.arity() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                name: closure.name().to_string(),
                expected: closure.arity(),
                received: args.len(),
            });
        }
        let env = closure.env.child();
        for (name, ty) in &closure.type_bindings {
            env.bind_type(name, ty.clone());
        }
        if let Some(self_type) = &closure.self_type {
            env.bind_type("Self", self_type.clone());
        }
        if let Some(def) = closure.def() {
            let bindings = infer_generics(def, &args, type_args);
            for (name, ty) in &bindings {
                env.bind_type(name, ty.clone());
            }
            self.check_constraints(&generic_constraints(def), &bindings)?;
        }
        for (param, arg) in params.iter().zip(args.iter()) {
            if let Some(ty) = &param.ty {
                if !self.value_matches_type(arg, ty, &env) {
                    return Err(RuntimeError::type_mismatch(format!(
                        "argument `{}` of `{}` expected {}, found `{}`",
                        param.name().unwrap_or("_"),
                        closure.name(),
                        ty.replace_self(&closure.self_type.clone().unwrap_or(TypeExpr::Wildcard)),
                        arg.type_name()
                    )));
                }
            }
            self.assign_by_pattern(&param.pattern, arg, &env, true)?;
        }
        let source = match &closure.source {
            FunctionSource::Def(def) => BodySource::Function(def.clone()),
            FunctionSource::Lambda(lambda) => BodySource::Lambda(lambda.clone()),
            FunctionSource::Placeholder(lambda) => {
                for (position, arg) in args.iter().enumerate() {
                    env.define(&placeholder_binding(position + 1), arg.clone());
                }
                BodySource::Placeholder(lambda.clone())
            }
        };
        Ok(PreparedBody {
            name: closure.name().to_string(),
            source,
            env,
        })
    }

    /// Runs (or resumes) a prepared body. `return` stops here; loop signals
    /// may not leave a function.
    pub(super) fn run_body(&mut self, body: &PreparedBody) -> RuntimeResult<Flow> {
        let limit = self.config.evaluator.max_call_depth;
        if self.call_depth >= limit {
            return Err(RuntimeError::StackOverflow { limit });
        }
        self.call_depth += 1;
        let outcome = match &body.source {
            BodySource::Function(def) => self.eval_block(&def.body, &body.env),
            BodySource::Lambda(lambda) => self.eval_expr(&lambda.body, &body.env),
            BodySource::Placeholder(lambda) => self.eval_expr(&lambda.body, &body.env),
        };
        self.call_depth -= 1;
        match outcome? {
            Flow::Returned(value) | Flow::Completed(value) => Ok(Flow::Completed(value)),
            Flow::Suspended(kind) => Ok(Flow::Suspended(kind)),
            other => Err(RuntimeError::SignalLeak {
                signal: other.signal_name(),
                boundary: format!("function `{}`", body.name),
            }),
        }
    }

    /// Calls a value to completion from native code (callbacks, protocol
    /// methods). The callee may not suspend.
    pub(super) fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        let flow = match self.invoke(callee, args, &[])? {
            Invocation::Native(flow) => flow,
            Invocation::Body(body) => self.run_body(&body)?,
        };
        match flow {
            Flow::Completed(value) | Flow::Returned(value) => Ok(value),
            other => Err(RuntimeError::unsupported(format!(
                "cannot suspend inside a callback (`{}`)",
                other.signal_name()
            ))),
        }
    }
}

/// Decides what a call node keeps after a native returned `flow`.
fn park_native(state: &mut Option<CallState>, flow: Flow, callee: Value, args: Vec<Value>) -> Flow {
    *state = match &flow {
        Flow::Suspended(Suspension::Blocked | Suspension::Yielded) => Some(CallState::Retry { callee, args }),
        Flow::Suspended(Suspension::GeneratorYield | Suspension::GeneratorStop) => Some(CallState::Resumed),
        _ => None,
    };
    flow
}

fn infer_generics(def: &FunctionDef, args: &[Value], type_args: &[TypeExpr]) -> HashMap<String, TypeExpr> {
    let generics = def.generic_names();
    let mut bindings = HashMap::new();
    if generics.is_empty() {
        return bindings;
    }
    if !type_args.is_empty() {
        for (name, ty) in generics.iter().zip(type_args.iter()) {
            bindings.insert(name.clone(), ty.clone());
        }
    } else {
        for (param, arg) in def.params.iter().zip(args.iter()) {
            if let Some(ty) = &param.ty {
                unify_types(ty, &arg.runtime_type(), &generics, &mut bindings);
            }
        }
    }
    for name in generics {
        bindings.entry(name).or_insert(TypeExpr::Wildcard);
    }
    bindings
}

fn generic_constraints(def: &FunctionDef) -> Vec<(String, String)> {
    let bounds = def
        .generics
        .iter()
        .map(|param| (&param.name, &param.constraints))
        .chain(
            def.where_clause
                .iter()
                .map(|clause| (&clause.type_param, &clause.constraints)),
        );
    let mut constraints = Vec::new();
    for (param, interfaces) in bounds {
        for interface in interfaces {
            if let Some(name) = interface.base_name() {
                constraints.push((param.clone(), name.to_string()));
            }
        }
    }
    constraints
}
