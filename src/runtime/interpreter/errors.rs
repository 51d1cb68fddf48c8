use super::Interpreter;
use crate::language::ast::{EnsureExpr, Expr, OrElseExpr, RescueExpr};
use crate::runtime::{
    continuation::{EnsureState, NodeState, OrElseState, RescueState},
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    outcome::{complete, Flow},
    value::{ErrorValue, Value},
};
use std::rc::Rc;

/// A user-level raise carrying a plain error record.
pub(super) fn raised(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Raise {
        value: Value::error(message),
    }
}

/// The value `rescue` and task boundaries see for a caught error.
pub(super) fn error_value(error: RuntimeError) -> Value {
    match error {
        RuntimeError::Raise { value } => value,
        other => Value::error(other.to_string()),
    }
}

impl Interpreter {
    pub(super) fn eval_raise(&mut self, expr: &Expr, env: &Environment) -> RuntimeResult<Flow> {
        let value = complete!(self.eval_expr(expr, env));
        let value = match value {
            Value::Error(_) => value,
            payload => {
                let message = self.display_value(&payload)?;
                ErrorValue::with_payload(message, payload)
            }
        };
        tracing::trace!(error = %value, "raise");
        Err(RuntimeError::Raise { value })
    }

    pub(super) fn eval_rethrow(&mut self) -> RuntimeResult<Flow> {
        match self.rethrow.last() {
            Some(value) => Err(RuntimeError::Raise { value: value.clone() }),
            None => Err(RuntimeError::unsupported("`rethrow` outside of a rescue handler")),
        }
    }

    pub(super) fn eval_rescue(&mut self, node: &RescueExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Rescue(state)) => state,
            _ => RescueState::Monitored,
        };
        let outcome = self.run_rescue(node, env, &mut state);
        self.leave_node(entry, Some(NodeState::Rescue(state)), &outcome);
        outcome
    }

    fn run_rescue(&mut self, node: &RescueExpr, env: &Environment, state: &mut RescueState) -> RuntimeResult<Flow> {
        if let RescueState::Monitored = state {
            let error = match self.eval_expr(&node.monitored, env) {
                Ok(flow) => return Ok(flow),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => error_value(err),
            };
            let subject = match &error {
                Value::Error(record) => record.payload.clone().unwrap_or_else(|| error.clone()),
                other => other.clone(),
            };
            let mut chosen = None;
            for (idx, clause) in node.clauses.iter().enumerate() {
                let scope = match self.try_match_pattern(&clause.pattern, &subject, env)? {
                    Some(scope) => scope,
                    None => continue,
                };
                if let Some(guard) = &clause.guard {
                    if !self.eval_guard(guard, &scope)? {
                        continue;
                    }
                }
                chosen = Some((idx, scope));
                break;
            }
            match chosen {
                Some((clause, scope)) => {
                    *state = RescueState::Handler {
                        clause,
                        env: scope,
                        error,
                    }
                }
                None => return Err(RuntimeError::Raise { value: error }),
            }
        }
        match state {
            RescueState::Handler { clause, env: scope, error } => {
                let scope = scope.clone();
                self.rethrow.push(error.clone());
                let outcome = self.eval_expr(&node.clauses[*clause].body, &scope);
                self.rethrow.pop();
                outcome
            }
            RescueState::Monitored => Ok(Flow::nil()),
        }
    }

    pub(super) fn eval_ensure(&mut self, node: &EnsureExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Ensure(state)) => state,
            _ => EnsureState::Body,
        };
        let outcome = self.run_ensure(node, env, &mut state);
        self.leave_node(entry, Some(NodeState::Ensure(state)), &outcome);
        outcome
    }

    fn run_ensure(&mut self, node: &EnsureExpr, env: &Environment, state: &mut EnsureState) -> RuntimeResult<Flow> {
        if let EnsureState::Body = state {
            let outcome = self.eval_expr(&node.body, env);
            if let Ok(Flow::Suspended(kind)) = outcome {
                return Ok(Flow::Suspended(kind));
            }
            *state = EnsureState::Cleanup(Some(outcome));
        }
        match self.eval_block(&node.ensure_block, env)? {
            Flow::Completed(_) => {}
            other => return Ok(other),
        }
        match state {
            EnsureState::Cleanup(pending) => pending.take().unwrap_or_else(|| Ok(Flow::nil())),
            EnsureState::Body => Ok(Flow::nil()),
        }
    }

    pub(super) fn eval_or_else(&mut self, node: &OrElseExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::OrElse(state)) => Some(state),
            _ => None,
        };
        let outcome = self.run_or_else(node, env, &mut state);
        self.leave_node(entry, state.map(NodeState::OrElse), &outcome);
        outcome
    }

    fn run_or_else(
        &mut self,
        node: &OrElseExpr,
        env: &Environment,
        state: &mut Option<OrElseState>,
    ) -> RuntimeResult<Flow> {
        let scope = match state {
            Some(state) => state.env.clone(),
            None => {
                let failure = match self.eval_expr(&node.expr, env) {
                    Ok(Flow::Completed(value)) => {
                        if !self.is_failure(&value) {
                            return Ok(Flow::Completed(value));
                        }
                        value
                    }
                    Ok(other) => return Ok(other),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => error_value(err),
                };
                let scope = env.child();
                if let Some(binding) = &node.binding {
                    scope.define(binding, failure);
                }
                *state = Some(OrElseState { env: scope.clone() });
                scope
            }
        };
        self.eval_block(&node.handler, &scope)
    }

    /// `nil`, error records, and values implementing `Error`.
    fn is_failure(&mut self, value: &Value) -> bool {
        match value {
            Value::Nil | Value::Error(_) => true,
            Value::Struct(_) => self.type_implements(&value.runtime_type(), "Error"),
            _ => false,
        }
    }

    pub(super) fn eval_propagate(&mut self, inner: &Expr, env: &Environment) -> RuntimeResult<Flow> {
        let value = complete!(self.eval_expr(inner, env));
        match &value {
            Value::Error(_) => Err(RuntimeError::Raise { value }),
            Value::Struct(_) if self.type_implements(&value.runtime_type(), "Error") => {
                let error = self.coerce_error(&value)?;
                Err(RuntimeError::Raise { value: error })
            }
            _ => Ok(Flow::Completed(value)),
        }
    }

    /// Builds a uniform error record from an `Error`-capable value.
    fn coerce_error(&mut self, value: &Value) -> RuntimeResult<Value> {
        let message = match self.call_method(value, "message", Vec::new())? {
            Value::String(text) => text,
            other => self.display_value(&other)?,
        };
        let cause = if self.has_method(value, "cause") {
            Some(self.call_method(value, "cause", Vec::new())?).filter(|cause| !cause.is_nil())
        } else {
            None
        };
        Ok(Value::Error(Rc::new(ErrorValue {
            message,
            cause,
            payload: Some(value.clone()),
        })))
    }
}
