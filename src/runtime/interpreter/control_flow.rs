use super::Interpreter;
use crate::language::ast::{
    Block, BreakpointExpr, ForLoop, IfExpr, LoopExpr, MatchExpr, Statement, WhileLoop,
};
use crate::runtime::{
    continuation::{BlockState, ForSource, ForState, IfStage, LoopState, MatchState, NodeState},
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    iterator::{IteratorSource, IteratorState},
    outcome::{complete, Flow, Suspension},
    value::Value,
};

impl Interpreter {
    /// Runs `statements[*index..]`, recording progress in `index` and the last
    /// completed value in `result`. A statement that suspended is repeated on
    /// the next run when it is blocked or when something below it kept state;
    /// a bare yield moves past it.
    pub(super) fn step_statements(
        &mut self,
        statements: &[Statement],
        env: &Environment,
        index: &mut usize,
        result: &mut Value,
    ) -> RuntimeResult<Flow> {
        while let Some(statement) = statements.get(*index) {
            self.clear_child_marker();
            match self.eval_statement(statement, env)? {
                Flow::Completed(value) => {
                    *result = value;
                    *index += 1;
                }
                Flow::Suspended(kind) => {
                    let repeat = self.take_child_marker() || kind == Suspension::Blocked;
                    if !repeat {
                        *index += 1;
                    }
                    return Ok(Flow::Suspended(kind));
                }
                other => return Ok(other),
            }
        }
        Ok(Flow::Completed(result.clone()))
    }

    pub(super) fn eval_block(&mut self, block: &Block, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&block.id);
        let mut state = match resumed {
            Some(NodeState::Block(state)) => state,
            _ => BlockState {
                env: env.child(),
                index: 0,
                result: Value::Nil,
            },
        };
        let outcome = self.step_statements(
            &block.statements,
            &state.env,
            &mut state.index,
            &mut state.result,
        );
        self.leave_node(entry, Some(NodeState::Block(state)), &outcome);
        outcome
    }

    pub(super) fn eval_if(&mut self, node: &IfExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut stage = match resumed {
            Some(NodeState::If(stage)) => stage,
            _ => IfStage::Condition(0),
        };
        let outcome = self.run_if(node, env, &mut stage);
        self.leave_node(entry, Some(NodeState::If(stage)), &outcome);
        outcome
    }

    fn run_if(&mut self, node: &IfExpr, env: &Environment, stage: &mut IfStage) -> RuntimeResult<Flow> {
        loop {
            match *stage {
                IfStage::Condition(branch) => {
                    let condition = if branch == 0 {
                        Some(&node.condition)
                    } else {
                        match node.or_clauses.get(branch - 1) {
                            Some(clause) => clause.condition.as_ref(),
                            None => return Ok(Flow::nil()),
                        }
                    };
                    match condition {
                        None => *stage = IfStage::Body(branch),
                        Some(expr) => {
                            let value = complete!(self.eval_expr(expr, env));
                            *stage = if value.truthy() {
                                IfStage::Body(branch)
                            } else {
                                IfStage::Condition(branch + 1)
                            };
                        }
                    }
                }
                IfStage::Body(branch) => {
                    let body = if branch == 0 {
                        &node.body
                    } else {
                        &node.or_clauses[branch - 1].body
                    };
                    return self.eval_block(body, env);
                }
            }
        }
    }

    pub(super) fn eval_while(&mut self, node: &WhileLoop, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::While(state)) => state,
            _ => LoopState {
                in_body: false,
                result: Value::Nil,
            },
        };
        let outcome = self.run_while(node, env, &mut state);
        self.leave_node(entry, Some(NodeState::While(state)), &outcome);
        outcome
    }

    fn run_while(&mut self, node: &WhileLoop, env: &Environment, state: &mut LoopState) -> RuntimeResult<Flow> {
        loop {
            if !state.in_body {
                let condition = complete!(self.eval_expr(&node.condition, env));
                if !condition.truthy() {
                    return Ok(Flow::Completed(state.result.clone()));
                }
                state.in_body = true;
            }
            match self.eval_block(&node.body, env)? {
                Flow::Completed(_) | Flow::Continued(None) => state.in_body = false,
                Flow::Broke { label: None, value } => return Ok(Flow::Completed(value)),
                other => return Ok(other),
            }
        }
    }

    pub(super) fn eval_loop(&mut self, node: &LoopExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Loop(state)) => state,
            _ => LoopState {
                in_body: false,
                result: Value::Nil,
            },
        };
        let outcome = self.run_loop(node, env, &mut state);
        self.leave_node(entry, Some(NodeState::Loop(state)), &outcome);
        outcome
    }

    fn run_loop(&mut self, node: &LoopExpr, env: &Environment, state: &mut LoopState) -> RuntimeResult<Flow> {
        loop {
            state.in_body = true;
            match self.eval_block(&node.body, env)? {
                Flow::Completed(value) => {
                    state.result = value;
                    state.in_body = false;
                }
                Flow::Continued(None) => state.in_body = false,
                Flow::Broke { label: None, value } => return Ok(Flow::Completed(value)),
                other => return Ok(other),
            }
        }
    }

    pub(super) fn eval_breakpoint(&mut self, node: &BreakpointExpr, env: &Environment) -> RuntimeResult<Flow> {
        match self.eval_block(&node.body, env)? {
            Flow::Broke {
                label: Some(label),
                value,
            } if label == node.label => Ok(Flow::Completed(value)),
            Flow::Continued(Some(label)) if label == node.label => Ok(Flow::nil()),
            other => Ok(other),
        }
    }

    pub(super) fn eval_for(&mut self, node: &ForLoop, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::For(state)) => Some(state),
            _ => None,
        };
        let outcome = self.run_for(node, env, &mut state);
        self.leave_node(entry, state.map(NodeState::For), &outcome);
        outcome
    }

    fn run_for(&mut self, node: &ForLoop, env: &Environment, state: &mut Option<ForState>) -> RuntimeResult<Flow> {
        if state.is_none() {
            let iterable = complete!(self.eval_expr(&node.iterable, env));
            *state = Some(ForState {
                source: self.for_source(iterable)?,
                index: 0,
                base: env.clone(),
                iteration: None,
                result: Value::Nil,
            });
        }
        let state = match state.as_mut() {
            Some(state) => state,
            None => return Ok(Flow::nil()),
        };
        loop {
            let scope = match &state.iteration {
                Some(scope) => scope.clone(),
                None => {
                    let item = match &state.source {
                        ForSource::Items(items) => items.get(state.index).cloned(),
                        ForSource::Iterator(iterator) => {
                            let iterator = iterator.clone();
                            match self.iterator_step(&iterator)? {
                                Flow::Completed(Value::IteratorEnd) => None,
                                Flow::Completed(value) => Some(value),
                                other => return Ok(other),
                            }
                        }
                    };
                    let item = match item {
                        Some(item) => item,
                        None => return Ok(Flow::Completed(state.result.clone())),
                    };
                    state.index += 1;
                    let scope = state.base.child();
                    self.assign_by_pattern(&node.pattern, &item, &scope, true)?;
                    state.iteration = Some(scope.clone());
                    scope
                }
            };
            match self.eval_block(&node.body, &scope)? {
                Flow::Completed(_) | Flow::Continued(None) => state.iteration = None,
                Flow::Broke { label: None, value } => return Ok(Flow::Completed(value)),
                other => return Ok(other),
            }
        }
    }

    fn for_source(&mut self, iterable: Value) -> RuntimeResult<ForSource> {
        let source = match iterable {
            Value::Array(items) => ForSource::Items(items.borrow().clone()),
            Value::String(text) => ForSource::Items(text.chars().map(Value::Char).collect()),
            Value::Map(entries) => ForSource::Items(
                entries
                    .borrow()
                    .iter()
                    .map(|(key, value)| Value::array(vec![key.clone(), value.clone()]))
                    .collect(),
            ),
            Value::Iterator(_) => ForSource::Iterator(iterable),
            Value::Struct(_) => {
                if self.has_method(&iterable, "iterator") {
                    let produced = self.call_method(&iterable, "iterator", Vec::new())?;
                    return self.for_source(produced);
                }
                if !self.has_method(&iterable, "next") {
                    return Err(RuntimeError::type_mismatch(format!(
                        "`{}` is not iterable",
                        iterable.type_name()
                    )));
                }
                ForSource::Iterator(Value::Iterator(IteratorState::new(IteratorSource::Adapter(
                    iterable,
                ))))
            }
            other => {
                return Err(RuntimeError::type_mismatch(format!(
                    "`{}` is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(source)
    }

    pub(super) fn eval_match(&mut self, node: &MatchExpr, env: &Environment) -> RuntimeResult<Flow> {
        let (entry, resumed) = self.enter_node(&node.id);
        let mut state = match resumed {
            Some(NodeState::Match(state)) => Some(state),
            _ => None,
        };
        let outcome = self.run_match(node, env, &mut state);
        self.leave_node(entry, state.map(NodeState::Match), &outcome);
        outcome
    }

    fn run_match(
        &mut self,
        node: &MatchExpr,
        env: &Environment,
        state: &mut Option<MatchState>,
    ) -> RuntimeResult<Flow> {
        if state.is_none() {
            let subject = complete!(self.eval_expr(&node.subject, env));
            *state = Some(MatchState {
                subject,
                clause: None,
            });
        }
        let current = match state.as_mut() {
            Some(current) => current,
            None => return Ok(Flow::nil()),
        };
        if current.clause.is_none() {
            for (idx, clause) in node.clauses.iter().enumerate() {
                let scope = match self.try_match_pattern(&clause.pattern, &current.subject, env)? {
                    Some(scope) => scope,
                    None => continue,
                };
                if let Some(guard) = &clause.guard {
                    if !self.eval_guard(guard, &scope)? {
                        continue;
                    }
                }
                current.clause = Some((idx, scope));
                break;
            }
        }
        let (idx, scope) = match &current.clause {
            Some((idx, scope)) => (*idx, scope.clone()),
            None => {
                return Err(RuntimeError::PatternMismatch {
                    message: format!("no match clause accepts {}", current.subject),
                })
            }
        };
        self.eval_expr(&node.clauses[idx].body, &scope)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::build::*;
    use crate::runtime::{value::Value, Interpreter};

    fn run(body: Vec<crate::language::ast::Statement>) -> Value {
        let mut interpreter = Interpreter::new(RuntimeConfig::default());
        interpreter.load_module(&module(body)).unwrap()
    }

    #[test]
    fn while_loop_sums_until_condition_fails() {
        let value = run(vec![
            let_("total", int(0)),
            let_("i", int(0)),
            while_loop(
                lt(ident("i"), int(5)),
                block(vec![
                    compound("total", crate::language::ast::BinaryOp::Add, ident("i")),
                    compound("i", crate::language::ast::BinaryOp::Add, int(1)),
                ]),
            ),
            expr_stmt(ident("total")),
        ]);
        assert!(value.equals(&Value::int(10)));
    }

    #[test]
    fn labelled_break_leaves_the_breakpoint() {
        let value = run(vec![expr_stmt(breakpoint(
            "outer",
            block(vec![for_loop(
                pid("x"),
                array(vec![int(1), int(2), int(3)]),
                block(vec![expr_stmt(if_expr(
                    eq(ident("x"), int(2)),
                    block(vec![break_with(Some("outer"), mul(ident("x"), int(10)))]),
                    vec![],
                ))]),
            )]),
        ))]);
        assert!(value.equals(&Value::int(20)));
    }

    #[test]
    fn elsif_chain_picks_first_truthy_branch() {
        let value = run(vec![expr_stmt(if_expr(
            bool_lit(false),
            block(vec![expr_stmt(string("a"))]),
            vec![
                elsif(nil(), block(vec![expr_stmt(string("b"))])),
                elsif(gt(int(2), int(1)), block(vec![expr_stmt(string("c"))])),
                else_clause(block(vec![expr_stmt(string("d"))])),
            ],
        ))]);
        assert!(value.equals(&Value::string("c")));
    }

    #[test]
    fn match_uses_guards_and_reports_exhaustion() {
        let value = run(vec![expr_stmt(match_expr(
            int(7),
            vec![
                guarded(pid("n"), lt(ident("n"), int(5)), string("small")),
                clause(pid("n"), string("large")),
            ],
        ))]);
        assert!(value.equals(&Value::string("large")));

        let mut interpreter = Interpreter::new(RuntimeConfig::default());
        let err = interpreter
            .load_module(&module(vec![expr_stmt(match_expr(
                int(1),
                vec![clause(pint(2), string("two"))],
            ))]))
            .unwrap_err();
        assert!(err.to_string().contains("no match clause"));
    }
}
