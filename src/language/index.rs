//! Node indexing pass.
//!
//! Continuation state is keyed by `(context, node id)`, so every suspendable
//! node needs an id that is stable for the life of the runtime. Ids are handed
//! out by a [`NodeIdAllocator`] owned by the interpreter; nodes that already
//! carry an id (a module loaded twice, or a shared `Rc` definition) keep it.
//!
//! The same walk classifies pipe stages and sizes placeholder lambdas, since
//! both depend on what a subtree mentions.

use crate::language::ast::*;

#[derive(Debug)]
pub struct NodeIdAllocator {
    next: u32,
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> u32 {
        self.next - 1
    }

    fn claim(&mut self, id: &NodeId) {
        if !id.is_assigned() {
            id.assign(self.next);
            self.next += 1;
        }
    }
}

/// What an open pipe stage or placeholder lambda has seen so far.
#[derive(Default)]
struct Mentions {
    topic: bool,
    placeholder: usize,
}

pub struct NodeIndexer<'a> {
    ids: &'a mut NodeIdAllocator,
    scopes: Vec<Mentions>,
}

impl<'a> NodeIndexer<'a> {
    pub fn new(ids: &'a mut NodeIdAllocator) -> Self {
        Self {
            ids,
            scopes: Vec::new(),
        }
    }

    fn scoped(&mut self, expr: &Expr) -> Mentions {
        self.scopes.push(Mentions::default());
        self.expr(expr);
        self.scopes.pop().unwrap_or_default()
    }

    pub fn index_module(&mut self, module: &Module) {
        self.statements(&module.body);
    }

    pub fn index_expr(&mut self, expr: &Expr) {
        self.expr(expr);
    }

    fn statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.statement(statement);
        }
    }

    fn block(&mut self, block: &Block) {
        self.ids.claim(&block.id);
        self.statements(&block.statements);
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Expr(expr) | Statement::Raise(expr) => self.expr(expr),
            Statement::Return(value) | Statement::Yield(value) => {
                if let Some(expr) = value {
                    self.expr(expr);
                }
            }
            Statement::Break(stmt) => {
                if let Some(expr) = &stmt.value {
                    self.expr(expr);
                }
            }
            Statement::Continue(_) | Statement::Rethrow | Statement::Import(_) => {}
            Statement::While(stmt) => {
                self.ids.claim(&stmt.id);
                self.expr(&stmt.condition);
                self.block(&stmt.body);
            }
            Statement::For(stmt) => {
                self.ids.claim(&stmt.id);
                self.expr(&stmt.iterable);
                self.block(&stmt.body);
            }
            Statement::Function(def) => self.block(&def.body),
            Statement::Interface(def) => {
                for signature in &def.signatures {
                    if let Some(body) = &signature.default_body {
                        self.block(body);
                    }
                }
            }
            Statement::Impl(def) => {
                for method in &def.methods {
                    self.block(&method.body);
                }
            }
            Statement::Methods(def) => {
                for method in &def.methods {
                    self.block(&method.body);
                }
            }
            Statement::Struct(_)
            | Statement::Union(_)
            | Statement::Extern(_)
            | Statement::TypeAlias(_) => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) | Expr::Identifier(_) => {}
            Expr::Interpolation(node) => {
                self.ids.claim(&node.id);
                for part in &node.parts {
                    if let InterpolationPart::Expr(inner) = part {
                        self.expr(inner);
                    }
                }
            }
            Expr::Array(items) => items.iter().for_each(|item| self.expr(item)),
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Range { start, end, .. } => {
                self.expr(start);
                self.expr(end);
            }
            Expr::Assign(node) => {
                match &node.target {
                    AssignTarget::Pattern(_) => {}
                    AssignTarget::Member { object, .. } => self.expr(object),
                    AssignTarget::Index { object, index } => {
                        self.expr(object);
                        self.expr(index);
                    }
                }
                self.expr(&node.value);
            }
            Expr::Block(block) => self.block(block),
            Expr::If(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.condition);
                self.block(&node.body);
                for clause in &node.or_clauses {
                    if let Some(condition) = &clause.condition {
                        self.expr(condition);
                    }
                    self.block(&clause.body);
                }
            }
            Expr::Match(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.subject);
                self.clauses(&node.clauses);
            }
            Expr::Loop(node) => {
                self.ids.claim(&node.id);
                self.block(&node.body);
            }
            Expr::Breakpoint(node) => self.block(&node.body),
            Expr::Call(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.callee);
                node.args.iter().for_each(|arg| self.expr(arg));
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Lambda(node) => self.expr(&node.body),
            Expr::StructLiteral(node) => {
                node.fields.iter().for_each(|field| self.expr(&field.value));
                node.update_sources.iter().for_each(|source| self.expr(source));
            }
            Expr::Rescue(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.monitored);
                self.clauses(&node.clauses);
            }
            Expr::Ensure(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.body);
                self.block(&node.ensure_block);
            }
            Expr::OrElse(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.expr);
                self.block(&node.handler);
            }
            Expr::Propagate(inner) => self.expr(inner),
            Expr::Proc(body) | Expr::Spawn(body) => self.expr(body),
            Expr::Await(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.arms);
            }
            Expr::Iterator(node) => self.statements(&node.body),
            Expr::Pipe(node) => {
                self.ids.claim(&node.id);
                self.expr(&node.subject);
                let seen = self.scoped(&node.stage);
                node.form.set(if seen.topic {
                    PipeForm::Topic
                } else if seen.placeholder > 0 {
                    PipeForm::Placeholder(seen.placeholder)
                } else if matches!(node.stage, Expr::Call(_)) {
                    PipeForm::Call
                } else {
                    PipeForm::Callable
                });
            }
            Expr::Topic => {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.topic = true;
                }
            }
            Expr::Placeholder(index) => {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.placeholder = scope.placeholder.max(*index);
                }
            }
            Expr::PlaceholderLambda(node) => {
                let seen = self.scoped(&node.body);
                node.arity.set(seen.placeholder.max(1));
                if seen.topic {
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.topic = true;
                    }
                }
            }
            Expr::MapLiteral(entries) => {
                for entry in entries {
                    match entry {
                        MapEntry::Pair { key, value } => {
                            self.expr(key);
                            self.expr(value);
                        }
                        MapEntry::Spread(source) => self.expr(source),
                    }
                }
            }
            Expr::ImplicitMember(_) => {}
        }
    }

    fn clauses(&mut self, clauses: &[MatchClause]) {
        for clause in clauses {
            if let Some(guard) = &clause.guard {
                self.expr(guard);
            }
            self.expr(&clause.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::build::*;

    #[test]
    fn assigns_distinct_ids_and_keeps_existing_ones() {
        let module = module(vec![expr_stmt(if_expr(
            bool_lit(true),
            block(vec![expr_stmt(int(1))]),
            vec![else_clause(block(vec![expr_stmt(int(2))]))],
        ))]);
        let mut ids = NodeIdAllocator::new();
        NodeIndexer::new(&mut ids).index_module(&module);
        let issued = ids.issued();
        assert_eq!(issued, 3);

        NodeIndexer::new(&mut ids).index_module(&module);
        assert_eq!(ids.issued(), issued);
    }

    fn pipe_form(expr: &Expr) -> PipeForm {
        match expr {
            Expr::Pipe(pipe) => pipe.form.get(),
            other => panic!("expected a pipe, got {other:?}"),
        }
    }

    #[test]
    fn classifies_pipe_stages_and_placeholder_arity() {
        let stages = vec![
            pipe(int(1), add(topic(), int(1))),
            pipe(int(1), call_fn("f", vec![placeholder(), placeholder_at(3)])),
            pipe(int(1), call_fn("f", vec![int(2)])),
            pipe(int(1), ident("f")),
            pipe(int(1), placeholder_fn(add(placeholder(), topic()))),
            placeholder_fn(mul(placeholder_at(1), placeholder_at(2))),
        ];
        let module = module(stages.into_iter().map(expr_stmt).collect());
        let mut ids = NodeIdAllocator::new();
        NodeIndexer::new(&mut ids).index_module(&module);

        let indexed: Vec<&Expr> = module
            .body
            .iter()
            .map(|statement| match statement {
                Statement::Expr(expr) => expr,
                other => panic!("unexpected statement {other:?}"),
            })
            .collect();
        assert_eq!(pipe_form(indexed[0]), PipeForm::Topic);
        assert_eq!(pipe_form(indexed[1]), PipeForm::Placeholder(3));
        assert_eq!(pipe_form(indexed[2]), PipeForm::Call);
        assert_eq!(pipe_form(indexed[3]), PipeForm::Callable);
        // a topic inside a nested placeholder lambda still belongs to the pipe
        assert_eq!(pipe_form(indexed[4]), PipeForm::Topic);
        match indexed[5] {
            Expr::PlaceholderLambda(lambda) => assert_eq!(lambda.arity.get(), 2),
            other => panic!("expected a placeholder lambda, got {other:?}"),
        }
    }
}
