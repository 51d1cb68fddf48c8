//! Constructor helpers for assembling ASTs by hand.
//!
//! The evaluator never parses source; hosts (and the test-suite) build trees
//! with these helpers instead of spelling out every struct literal.

use crate::language::ast::*;
use crate::language::types::{FloatKind, IntegerKind, TypeExpr};
use std::rc::Rc;

pub fn module(body: Vec<Statement>) -> Module {
    Module {
        package: None,
        body,
    }
}

pub fn package_module(package: &str, body: Vec<Statement>) -> Module {
    Module {
        package: Some(package.to_string()),
        body,
    }
}

pub fn block(statements: Vec<Statement>) -> Block {
    Block {
        id: NodeId::default(),
        statements,
    }
}

// ---- literals -------------------------------------------------------------

pub fn nil() -> Expr {
    Expr::Literal(Literal::Nil)
}

pub fn bool_lit(value: bool) -> Expr {
    Expr::Literal(Literal::Bool(value))
}

pub fn int(value: i128) -> Expr {
    Expr::Literal(Literal::Int(value, None))
}

pub fn int_typed(value: i128, kind: IntegerKind) -> Expr {
    Expr::Literal(Literal::Int(value, Some(kind)))
}

pub fn float(value: f64) -> Expr {
    Expr::Literal(Literal::Float(value, None))
}

pub fn float_typed(value: f64, kind: FloatKind) -> Expr {
    Expr::Literal(Literal::Float(value, Some(kind)))
}

pub fn char_lit(value: char) -> Expr {
    Expr::Literal(Literal::Char(value))
}

pub fn string(value: &str) -> Expr {
    Expr::Literal(Literal::String(value.to_string()))
}

pub fn interpolate(parts: Vec<InterpolationPart>) -> Expr {
    Expr::Interpolation(Interpolation {
        id: NodeId::default(),
        parts,
    })
}

pub fn text(value: &str) -> InterpolationPart {
    InterpolationPart::Text(value.to_string())
}

pub fn splice(expr: Expr) -> InterpolationPart {
    InterpolationPart::Expr(expr)
}

pub fn map_lit(pairs: Vec<(Expr, Expr)>) -> Expr {
    Expr::MapLiteral(
        pairs
            .into_iter()
            .map(|(key, value)| MapEntry::Pair { key, value })
            .collect(),
    )
}

pub fn map_entries(entries: Vec<MapEntry>) -> Expr {
    Expr::MapLiteral(entries)
}

pub fn spread(source: Expr) -> MapEntry {
    MapEntry::Spread(source)
}

pub fn pair(key: Expr, value: Expr) -> MapEntry {
    MapEntry::Pair { key, value }
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::Array(items)
}

// ---- operators ------------------------------------------------------------

pub fn ident(name: &str) -> Expr {
    Expr::Identifier(name.to_string())
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
    }
}

pub fn not(operand: Expr) -> Expr {
    unary(UnaryOp::Not, operand)
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Add, left, right)
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Sub, left, right)
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Mul, left, right)
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Eq, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Lt, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Gt, left, right)
}

pub fn pipe(subject: Expr, stage: Expr) -> Expr {
    Expr::Pipe(Box::new(PipeExpr {
        id: NodeId::default(),
        subject,
        stage,
        form: Default::default(),
    }))
}

pub fn topic() -> Expr {
    Expr::Topic
}

/// `@`
pub fn placeholder() -> Expr {
    Expr::Placeholder(1)
}

/// `@n`
pub fn placeholder_at(index: usize) -> Expr {
    Expr::Placeholder(index)
}

pub fn placeholder_fn(body: Expr) -> Expr {
    Expr::PlaceholderLambda(Rc::new(PlaceholderLambda {
        arity: Default::default(),
        body,
    }))
}

pub fn implicit(member: &str) -> Expr {
    Expr::ImplicitMember(member.to_string())
}

pub fn range(start: Expr, end: Expr, inclusive: bool) -> Expr {
    Expr::Range {
        start: Box::new(start),
        end: Box::new(end),
        inclusive,
    }
}

// ---- assignment -----------------------------------------------------------

pub fn declare(pattern: Pattern, value: Expr) -> Expr {
    Expr::Assign(Box::new(Assignment {
        target: AssignTarget::Pattern(pattern),
        op: AssignOp::Declare,
        value,
    }))
}

pub fn let_(name: &str, value: Expr) -> Statement {
    Statement::Expr(declare(pid(name), value))
}

pub fn assign(pattern: Pattern, value: Expr) -> Expr {
    Expr::Assign(Box::new(Assignment {
        target: AssignTarget::Pattern(pattern),
        op: AssignOp::Assign,
        value,
    }))
}

pub fn set(name: &str, value: Expr) -> Statement {
    Statement::Expr(assign(pid(name), value))
}

pub fn compound(name: &str, op: BinaryOp, value: Expr) -> Statement {
    Statement::Expr(Expr::Assign(Box::new(Assignment {
        target: AssignTarget::Pattern(pid(name)),
        op: AssignOp::Compound(op),
        value,
    })))
}

pub fn assign_member(object: Expr, member: &str, value: Expr) -> Expr {
    Expr::Assign(Box::new(Assignment {
        target: AssignTarget::Member {
            object,
            member: member.to_string(),
        },
        op: AssignOp::Assign,
        value,
    }))
}

pub fn assign_index(object: Expr, index: Expr, value: Expr) -> Expr {
    Expr::Assign(Box::new(Assignment {
        target: AssignTarget::Index { object, index },
        op: AssignOp::Assign,
        value,
    }))
}

// ---- control flow ---------------------------------------------------------

pub fn do_block(statements: Vec<Statement>) -> Expr {
    Expr::Block(block(statements))
}

pub fn if_expr(condition: Expr, body: Block, or_clauses: Vec<OrClause>) -> Expr {
    Expr::If(Box::new(IfExpr {
        id: NodeId::default(),
        condition,
        body,
        or_clauses,
    }))
}

pub fn elsif(condition: Expr, body: Block) -> OrClause {
    OrClause {
        condition: Some(condition),
        body,
    }
}

pub fn else_clause(body: Block) -> OrClause {
    OrClause {
        condition: None,
        body,
    }
}

pub fn match_expr(subject: Expr, clauses: Vec<MatchClause>) -> Expr {
    Expr::Match(Box::new(MatchExpr {
        id: NodeId::default(),
        subject,
        clauses,
    }))
}

pub fn clause(pattern: Pattern, body: Expr) -> MatchClause {
    MatchClause {
        pattern,
        guard: None,
        body,
    }
}

pub fn guarded(pattern: Pattern, guard: Expr, body: Expr) -> MatchClause {
    MatchClause {
        pattern,
        guard: Some(guard),
        body,
    }
}

pub fn loop_expr(body: Block) -> Expr {
    Expr::Loop(Box::new(LoopExpr {
        id: NodeId::default(),
        body,
    }))
}

pub fn breakpoint(label: &str, body: Block) -> Expr {
    Expr::Breakpoint(Box::new(BreakpointExpr {
        label: label.to_string(),
        body,
    }))
}

pub fn while_loop(condition: Expr, body: Block) -> Statement {
    Statement::While(WhileLoop {
        id: NodeId::default(),
        condition,
        body,
    })
}

pub fn for_loop(pattern: Pattern, iterable: Expr, body: Block) -> Statement {
    Statement::For(ForLoop {
        id: NodeId::default(),
        pattern,
        iterable,
        body,
    })
}

pub fn expr_stmt(expr: Expr) -> Statement {
    Statement::Expr(expr)
}

pub fn ret(value: Expr) -> Statement {
    Statement::Return(Some(value))
}

pub fn break_stmt() -> Statement {
    Statement::Break(BreakStatement {
        label: None,
        value: None,
    })
}

pub fn break_with(label: Option<&str>, value: Expr) -> Statement {
    Statement::Break(BreakStatement {
        label: label.map(str::to_string),
        value: Some(value),
    })
}

pub fn continue_stmt() -> Statement {
    Statement::Continue(None)
}

pub fn raise(value: Expr) -> Statement {
    Statement::Raise(value)
}

pub fn yield_stmt(value: Expr) -> Statement {
    Statement::Yield(Some(value))
}

// ---- calls and members ----------------------------------------------------

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(Box::new(CallExpr {
        id: NodeId::default(),
        callee,
        args,
        type_args: Vec::new(),
    }))
}

pub fn call_typed(callee: Expr, type_args: Vec<TypeExpr>, args: Vec<Expr>) -> Expr {
    Expr::Call(Box::new(CallExpr {
        id: NodeId::default(),
        callee,
        args,
        type_args,
    }))
}

pub fn call_fn(name: &str, args: Vec<Expr>) -> Expr {
    call(ident(name), args)
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::Member {
        object: Box::new(object),
        member: name.to_string(),
    }
}

pub fn method_call(object: Expr, name: &str, args: Vec<Expr>) -> Expr {
    call(member(object, name), args)
}

pub fn index(object: Expr, index: Expr) -> Expr {
    Expr::Index {
        object: Box::new(object),
        index: Box::new(index),
    }
}

pub fn lambda(params: Vec<Param>, body: Expr) -> Expr {
    Expr::Lambda(Rc::new(LambdaExpr { params, body }))
}

pub fn struct_lit(type_name: &str, fields: Vec<(&str, Expr)>) -> Expr {
    Expr::StructLiteral(Box::new(StructLiteral {
        type_name: type_name.to_string(),
        type_args: Vec::new(),
        positional: false,
        fields: fields
            .into_iter()
            .map(|(name, value)| FieldInit {
                name: Some(name.to_string()),
                value,
            })
            .collect(),
        update_sources: Vec::new(),
    }))
}

pub fn positional_lit(type_name: &str, values: Vec<Expr>) -> Expr {
    Expr::StructLiteral(Box::new(StructLiteral {
        type_name: type_name.to_string(),
        type_args: Vec::new(),
        positional: true,
        fields: values
            .into_iter()
            .map(|value| FieldInit { name: None, value })
            .collect(),
        update_sources: Vec::new(),
    }))
}

pub fn struct_update(type_name: &str, source: Expr, fields: Vec<(&str, Expr)>) -> Expr {
    let mut literal = match struct_lit(type_name, fields) {
        Expr::StructLiteral(literal) => literal,
        _ => unreachable!("struct_lit always builds a struct literal"),
    };
    literal.update_sources.push(source);
    Expr::StructLiteral(literal)
}

// ---- errors ---------------------------------------------------------------

pub fn rescue(monitored: Expr, clauses: Vec<MatchClause>) -> Expr {
    Expr::Rescue(Box::new(RescueExpr {
        id: NodeId::default(),
        monitored,
        clauses,
    }))
}

pub fn ensure(body: Expr, ensure_block: Block) -> Expr {
    Expr::Ensure(Box::new(EnsureExpr {
        id: NodeId::default(),
        body,
        ensure_block,
    }))
}

pub fn or_else(expr: Expr, binding: Option<&str>, handler: Block) -> Expr {
    Expr::OrElse(Box::new(OrElseExpr {
        id: NodeId::default(),
        expr,
        binding: binding.map(str::to_string),
        handler,
    }))
}

pub fn propagate(expr: Expr) -> Expr {
    Expr::Propagate(Box::new(expr))
}

// ---- concurrency ----------------------------------------------------------

pub fn proc_expr(body: Expr) -> Expr {
    Expr::Proc(Rc::new(body))
}

pub fn spawn(body: Expr) -> Expr {
    Expr::Spawn(Rc::new(body))
}

pub fn await_expr(arms: Expr) -> Expr {
    Expr::Await(Box::new(AwaitExpr {
        id: NodeId::default(),
        arms,
    }))
}

pub fn iterator(binding: Option<&str>, body: Vec<Statement>) -> Expr {
    Expr::Iterator(Rc::new(IteratorLiteral {
        binding: binding.map(str::to_string),
        body,
    }))
}

// ---- patterns -------------------------------------------------------------

pub fn pid(name: &str) -> Pattern {
    Pattern::Identifier(name.to_string())
}

pub fn wildcard() -> Pattern {
    Pattern::Wildcard
}

pub fn plit(literal: Literal) -> Pattern {
    Pattern::Literal(literal)
}

pub fn pstr(value: &str) -> Pattern {
    Pattern::Literal(Literal::String(value.to_string()))
}

pub fn pint(value: i128) -> Pattern {
    Pattern::Literal(Literal::Int(value, None))
}

pub fn pstruct(type_name: &str, fields: Vec<(&str, Pattern)>) -> Pattern {
    Pattern::Struct {
        type_name: Some(type_name.to_string()),
        positional: false,
        fields: fields
            .into_iter()
            .map(|(field, pattern)| StructPatternField {
                field: Some(field.to_string()),
                pattern,
                binding: None,
            })
            .collect(),
    }
}

pub fn ppositional(type_name: &str, elements: Vec<Pattern>) -> Pattern {
    Pattern::Struct {
        type_name: Some(type_name.to_string()),
        positional: true,
        fields: elements
            .into_iter()
            .map(|pattern| StructPatternField {
                field: None,
                pattern,
                binding: None,
            })
            .collect(),
    }
}

pub fn parray(elements: Vec<Pattern>, rest: ArrayRest) -> Pattern {
    Pattern::Array { elements, rest }
}

pub fn typed(pattern: Pattern, ty: TypeExpr) -> Pattern {
    Pattern::Typed {
        pattern: Box::new(pattern),
        ty,
    }
}

// ---- types and definitions ------------------------------------------------

pub fn ty(name: &str) -> TypeExpr {
    TypeExpr::named(name)
}

pub fn ty_generic(name: &str, args: Vec<TypeExpr>) -> TypeExpr {
    TypeExpr::generic(name, args)
}

pub fn param(name: &str) -> Param {
    Param {
        pattern: pid(name),
        ty: None,
    }
}

pub fn typed_param(name: &str, ty: TypeExpr) -> Param {
    Param {
        pattern: pid(name),
        ty: Some(ty),
    }
}

pub fn self_param() -> Param {
    Param {
        pattern: pid("self"),
        ty: Some(TypeExpr::SelfType),
    }
}

pub fn generic(name: &str, constraints: Vec<TypeExpr>) -> GenericParam {
    GenericParam {
        name: name.to_string(),
        constraints,
    }
}

pub fn function(name: &str, params: Vec<Param>, body: Vec<Statement>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        generics: Vec::new(),
        params,
        return_type: None,
        where_clause: Vec::new(),
        body: block(body),
        is_private: false,
    }
}

impl FunctionDef {
    pub fn with_generics(mut self, generics: Vec<GenericParam>) -> Self {
        self.generics = generics;
        self
    }

    pub fn with_where(mut self, type_param: &str, constraints: Vec<TypeExpr>) -> Self {
        self.where_clause.push(WhereConstraint {
            type_param: type_param.to_string(),
            constraints,
        });
        self
    }

    pub fn returning(mut self, ty: TypeExpr) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }
}

pub fn fn_stmt(def: FunctionDef) -> Statement {
    Statement::Function(Rc::new(def))
}

pub fn struct_def(name: &str, fields: Vec<(&str, TypeExpr)>) -> StructDef {
    StructDef {
        name: name.to_string(),
        generics: Vec::new(),
        kind: if fields.is_empty() {
            StructKind::Singleton
        } else {
            StructKind::Named
        },
        fields: fields
            .into_iter()
            .map(|(name, ty)| FieldDef {
                name: Some(name.to_string()),
                ty,
            })
            .collect(),
        is_private: false,
    }
}

pub fn positional_struct_def(name: &str, fields: Vec<TypeExpr>) -> StructDef {
    StructDef {
        name: name.to_string(),
        generics: Vec::new(),
        kind: StructKind::Positional,
        fields: fields
            .into_iter()
            .map(|ty| FieldDef { name: None, ty })
            .collect(),
        is_private: false,
    }
}

impl StructDef {
    pub fn with_generics(mut self, generics: Vec<GenericParam>) -> Self {
        self.generics = generics;
        self
    }
}

pub fn struct_stmt(def: StructDef) -> Statement {
    Statement::Struct(Rc::new(def))
}

pub fn union_stmt(name: &str, variants: Vec<TypeExpr>) -> Statement {
    Statement::Union(Rc::new(UnionDef {
        name: name.to_string(),
        generics: Vec::new(),
        variants,
        is_private: false,
    }))
}

pub fn signature(name: &str, params: Vec<Param>) -> FunctionSignature {
    FunctionSignature {
        name: name.to_string(),
        generics: Vec::new(),
        params,
        return_type: None,
        default_body: None,
    }
}

pub fn default_signature(name: &str, params: Vec<Param>, body: Vec<Statement>) -> FunctionSignature {
    FunctionSignature {
        default_body: Some(block(body)),
        ..signature(name, params)
    }
}

pub fn interface(name: &str, signatures: Vec<FunctionSignature>) -> InterfaceDef {
    InterfaceDef {
        name: name.to_string(),
        generics: Vec::new(),
        self_type: None,
        signatures,
        base_interfaces: Vec::new(),
        is_private: false,
    }
}

impl InterfaceDef {
    pub fn extending(mut self, bases: Vec<TypeExpr>) -> Self {
        self.base_interfaces = bases;
        self
    }
}

pub fn interface_stmt(def: InterfaceDef) -> Statement {
    Statement::Interface(Rc::new(def))
}

pub fn impl_def(interface: &str, target: TypeExpr, methods: Vec<FunctionDef>) -> ImplDef {
    ImplDef {
        impl_name: None,
        interface: interface.to_string(),
        interface_args: Vec::new(),
        target,
        generics: Vec::new(),
        where_clause: Vec::new(),
        methods: methods.into_iter().map(Rc::new).collect(),
        is_private: false,
    }
}

impl ImplDef {
    pub fn named(mut self, name: &str) -> Self {
        self.impl_name = Some(name.to_string());
        self
    }

    pub fn with_generics(mut self, generics: Vec<GenericParam>) -> Self {
        self.generics = generics;
        self
    }

    pub fn with_where(mut self, type_param: &str, constraints: Vec<TypeExpr>) -> Self {
        self.where_clause.push(WhereConstraint {
            type_param: type_param.to_string(),
            constraints,
        });
        self
    }
}

pub fn impl_stmt(def: ImplDef) -> Statement {
    Statement::Impl(Rc::new(def))
}

pub fn methods_stmt(target: TypeExpr, methods: Vec<FunctionDef>) -> Statement {
    Statement::Methods(Rc::new(MethodsDef {
        target,
        generics: Vec::new(),
        where_clause: Vec::new(),
        methods: methods.into_iter().map(Rc::new).collect(),
    }))
}

pub fn extern_stmt(name: &str, params: Vec<Param>) -> Statement {
    Statement::Extern(Rc::new(ExternFunction {
        name: name.to_string(),
        params,
        return_type: None,
    }))
}

pub fn type_alias(name: &str, generics: Vec<GenericParam>, target: TypeExpr) -> Statement {
    Statement::TypeAlias(Rc::new(TypeAliasDef {
        name: name.to_string(),
        generics,
        target,
        is_private: false,
    }))
}

pub fn import_package(package: &str, alias: Option<&str>) -> Statement {
    Statement::Import(Import {
        package: package.to_string(),
        kind: ImportKind::Package {
            alias: alias.map(str::to_string),
        },
    })
}

pub fn import_selectors(package: &str, selectors: Vec<(&str, Option<&str>)>) -> Statement {
    Statement::Import(Import {
        package: package.to_string(),
        kind: ImportKind::Selectors(
            selectors
                .into_iter()
                .map(|(name, alias)| ImportSelector {
                    name: name.to_string(),
                    alias: alias.map(str::to_string),
                })
                .collect(),
        ),
    })
}

pub fn import_all(package: &str) -> Statement {
    Statement::Import(Import {
        package: package.to_string(),
        kind: ImportKind::Wildcard,
    })
}
