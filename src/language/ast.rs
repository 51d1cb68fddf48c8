use crate::language::types::{FloatKind, IntegerKind, TypeExpr};
use std::cell::Cell;
use std::rc::Rc;

/// Stable identity of a suspendable node. Zero means "not yet indexed"; the
/// indexer fills ids in place when a module is loaded.
#[derive(Clone, Debug, Default)]
pub struct NodeId(Cell<u32>);

impl NodeId {
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    pub fn is_assigned(&self) -> bool {
        self.0.get() != 0
    }

    pub(crate) fn assign(&self, id: u32) {
        self.0.set(id);
    }
}

#[derive(Clone, Debug)]
pub struct Module {
    pub package: Option<String>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub id: NodeId,
    pub statements: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub enum Statement {
    Expr(Expr),
    Return(Option<Expr>),
    Break(BreakStatement),
    Continue(Option<String>),
    Raise(Expr),
    Rethrow,
    Yield(Option<Expr>),
    While(WhileLoop),
    For(ForLoop),
    Function(Rc<FunctionDef>),
    Struct(Rc<StructDef>),
    Union(Rc<UnionDef>),
    Interface(Rc<InterfaceDef>),
    Impl(Rc<ImplDef>),
    Methods(Rc<MethodsDef>),
    Extern(Rc<ExternFunction>),
    Import(Import),
    TypeAlias(Rc<TypeAliasDef>),
}

/// `type Name T = target`.
#[derive(Clone, Debug)]
pub struct TypeAliasDef {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub target: TypeExpr,
    pub is_private: bool,
}

#[derive(Clone, Debug)]
pub struct BreakStatement {
    pub label: Option<String>,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct WhileLoop {
    pub id: NodeId,
    pub condition: Expr,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub struct ForLoop {
    pub id: NodeId,
    pub pattern: Pattern,
    pub iterable: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i128, Option<IntegerKind>),
    Float(f64, Option<FloatKind>),
    Char(char),
    String(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    /// `.~`
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// `//`, Euclidean quotient.
    FloorDiv,
    /// `/%`, Euclidean quotient and remainder as a `DivMod`.
    DivMod,
    /// `^`
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal),
    Interpolation(Interpolation),
    Array(Vec<Expr>),
    Identifier(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
    },
    Assign(Box<Assignment>),
    Block(Block),
    If(Box<IfExpr>),
    Match(Box<MatchExpr>),
    Loop(Box<LoopExpr>),
    Breakpoint(Box<BreakpointExpr>),
    Call(Box<CallExpr>),
    Member {
        object: Box<Expr>,
        member: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Lambda(Rc<LambdaExpr>),
    StructLiteral(Box<StructLiteral>),
    Rescue(Box<RescueExpr>),
    Ensure(Box<EnsureExpr>),
    OrElse(Box<OrElseExpr>),
    Propagate(Box<Expr>),
    Proc(Rc<Expr>),
    Spawn(Rc<Expr>),
    Await(Box<AwaitExpr>),
    Iterator(Rc<IteratorLiteral>),
    Pipe(Box<PipeExpr>),
    /// `%` inside a pipe stage.
    Topic,
    /// `@` is `Placeholder(1)`, `@n` is `Placeholder(n)`.
    Placeholder(usize),
    PlaceholderLambda(Rc<PlaceholderLambda>),
    MapLiteral(Vec<MapEntry>),
    /// `#field`, resolved against the innermost pipe subject or `self`.
    ImplicitMember(String),
}

/// How a pipe stage receives its subject. The indexer classifies each stage
/// once; unindexed pipes fall back to calling the stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipeForm {
    /// The stage mentions `%` and is evaluated as-is.
    Topic,
    /// The stage uses placeholders; the subject is bound to `@`.
    Placeholder(usize),
    /// A call stage; the subject becomes the first argument.
    Call,
    /// Any other stage must produce something callable.
    #[default]
    Callable,
}

/// `subject |> stage` and `subject |>> stage`. Both spellings share one node;
/// they only differ in precedence.
#[derive(Clone, Debug)]
pub struct PipeExpr {
    pub id: NodeId,
    pub subject: Expr,
    pub stage: Expr,
    pub form: Cell<PipeForm>,
}

/// An expression with `@` placeholders that stands for a function. Its arity
/// is the highest placeholder index, filled in by the indexer.
#[derive(Clone, Debug)]
pub struct PlaceholderLambda {
    pub arity: Cell<usize>,
    pub body: Expr,
}

#[derive(Clone, Debug)]
pub enum MapEntry {
    Pair { key: Expr, value: Expr },
    /// `...other` copies every entry of another map.
    Spread(Expr),
}

#[derive(Clone, Debug)]
pub struct Interpolation {
    pub id: NodeId,
    pub parts: Vec<InterpolationPart>,
}

#[derive(Clone, Debug)]
pub enum InterpolationPart {
    Text(String),
    Expr(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Declare,
    Assign,
    Compound(BinaryOp),
}

#[derive(Clone, Debug)]
pub enum AssignTarget {
    Pattern(Pattern),
    Member { object: Expr, member: String },
    Index { object: Expr, index: Expr },
}

#[derive(Clone, Debug)]
pub struct Assignment {
    pub target: AssignTarget,
    pub op: AssignOp,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct IfExpr {
    pub id: NodeId,
    pub condition: Expr,
    pub body: Block,
    pub or_clauses: Vec<OrClause>,
}

/// `elsif cond { }` when `condition` is present, trailing `else { }` otherwise.
#[derive(Clone, Debug)]
pub struct OrClause {
    pub condition: Option<Expr>,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub struct MatchExpr {
    pub id: NodeId,
    pub subject: Expr,
    pub clauses: Vec<MatchClause>,
}

#[derive(Clone, Debug)]
pub struct MatchClause {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Clone, Debug)]
pub struct LoopExpr {
    pub id: NodeId,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub struct BreakpointExpr {
    pub label: String,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub struct CallExpr {
    pub id: NodeId,
    pub callee: Expr,
    pub args: Vec<Expr>,
    pub type_args: Vec<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct LambdaExpr {
    pub params: Vec<Param>,
    pub body: Expr,
}

#[derive(Clone, Debug)]
pub struct StructLiteral {
    pub type_name: String,
    pub type_args: Vec<TypeExpr>,
    pub positional: bool,
    pub fields: Vec<FieldInit>,
    pub update_sources: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub struct FieldInit {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct RescueExpr {
    pub id: NodeId,
    pub monitored: Expr,
    pub clauses: Vec<MatchClause>,
}

#[derive(Clone, Debug)]
pub struct EnsureExpr {
    pub id: NodeId,
    pub body: Expr,
    pub ensure_block: Block,
}

#[derive(Clone, Debug)]
pub struct OrElseExpr {
    pub id: NodeId,
    pub expr: Expr,
    pub binding: Option<String>,
    pub handler: Block,
}

#[derive(Clone, Debug)]
pub struct AwaitExpr {
    pub id: NodeId,
    pub arms: Expr,
}

#[derive(Clone, Debug)]
pub struct IteratorLiteral {
    pub binding: Option<String>,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub enum Pattern {
    Identifier(String),
    Wildcard,
    Literal(Literal),
    Struct {
        type_name: Option<String>,
        positional: bool,
        fields: Vec<StructPatternField>,
    },
    Array {
        elements: Vec<Pattern>,
        rest: ArrayRest,
    },
    Typed {
        pattern: Box<Pattern>,
        ty: TypeExpr,
    },
}

#[derive(Clone, Debug)]
pub struct StructPatternField {
    pub field: Option<String>,
    pub pattern: Pattern,
    pub binding: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayRest {
    None,
    Discard,
    Bind(String),
}

impl Pattern {
    /// Every identifier the pattern would bind, in source order.
    pub fn bound_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            Pattern::Identifier(name) => names.push(name.clone()),
            Pattern::Wildcard | Pattern::Literal(_) => {}
            Pattern::Struct { fields, .. } => {
                for field in fields {
                    field.pattern.collect_names(names);
                    if let Some(binding) = &field.binding {
                        names.push(binding.clone());
                    }
                }
            }
            Pattern::Array { elements, rest } => {
                for element in elements {
                    element.collect_names(names);
                }
                if let ArrayRest::Bind(name) = rest {
                    names.push(name.clone());
                }
            }
            Pattern::Typed { pattern, .. } => pattern.collect_names(names),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub pattern: Pattern,
    pub ty: Option<TypeExpr>,
}

impl Param {
    pub fn name(&self) -> Option<&str> {
        match &self.pattern {
            Pattern::Identifier(name) => Some(name),
            Pattern::Typed { pattern, .. } => match pattern.as_ref() {
                Pattern::Identifier(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenericParam {
    pub name: String,
    pub constraints: Vec<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct WhereConstraint {
    pub type_param: String,
    pub constraints: Vec<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub where_clause: Vec<WhereConstraint>,
    pub body: Block,
    pub is_private: bool,
}

impl FunctionDef {
    pub fn generic_names(&self) -> Vec<String> {
        self.generics.iter().map(|param| param.name.clone()).collect()
    }

    /// A method takes its receiver as a first parameter named `self` or typed `Self`.
    pub fn takes_self(&self) -> bool {
        self.params.first().map_or(false, |param| {
            param.name() == Some("self")
                || matches!(&param.ty, Some(TypeExpr::SelfType))
                || matches!(&param.ty, Some(TypeExpr::Named(name, args)) if name == "Self" && args.is_empty())
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructKind {
    Singleton,
    Named,
    Positional,
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: Option<String>,
    pub ty: TypeExpr,
}

#[derive(Clone, Debug)]
pub struct StructDef {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub kind: StructKind,
    pub fields: Vec<FieldDef>,
    pub is_private: bool,
}

impl StructDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name.as_deref() == Some(name))
    }

    pub fn generic_names(&self) -> Vec<String> {
        self.generics.iter().map(|param| param.name.clone()).collect()
    }
}

#[derive(Clone, Debug)]
pub struct UnionDef {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub variants: Vec<TypeExpr>,
    pub is_private: bool,
}

#[derive(Clone, Debug)]
pub struct FunctionSignature {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub default_body: Option<Block>,
}

#[derive(Clone, Debug)]
pub struct InterfaceDef {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub self_type: Option<TypeExpr>,
    pub signatures: Vec<FunctionSignature>,
    pub base_interfaces: Vec<TypeExpr>,
    pub is_private: bool,
}

#[derive(Clone, Debug)]
pub struct ImplDef {
    pub impl_name: Option<String>,
    pub interface: String,
    pub interface_args: Vec<TypeExpr>,
    pub target: TypeExpr,
    pub generics: Vec<GenericParam>,
    pub where_clause: Vec<WhereConstraint>,
    pub methods: Vec<Rc<FunctionDef>>,
    pub is_private: bool,
}

#[derive(Clone, Debug)]
pub struct MethodsDef {
    pub target: TypeExpr,
    pub generics: Vec<GenericParam>,
    pub where_clause: Vec<WhereConstraint>,
    pub methods: Vec<Rc<FunctionDef>>,
}

#[derive(Clone, Debug)]
pub struct ExternFunction {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct Import {
    pub package: String,
    pub kind: ImportKind,
}

#[derive(Clone, Debug)]
pub enum ImportKind {
    Package { alias: Option<String> },
    Wildcard,
    Selectors(Vec<ImportSelector>),
}

#[derive(Clone, Debug)]
pub struct ImportSelector {
    pub name: String,
    pub alias: Option<String>,
}
