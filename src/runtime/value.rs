use crate::language::{
    ast::{FunctionDef, InterfaceDef, LambdaExpr, Param, PlaceholderLambda, StructDef, StructKind, UnionDef},
    types::{FloatKind, IntegerKind, TypeExpr},
};
use crate::runtime::{
    environment::Environment,
    error::RuntimeResult,
    interpreter::Interpreter,
    iterator::IteratorRef,
    outcome::Flow,
    sync::{ChannelRef, MutexRef},
    task::{NativeAwaitable, RegistrationRef, TaskRef, WakerRef},
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum Value {
    Nil,
    Void,
    Bool(bool),
    Char(char),
    String(String),
    Integer { value: i128, kind: IntegerKind },
    Float { value: f64, kind: FloatKind },
    Struct(StructRef),
    Array(ArrayRef),
    Map(MapRef),
    Error(Rc<ErrorValue>),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
    Overloads(Rc<Vec<Value>>),
    StructDef(Rc<StructDef>),
    InterfaceDef(Rc<InterfaceDef>),
    UnionDef(Rc<UnionDef>),
    ImplNamespace(Rc<ImplNamespace>),
    Package(String),
    Proc(TaskRef),
    Future(TaskRef),
    Iterator(IteratorRef),
    IteratorEnd,
    Waker(WakerRef),
    Registration(RegistrationRef),
    Channel(ChannelRef),
    Mutex(MutexRef),
    Awaitable(Rc<NativeAwaitable>),
}

pub type StructRef = Rc<StructInstance>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type MapRef = Rc<RefCell<Vec<(Value, Value)>>>;

impl Value {
    pub fn int(value: i128) -> Self {
        Value::Integer {
            value,
            kind: IntegerKind::I32,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(Rc::new(ErrorValue {
            message: message.into(),
            cause: None,
            payload: None,
        }))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false) | Value::Error(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::BoundMethod(_) | Value::Overloads(_)
        )
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Void => "void".into(),
            Value::Bool(_) => "bool".into(),
            Value::Char(_) => "char".into(),
            Value::String(_) => "String".into(),
            Value::Integer { kind, .. } => kind.name().into(),
            Value::Float { kind, .. } => kind.name().into(),
            Value::Struct(instance) => instance.def.name.clone(),
            Value::Array(_) => "Array".into(),
            Value::Map(_) => "Map".into(),
            Value::Error(_) => "Error".into(),
            Value::Function(_) | Value::Native(_) | Value::BoundMethod(_) | Value::Overloads(_) => {
                "fn".into()
            }
            Value::StructDef(def) => def.name.clone(),
            Value::InterfaceDef(def) => def.name.clone(),
            Value::UnionDef(def) => def.name.clone(),
            Value::ImplNamespace(ns) => ns.name.clone(),
            Value::Package(name) => format!("package {name}"),
            Value::Proc(_) => "Proc".into(),
            Value::Future(_) => "Future".into(),
            Value::Iterator(_) => "Iterator".into(),
            Value::IteratorEnd => "IteratorEnd".into(),
            Value::Waker(_) => "AwaitWaker".into(),
            Value::Registration(_) => "AwaitRegistration".into(),
            Value::Channel(_) => "Channel".into(),
            Value::Mutex(_) => "Mutex".into(),
            Value::Awaitable(_) => "Awaitable".into(),
        }
    }

    /// Runtime type of the value, including resolved generic arguments.
    pub fn runtime_type(&self) -> TypeExpr {
        match self {
            Value::Struct(instance) => {
                TypeExpr::generic(instance.def.name.clone(), instance.type_args.clone())
            }
            Value::Array(_) => TypeExpr::generic("Array", vec![TypeExpr::Wildcard]),
            other => TypeExpr::named(other.type_name()),
        }
    }

    /// Structural equality for data, identity for handles.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Void, Value::Void) => true,
            (Value::IteratorEnd, Value::IteratorEnd) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Integer { value: a, .. }, Value::Integer { value: b, .. }) => a == b,
            (Value::Float { value: a, .. }, Value::Float { value: b, .. }) => a == b,
            (Value::Integer { value: a, .. }, Value::Float { value: b, .. })
            | (Value::Float { value: b, .. }, Value::Integer { value: a, .. }) => (*a as f64) == *b,
            (Value::Struct(a), Value::Struct(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                a.def.name == b.def.name && {
                    let left = a.fields.borrow();
                    let right = b.fields.borrow();
                    left.len() == right.len()
                        && left.iter().zip(right.iter()).all(|(l, r)| l.equals(r))
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let left = a.borrow();
                let right = b.borrow();
                left.len() == right.len() && left.iter().zip(right.iter()).all(|(l, r)| l.equals(r))
            }
            (Value::Error(a), Value::Error(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.message == b.message
                        && match (&a.payload, &b.payload) {
                            (Some(l), Some(r)) => l.equals(r),
                            (None, None) => true,
                            _ => false,
                        })
            }
            (Value::StructDef(a), Value::StructDef(b)) => Rc::ptr_eq(a, b) || a.name == b.name,
            (Value::StructDef(def), Value::Struct(instance))
            | (Value::Struct(instance), Value::StructDef(def)) => {
                def.kind == StructKind::Singleton && instance.def.name == def.name
            }
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) | (Value::Future(a), Value::Future(b)) => {
                Rc::ptr_eq(a, b)
            }
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => Rc::ptr_eq(a, b),
            (Value::Mutex(a), Value::Mutex(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Package(a), Value::Package(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Void => write!(f, "void"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Integer { value, .. } => write!(f, "{value}"),
            Value::Float { value, .. } => write!(f, "{value}"),
            Value::Struct(instance) => write!(f, "{instance}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, value) in items.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in entries.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Error(error) => write!(f, "{}", error.message),
            Value::Function(closure) => write!(f, "<fn {}>", closure.name()),
            Value::Native(native) => write!(f, "<native {}>", native.name),
            Value::BoundMethod(bound) => write!(f, "<method of {}>", bound.receiver.type_name()),
            Value::Overloads(set) => write!(f, "<overloads x{}>", set.len()),
            Value::StructDef(def) => write!(f, "{}", def.name),
            Value::InterfaceDef(def) => write!(f, "<interface {}>", def.name),
            Value::UnionDef(def) => write!(f, "<union {}>", def.name),
            Value::ImplNamespace(ns) => write!(f, "<impl {}>", ns.name),
            Value::Package(name) => write!(f, "<package {name}>"),
            Value::Proc(_) => write!(f, "<proc>"),
            Value::Future(_) => write!(f, "<future>"),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::IteratorEnd => write!(f, "IteratorEnd"),
            Value::Waker(_) => write!(f, "<waker>"),
            Value::Registration(_) => write!(f, "<registration>"),
            Value::Channel(_) => write!(f, "<channel>"),
            Value::Mutex(_) => write!(f, "<mutex>"),
            Value::Awaitable(_) => write!(f, "<awaitable>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(v) => write!(f, "{v:?}"),
            other => write!(f, "{}({})", other.type_name(), other),
        }
    }
}

pub struct StructInstance {
    pub def: Rc<StructDef>,
    pub fields: RefCell<Vec<Value>>,
    pub type_args: Vec<TypeExpr>,
    pub type_arg_map: HashMap<String, TypeExpr>,
}

impl StructInstance {
    pub fn new(def: Rc<StructDef>, fields: Vec<Value>, type_args: Vec<TypeExpr>) -> StructRef {
        let type_arg_map = def
            .generic_names()
            .into_iter()
            .zip(type_args.iter().cloned())
            .collect();
        Rc::new(StructInstance {
            def,
            fields: RefCell::new(fields),
            type_args,
            type_arg_map,
        })
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        let index = self.def.field_index(name)?;
        self.fields.borrow().get(index).cloned()
    }

    pub fn get_index(&self, index: usize) -> Option<Value> {
        self.fields.borrow().get(index).cloned()
    }

    pub fn set_field(&self, name: &str, value: Value) -> bool {
        match self.def.field_index(name) {
            Some(index) => {
                self.fields.borrow_mut()[index] = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for StructInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.borrow();
        match self.def.kind {
            StructKind::Singleton => write!(f, "{}", self.def.name),
            StructKind::Positional => {
                write!(f, "{}(", self.def.name)?;
                for (idx, value) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
            StructKind::Named => {
                write!(f, "{} {{ ", self.def.name)?;
                for (idx, (field, value)) in self.def.fields.iter().zip(fields.iter()).enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name.as_deref().unwrap_or("_"), value)?;
                }
                write!(f, " }}")
            }
        }
    }
}

pub struct ErrorValue {
    pub message: String,
    pub cause: Option<Value>,
    pub payload: Option<Value>,
}

impl ErrorValue {
    pub fn with_payload(message: impl Into<String>, payload: Value) -> Value {
        Value::Error(Rc::new(ErrorValue {
            message: message.into(),
            cause: None,
            payload: Some(payload),
        }))
    }
}

#[derive(Clone)]
pub enum FunctionSource {
    Def(Rc<FunctionDef>),
    Lambda(Rc<LambdaExpr>),
    Placeholder(Rc<PlaceholderLambda>),
}

/// A user function together with the scope it closes over.
pub struct Closure {
    pub source: FunctionSource,
    pub env: Environment,
    /// Concrete `Self` when the function was produced by method lookup.
    pub self_type: Option<TypeExpr>,
    pub type_bindings: HashMap<String, TypeExpr>,
}

impl Closure {
    pub fn new(source: FunctionSource, env: Environment) -> Rc<Self> {
        Rc::new(Closure {
            source,
            env,
            self_type: None,
            type_bindings: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        match &self.source {
            FunctionSource::Def(def) => &def.name,
            FunctionSource::Lambda(_) => "<lambda>",
            FunctionSource::Placeholder(_) => "<placeholder>",
        }
    }

    /// Declared parameters. Placeholder lambdas have none; their arguments
    /// are bound to `@1..@n`.
    pub fn params(&self) -> &[Param] {
        match &self.source {
            FunctionSource::Def(def) => &def.params,
            FunctionSource::Lambda(lambda) => &lambda.params,
            FunctionSource::Placeholder(_) => &[],
        }
    }

    pub fn arity(&self) -> usize {
        match &self.source {
            FunctionSource::Placeholder(lambda) => lambda.arity.get(),
            _ => self.params().len(),
        }
    }

    pub fn def(&self) -> Option<&Rc<FunctionDef>> {
        match &self.source {
            FunctionSource::Def(def) => Some(def),
            FunctionSource::Lambda(_) | FunctionSource::Placeholder(_) => None,
        }
    }
}

pub type NativeFn = dyn Fn(&mut Interpreter, Vec<Value>) -> RuntimeResult<Flow>;

pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub arity: Option<usize>,
    pub func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, arity: Option<usize>, func: F) -> Value
    where
        F: Fn(&mut Interpreter, Vec<Value>) -> RuntimeResult<Flow> + 'static,
    {
        Value::Native(Rc::new(NativeFunction {
            name: name.into(),
            arity,
            func: Box::new(func),
        }))
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub method: Value,
}

impl BoundMethod {
    pub fn bind(receiver: Value, method: Value) -> Value {
        Value::BoundMethod(Rc::new(BoundMethod { receiver, method }))
    }
}

/// Methods of a named impl, callable as `Name.method(receiver, ..)`.
pub struct ImplNamespace {
    pub name: String,
    pub interface: String,
    pub target: TypeExpr,
    pub methods: HashMap<String, Rc<FunctionDef>>,
    pub env: Environment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::build::struct_def;

    #[test]
    fn integers_compare_across_kinds() {
        let small = Value::Integer {
            value: 7,
            kind: IntegerKind::U8,
        };
        assert!(small.equals(&Value::int(7)));
        assert!(!small.equals(&Value::string("7")));
    }

    #[test]
    fn struct_equality_is_structural() {
        let def = Rc::new(struct_def("Point", vec![("x", TypeExpr::named("i32"))]));
        let a = Value::Struct(StructInstance::new(def.clone(), vec![Value::int(1)], vec![]));
        let b = Value::Struct(StructInstance::new(def, vec![Value::int(1)], vec![]));
        assert!(a.equals(&b));
        assert_eq!(a.to_string(), "Point { x: 1 }");
    }

    #[test]
    fn errors_and_nil_are_falsy() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::error("nope").truthy());
        assert!(Value::int(0).truthy());
    }
}
