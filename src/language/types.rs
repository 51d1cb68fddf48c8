use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum TypeExpr {
    Named(String, Vec<TypeExpr>),
    Nullable(Box<TypeExpr>),
    Result(Box<TypeExpr>),
    Union(Vec<TypeExpr>),
    Function {
        params: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
    },
    Wildcard,
    SelfType,
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into(), Vec::new())
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeExpr>) -> Self {
        TypeExpr::Named(name.into(), args)
    }

    /// Head name of a named type (`Box` for `Box T`), if any.
    pub fn base_name(&self) -> Option<&str> {
        match self {
            TypeExpr::Named(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn type_args(&self) -> &[TypeExpr] {
        match self {
            TypeExpr::Named(_, args) => args,
            _ => &[],
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TypeExpr::Wildcard)
    }

    pub fn substitute(&self, map: &HashMap<String, TypeExpr>) -> TypeExpr {
        match self {
            TypeExpr::Named(name, args) => {
                if args.is_empty() {
                    map.get(name)
                        .cloned()
                        .unwrap_or_else(|| TypeExpr::Named(name.clone(), Vec::new()))
                } else {
                    TypeExpr::Named(
                        name.clone(),
                        args.iter().map(|ty| ty.substitute(map)).collect(),
                    )
                }
            }
            TypeExpr::Nullable(inner) => TypeExpr::Nullable(Box::new(inner.substitute(map))),
            TypeExpr::Result(inner) => TypeExpr::Result(Box::new(inner.substitute(map))),
            TypeExpr::Union(members) => {
                TypeExpr::Union(members.iter().map(|ty| ty.substitute(map)).collect())
            }
            TypeExpr::Function { params, ret } => TypeExpr::Function {
                params: params.iter().map(|ty| ty.substitute(map)).collect(),
                ret: Box::new(ret.substitute(map)),
            },
            TypeExpr::Wildcard => TypeExpr::Wildcard,
            TypeExpr::SelfType => TypeExpr::SelfType,
        }
    }

    pub fn replace_self(&self, concrete: &TypeExpr) -> TypeExpr {
        match self {
            TypeExpr::SelfType => concrete.clone(),
            TypeExpr::Named(name, args) if name == "Self" && args.is_empty() => concrete.clone(),
            TypeExpr::Named(name, args) => TypeExpr::Named(
                name.clone(),
                args.iter().map(|ty| ty.replace_self(concrete)).collect(),
            ),
            TypeExpr::Nullable(inner) => TypeExpr::Nullable(Box::new(inner.replace_self(concrete))),
            TypeExpr::Result(inner) => TypeExpr::Result(Box::new(inner.replace_self(concrete))),
            TypeExpr::Union(members) => TypeExpr::Union(
                members.iter().map(|ty| ty.replace_self(concrete)).collect(),
            ),
            TypeExpr::Function { params, ret } => TypeExpr::Function {
                params: params.iter().map(|ty| ty.replace_self(concrete)).collect(),
                ret: Box::new(ret.replace_self(concrete)),
            },
            TypeExpr::Wildcard => TypeExpr::Wildcard,
        }
    }

    /// Names referenced anywhere in the expression that appear in `params`.
    pub fn mentions_any(&self, params: &[String]) -> bool {
        match self {
            TypeExpr::Named(name, args) => {
                (args.is_empty() && params.iter().any(|param| param == name))
                    || args.iter().any(|ty| ty.mentions_any(params))
            }
            TypeExpr::Nullable(inner) | TypeExpr::Result(inner) => inner.mentions_any(params),
            TypeExpr::Union(members) => members.iter().any(|ty| ty.mentions_any(params)),
            TypeExpr::Function { params: inputs, ret } => {
                inputs.iter().any(|ty| ty.mentions_any(params)) || ret.mentions_any(params)
            }
            TypeExpr::Wildcard | TypeExpr::SelfType => false,
        }
    }

    pub fn canonical_name(&self) -> String {
        match self {
            TypeExpr::Named(name, args) => {
                if args.is_empty() {
                    name.clone()
                } else {
                    let rendered: Vec<String> = args.iter().map(|ty| ty.canonical_name()).collect();
                    format!("{} {}", name, rendered.join(" "))
                }
            }
            TypeExpr::Nullable(inner) => format!("?{}", inner.canonical_name()),
            TypeExpr::Result(inner) => format!("!{}", inner.canonical_name()),
            TypeExpr::Union(members) => {
                let rendered: Vec<String> = members.iter().map(|ty| ty.canonical_name()).collect();
                rendered.join(" | ")
            }
            TypeExpr::Function { params, ret } => {
                let rendered: Vec<String> = params.iter().map(|ty| ty.canonical_name()).collect();
                format!("({}) -> {}", rendered.join(", "), ret.canonical_name())
            }
            TypeExpr::Wildcard => "_".into(),
            TypeExpr::SelfType => "Self".into(),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntegerKind {
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
}

impl IntegerKind {
    pub fn name(self) -> &'static str {
        match self {
            IntegerKind::I8 => "i8",
            IntegerKind::I16 => "i16",
            IntegerKind::I32 => "i32",
            IntegerKind::I64 => "i64",
            IntegerKind::I128 => "i128",
            IntegerKind::U8 => "u8",
            IntegerKind::U16 => "u16",
            IntegerKind::U32 => "u32",
            IntegerKind::U64 => "u64",
            IntegerKind::U128 => "u128",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "i8" => IntegerKind::I8,
            "i16" => IntegerKind::I16,
            "i32" => IntegerKind::I32,
            "i64" => IntegerKind::I64,
            "i128" => IntegerKind::I128,
            "u8" => IntegerKind::U8,
            "u16" => IntegerKind::U16,
            "u32" => IntegerKind::U32,
            "u64" => IntegerKind::U64,
            "u128" => IntegerKind::U128,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntegerKind::I8 | IntegerKind::I16 | IntegerKind::I32 | IntegerKind::I64 | IntegerKind::I128
        )
    }

    /// Inclusive range representable by this kind. `u128` is clamped to the
    /// `i128` storage used for all integers.
    pub fn bounds(self) -> (i128, i128) {
        match self {
            IntegerKind::I8 => (i8::MIN as i128, i8::MAX as i128),
            IntegerKind::I16 => (i16::MIN as i128, i16::MAX as i128),
            IntegerKind::I32 => (i32::MIN as i128, i32::MAX as i128),
            IntegerKind::I64 => (i64::MIN as i128, i64::MAX as i128),
            IntegerKind::I128 => (i128::MIN, i128::MAX),
            IntegerKind::U8 => (0, u8::MAX as i128),
            IntegerKind::U16 => (0, u16::MAX as i128),
            IntegerKind::U32 => (0, u32::MAX as i128),
            IntegerKind::U64 => (0, u64::MAX as i128),
            IntegerKind::U128 => (0, i128::MAX),
        }
    }

    pub fn bits(self) -> u32 {
        8 << (self.rank() - 1)
    }

    fn rank(self) -> u8 {
        match self {
            IntegerKind::I8 | IntegerKind::U8 => 1,
            IntegerKind::I16 | IntegerKind::U16 => 2,
            IntegerKind::I32 | IntegerKind::U32 => 3,
            IntegerKind::I64 | IntegerKind::U64 => 4,
            IntegerKind::I128 | IntegerKind::U128 => 5,
        }
    }

    /// Result kind of a binary operation between two integer kinds.
    pub fn widen(self, other: IntegerKind) -> IntegerKind {
        if self == other {
            return self;
        }
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

impl FloatKind {
    pub fn name(self) -> &'static str {
        match self {
            FloatKind::F32 => "f32",
            FloatKind::F64 => "f64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_bare_parameters_only() {
        let mut map = HashMap::new();
        map.insert("T".to_string(), TypeExpr::named("i32"));
        let ty = TypeExpr::generic("Array", vec![TypeExpr::named("T")]);
        assert_eq!(ty.substitute(&map).canonical_name(), "Array i32");
        assert_eq!(TypeExpr::named("U").substitute(&map), TypeExpr::named("U"));
    }

    #[test]
    fn widen_prefers_larger_rank() {
        assert_eq!(IntegerKind::I8.widen(IntegerKind::I64), IntegerKind::I64);
        assert_eq!(IntegerKind::U32.widen(IntegerKind::U32), IntegerKind::U32);
    }

    #[test]
    fn mentions_any_sees_nested_arguments() {
        let params = vec!["T".to_string()];
        let ty = TypeExpr::Nullable(Box::new(TypeExpr::generic(
            "Box",
            vec![TypeExpr::named("T")],
        )));
        assert!(ty.mentions_any(&params));
        assert!(!TypeExpr::named("String").mentions_any(&params));
    }
}
