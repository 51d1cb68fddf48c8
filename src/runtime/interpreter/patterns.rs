use super::Interpreter;
use crate::language::{
    ast::{ArrayRest, Expr, Pattern, StructKind},
    types::{IntegerKind, TypeExpr},
};
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    outcome::Flow,
    value::Value,
};
use std::collections::HashMap;
use std::rc::Rc;

const MAX_ALIAS_DEPTH: usize = 32;

impl Interpreter {
    /// Matches without touching `env`; on success returns a child scope
    /// holding the bindings.
    pub(super) fn try_match_pattern(
        &mut self,
        pattern: &Pattern,
        value: &Value,
        env: &Environment,
    ) -> RuntimeResult<Option<Environment>> {
        let mut bindings = Vec::new();
        if !self.match_into(pattern, value, env, &mut bindings)? {
            return Ok(None);
        }
        let scope = env.child();
        for (name, bound) in bindings {
            scope.define(&name, bound);
        }
        Ok(Some(scope))
    }

    /// Destructures `value` into `env`. Declarations only declare names that
    /// are new to the scope; plain assignment needs every name bound already.
    pub(super) fn assign_by_pattern(
        &mut self,
        pattern: &Pattern,
        value: &Value,
        env: &Environment,
        is_declaration: bool,
    ) -> RuntimeResult<()> {
        let mut bindings = Vec::new();
        if !self.match_into(pattern, value, env, &mut bindings)? {
            return Err(RuntimeError::PatternMismatch {
                message: format!("{} does not match the assignment pattern", describe(value)),
            });
        }
        if !is_declaration {
            for (name, bound) in bindings {
                env.assign(&name, bound)?;
            }
            return Ok(());
        }
        if let Some((name, _)) = bindings.first() {
            if bindings.iter().all(|(name, _)| env.has_local(name)) {
                return Err(RuntimeError::Redeclaration { name: name.clone() });
            }
        }
        for (name, bound) in bindings {
            if env.has_local(&name) {
                env.define(&name, bound);
            } else {
                env.declare(&name, bound)?;
            }
        }
        Ok(())
    }

    pub(super) fn eval_guard(&mut self, guard: &Expr, env: &Environment) -> RuntimeResult<bool> {
        match self.eval_expr(guard, env)? {
            Flow::Completed(value) => Ok(value.truthy()),
            other => Err(RuntimeError::unsupported(format!(
                "`{}` inside a match guard",
                other.signal_name()
            ))),
        }
    }

    fn match_into(
        &mut self,
        pattern: &Pattern,
        value: &Value,
        env: &Environment,
        bindings: &mut Vec<(String, Value)>,
    ) -> RuntimeResult<bool> {
        match pattern {
            Pattern::Wildcard => Ok(true),
            Pattern::Identifier(name) => {
                if let Some(Value::StructDef(def)) = env.get(name) {
                    if def.kind == StructKind::Singleton {
                        return Ok(matches!(value, Value::Struct(instance) if instance.def.name == def.name)
                            || matches!(value, Value::StructDef(other) if other.name == def.name));
                    }
                }
                bindings.push((name.clone(), value.clone()));
                Ok(true)
            }
            Pattern::Literal(literal) => Ok(self.literal_value(literal).equals(value)),
            Pattern::Typed { pattern, ty } => {
                if !self.value_matches_type(value, ty, env) {
                    return Ok(false);
                }
                self.match_into(pattern, value, env, bindings)
            }
            Pattern::Array { elements, rest } => {
                let items = match value {
                    Value::Array(items) => items.borrow().clone(),
                    _ => return Ok(false),
                };
                let arity_ok = match rest {
                    ArrayRest::None => items.len() == elements.len(),
                    ArrayRest::Discard | ArrayRest::Bind(_) => items.len() >= elements.len(),
                };
                if !arity_ok {
                    return Ok(false);
                }
                for (element, item) in elements.iter().zip(items.iter()) {
                    if !self.match_into(element, item, env, bindings)? {
                        return Ok(false);
                    }
                }
                if let ArrayRest::Bind(name) = rest {
                    bindings.push((name.clone(), Value::array(items[elements.len()..].to_vec())));
                }
                Ok(true)
            }
            Pattern::Struct {
                type_name,
                positional,
                fields,
            } => {
                let instance = match value {
                    Value::Struct(instance) => instance.clone(),
                    _ => return Ok(false),
                };
                if let Some(expected) = type_name {
                    let expected = match env.get(expected) {
                        Some(Value::StructDef(def)) => def.name.clone(),
                        _ => expected.clone(),
                    };
                    if instance.def.name != expected {
                        return Ok(false);
                    }
                }
                if *positional && fields.len() != instance.def.fields.len() {
                    return Ok(false);
                }
                for (idx, field) in fields.iter().enumerate() {
                    let field_value = match (&field.field, *positional) {
                        (Some(name), false) => instance.get_field(name),
                        _ => instance.get_index(idx),
                    };
                    let field_value = match field_value {
                        Some(field_value) => field_value,
                        None => return Ok(false),
                    };
                    if !self.match_into(&field.pattern, &field_value, env, bindings)? {
                        return Ok(false);
                    }
                    if let Some(binding) = &field.binding {
                        bindings.push((binding.clone(), field_value));
                    }
                }
                Ok(true)
            }
        }
    }

    /// Runtime check of `value` against a type annotation. Generic parameters
    /// resolve through the scope first; names the runtime does not know are
    /// trusted.
    pub(super) fn value_matches_type(&mut self, value: &Value, ty: &TypeExpr, env: &Environment) -> bool {
        let ty = ty.substitute(&env.type_bindings());
        self.matches_type(value, &ty)
    }

    fn matches_type(&mut self, value: &Value, ty: &TypeExpr) -> bool {
        match ty {
            TypeExpr::Wildcard | TypeExpr::SelfType => true,
            TypeExpr::Nullable(inner) => value.is_nil() || self.matches_type(value, inner),
            TypeExpr::Result(inner) => matches!(value, Value::Error(_)) || self.matches_type(value, inner),
            TypeExpr::Union(members) => members.iter().any(|member| self.matches_type(value, member)),
            TypeExpr::Function { .. } => value.is_callable(),
            TypeExpr::Named(name, args) => self.matches_named(value, name, args),
        }
    }

    fn matches_named(&mut self, value: &Value, name: &str, args: &[TypeExpr]) -> bool {
        if self.aliases.contains_key(name) {
            return match self.expand_alias(&TypeExpr::Named(name.to_string(), args.to_vec())) {
                Some(target) => self.matches_type(value, &target),
                None => false,
            };
        }
        if let Some(kind) = IntegerKind::from_name(name) {
            return match value {
                Value::Integer { value, kind: actual } => {
                    let (low, high) = kind.bounds();
                    *actual == kind || (*value >= low && *value <= high)
                }
                _ => false,
            };
        }
        match name {
            "f32" | "f64" => return matches!(value, Value::Float { .. }),
            "bool" => return matches!(value, Value::Bool(_)),
            "char" => return matches!(value, Value::Char(_)),
            "String" => return matches!(value, Value::String(_)),
            "nil" => return value.is_nil(),
            "void" => return matches!(value, Value::Void | Value::Nil),
            "Map" => return matches!(value, Value::Map(_)),
            "Proc" => return matches!(value, Value::Proc(_)),
            "Future" => return matches!(value, Value::Future(_)),
            "Iterator" => return matches!(value, Value::Iterator(_)),
            "Channel" => return matches!(value, Value::Channel(_)),
            "Mutex" => return matches!(value, Value::Mutex(_)),
            "Array" => {
                let items = match value {
                    Value::Array(items) => items.borrow().clone(),
                    _ => return false,
                };
                return match args.first() {
                    Some(element) if !element.is_wildcard() => {
                        items.iter().all(|item| self.matches_type(item, element))
                    }
                    _ => true,
                };
            }
            _ => {}
        }
        if let Some(union) = self.unions.get(name).cloned() {
            let map = union
                .generics
                .iter()
                .map(|param| param.name.clone())
                .zip(args.iter().cloned())
                .collect();
            return union
                .variants
                .iter()
                .any(|variant| self.matches_type(value, &variant.substitute(&map)));
        }
        if self.interfaces.contains_key(name) {
            if name == "Error" && matches!(value, Value::Error(_)) {
                return true;
            }
            let actual = value.runtime_type();
            return self.type_implements(&actual, name);
        }
        if let Some(def) = self.structs.get(name).cloned() {
            return match value {
                Value::Struct(instance) => {
                    Rc::ptr_eq(&instance.def, &def) || instance.def.name == def.name && {
                        args.is_empty()
                            || args.iter().zip(instance.type_args.iter()).all(|(want, have)| {
                                want.is_wildcard() || have.is_wildcard() || want == have
                            })
                    }
                }
                Value::StructDef(other) => def.kind == StructKind::Singleton && other.name == def.name,
                _ => false,
            };
        }
        true
    }
}

impl Interpreter {
    /// Follows aliases at the head of `ty` until a non-alias type remains.
    /// `None` means the aliases form a cycle.
    pub(super) fn expand_alias(&self, ty: &TypeExpr) -> Option<TypeExpr> {
        let mut current = ty.clone();
        for _ in 0..MAX_ALIAS_DEPTH {
            let alias = match current.base_name().and_then(|name| self.aliases.get(name)) {
                Some(alias) => alias.clone(),
                None => return Some(current),
            };
            let map: HashMap<String, TypeExpr> = alias
                .generics
                .iter()
                .map(|param| param.name.clone())
                .zip(current.type_args().iter().cloned())
                .collect();
            current = alias.target.substitute(&map);
        }
        tracing::warn!(alias = %ty, "type alias does not terminate");
        None
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(text) => format!("{text:?}"),
        other => format!("`{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::language::ast::ArrayRest;
    use crate::language::build::*;
    use crate::runtime::{value::Value, Interpreter};

    fn interpreter() -> Interpreter {
        Interpreter::new(RuntimeConfig::default())
    }

    #[test]
    fn singleton_identifiers_compare_instead_of_binding() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![
                struct_stmt(struct_def("Idle", vec![])),
                expr_stmt(match_expr(
                    struct_lit("Idle", vec![]),
                    vec![clause(pid("Idle"), string("idle")), clause(wildcard(), string("other"))],
                )),
            ]))
            .unwrap();
        assert!(value.equals(&Value::string("idle")));
    }

    #[test]
    fn array_rest_binds_the_tail() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![
                expr_stmt(declare(
                    parray(vec![pid("head")], ArrayRest::Bind("tail".into())),
                    array(vec![int(1), int(2), int(3)]),
                )),
                expr_stmt(method_call(ident("tail"), "len", vec![])),
            ]))
            .unwrap();
        assert!(value.equals(&Value::int(2)));
    }

    #[test]
    fn failed_destructuring_is_a_pattern_error() {
        let mut interp = interpreter();
        let err = interp
            .load_module(&module(vec![expr_stmt(declare(
                parray(vec![pid("a"), pid("b")], ArrayRest::None),
                array(vec![int(1)]),
            ))]))
            .unwrap_err();
        assert!(matches!(err, crate::runtime::error::RuntimeError::PatternMismatch { .. }));
    }

    #[test]
    fn typed_patterns_check_integer_ranges() {
        let mut interp = interpreter();
        let value = interp
            .load_module(&module(vec![expr_stmt(match_expr(
                int(300),
                vec![
                    clause(typed(pid("small"), ty("u8")), string("u8")),
                    clause(typed(pid("wide"), ty("i64")), string("i64")),
                ],
            ))]))
            .unwrap();
        assert!(value.equals(&Value::string("i64")));
    }
}
