use super::Interpreter;
use crate::language::{ast::FunctionDef, types::TypeExpr};
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    value::{BoundMethod, Closure, FunctionSource, Value},
};
use std::collections::HashMap;
use std::rc::Rc;

const MAX_INTERFACE_DEPTH: usize = 16;

/// Methods from one `methods T { }` block.
pub(super) struct MethodSet {
    pub target: TypeExpr,
    pub generics: Vec<String>,
    pub methods: HashMap<String, Rc<FunctionDef>>,
    pub env: Environment,
}

/// One unnamed `impl Iface for T` registration.
pub(super) struct ImplEntry {
    pub interface: String,
    pub interface_args: Vec<TypeExpr>,
    pub target: TypeExpr,
    pub generics: Vec<String>,
    /// `(type parameter, interface)` pairs from generic bounds and `where`.
    pub constraints: Vec<(String, String)>,
    pub methods: HashMap<String, Rc<FunctionDef>>,
    pub env: Environment,
    pub signature: String,
}

/// Binds the `generics` mentioned in `pattern` so that it describes `actual`.
/// Wildcards on either side match anything.
pub(super) fn unify_types(
    pattern: &TypeExpr,
    actual: &TypeExpr,
    generics: &[String],
    bindings: &mut HashMap<String, TypeExpr>,
) -> bool {
    match (pattern, actual) {
        (TypeExpr::Wildcard, _) | (_, TypeExpr::Wildcard) | (TypeExpr::SelfType, _) => true,
        (TypeExpr::Named(name, args), _) if args.is_empty() && generics.contains(name) => {
            match bindings.get(name) {
                Some(bound) if !bound.is_wildcard() => types_compatible(bound, actual),
                _ => {
                    bindings.insert(name.clone(), actual.clone());
                    true
                }
            }
        }
        (TypeExpr::Named(name, args), TypeExpr::Named(actual_name, actual_args)) => {
            if name != actual_name {
                return false;
            }
            if args.is_empty() || actual_args.is_empty() {
                return true;
            }
            args.len() == actual_args.len()
                && args
                    .iter()
                    .zip(actual_args.iter())
                    .all(|(want, have)| unify_types(want, have, generics, bindings))
        }
        (TypeExpr::Nullable(inner), TypeExpr::Nullable(actual_inner))
        | (TypeExpr::Result(inner), TypeExpr::Result(actual_inner)) => {
            unify_types(inner, actual_inner, generics, bindings)
        }
        (TypeExpr::Nullable(inner), _) => unify_types(inner, actual, generics, bindings),
        (TypeExpr::Union(members), _) => members
            .iter()
            .any(|member| unify_types(member, actual, generics, bindings)),
        (TypeExpr::Function { .. }, TypeExpr::Function { .. }) => true,
        _ => false,
    }
}

fn types_compatible(left: &TypeExpr, right: &TypeExpr) -> bool {
    match (left, right) {
        (TypeExpr::Wildcard, _) | (_, TypeExpr::Wildcard) => true,
        (TypeExpr::Named(a, a_args), TypeExpr::Named(b, b_args)) => {
            a == b
                && (a_args.is_empty()
                    || b_args.is_empty()
                    || a_args
                        .iter()
                        .zip(b_args.iter())
                        .all(|(x, y)| types_compatible(x, y)))
        }
        _ => left == right,
    }
}

/// Turns a method definition into a callable that knows its `Self`.
pub(super) fn method_closure(
    def: &Rc<FunctionDef>,
    env: &Environment,
    self_type: &TypeExpr,
    type_bindings: HashMap<String, TypeExpr>,
) -> Value {
    Value::Function(Rc::new(Closure {
        source: FunctionSource::Def(def.clone()),
        env: env.clone(),
        self_type: Some(self_type.clone()),
        type_bindings,
    }))
}

impl Interpreter {
    /// Resolves `name` on `receiver`: inherent methods, concrete impls,
    /// generic impls, built-ins, then UFCS free functions visible from `env`.
    pub(super) fn find_method(
        &mut self,
        receiver: &Value,
        name: &str,
        env: &Environment,
    ) -> RuntimeResult<Option<Value>> {
        let actual = receiver.runtime_type();
        let method = self
            .inherent_method(&actual, name, true)
            .or_else(|| self.impl_method(&actual, name, true, None));
        if let Some(method) = method {
            return Ok(Some(BoundMethod::bind(receiver.clone(), method)));
        }
        if let Some(native) = self.builtin_method(receiver, name) {
            return Ok(Some(native));
        }
        self.ufcs_method(receiver, name, env)
    }

    /// Methods without a receiver, called on the type (`Point.origin()`).
    pub(super) fn static_method(&self, type_name: &str, name: &str) -> Option<Value> {
        let target = TypeExpr::named(type_name);
        self.inherent_method(&target, name, false)
            .or_else(|| self.impl_method(&target, name, false, None))
    }

    /// Operator hook: `name` from an impl of `interface` for the receiver,
    /// bound to it. Inherent methods of the same name do not count.
    pub(super) fn interface_method(&self, receiver: &Value, interface: &str, name: &str) -> Option<Value> {
        let method = self.impl_method(&receiver.runtime_type(), name, true, Some(interface))?;
        Some(BoundMethod::bind(receiver.clone(), method))
    }

    pub(super) fn has_method(&mut self, value: &Value, name: &str) -> bool {
        let globals = self.globals.clone();
        matches!(self.find_method(value, name, &globals), Ok(Some(_)))
    }

    /// Calls `value.name(args..)` synchronously.
    pub(super) fn call_method(&mut self, value: &Value, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let globals = self.globals.clone();
        match self.find_method(value, name, &globals)? {
            Some(method) => self.call_value(&method, args),
            None => Err(RuntimeError::UnknownSymbol {
                name: format!("{}.{name}", value.type_name()),
            }),
        }
    }

    fn inherent_method(&self, actual: &TypeExpr, name: &str, instance: bool) -> Option<Value> {
        let sets = self.inherent.get(actual.base_name()?)?;
        for set in sets {
            let def = match set.methods.get(name) {
                Some(def) if def.takes_self() == instance => def,
                _ => continue,
            };
            let mut bindings = HashMap::new();
            if unify_types(&set.target, actual, &set.generics, &mut bindings) {
                return Some(method_closure(def, &set.env, actual, bindings));
            }
        }
        None
    }

    /// Concrete impls win over generic ones. `interface` restricts the search
    /// to impls of that interface.
    fn impl_method(&self, actual: &TypeExpr, name: &str, instance: bool, interface: Option<&str>) -> Option<Value> {
        for generic_pass in [false, true] {
            for entry in &self.impls {
                if entry.generics.is_empty() == generic_pass {
                    continue;
                }
                if interface.is_some_and(|interface| interface != entry.interface) {
                    continue;
                }
                let def = match entry.methods.get(name) {
                    Some(def) if def.takes_self() == instance => def,
                    _ => continue,
                };
                let mut bindings = HashMap::new();
                if !unify_types(&entry.target, actual, &entry.generics, &mut bindings) {
                    continue;
                }
                if !self.constraints_hold(&entry.constraints, &bindings, 0) {
                    continue;
                }
                return Some(method_closure(def, &entry.env, actual, bindings));
            }
        }
        None
    }

    fn ufcs_method(&mut self, receiver: &Value, name: &str, env: &Environment) -> RuntimeResult<Option<Value>> {
        let candidates = match env.get(name) {
            Some(Value::Function(closure)) => vec![closure],
            Some(Value::Overloads(set)) => set
                .iter()
                .filter_map(|member| match member {
                    Value::Function(closure) => Some(closure.clone()),
                    _ => None,
                })
                .collect(),
            _ => return Ok(None),
        };
        for closure in candidates {
            let first = match closure.params().first().and_then(|param| param.ty.clone()) {
                Some(ty) => ty,
                None => continue,
            };
            if self.value_matches_type(receiver, &first, &closure.env) {
                return Ok(Some(BoundMethod::bind(receiver.clone(), Value::Function(closure))));
            }
        }
        Ok(None)
    }

    /// Verifies bounds for the resolved type arguments of a call or impl.
    pub(super) fn check_constraints(
        &self,
        constraints: &[(String, String)],
        bindings: &HashMap<String, TypeExpr>,
    ) -> RuntimeResult<()> {
        for (param, interface) in constraints {
            if let Some(ty) = bindings.get(param) {
                if !ty.is_wildcard() && !self.type_implements(ty, interface) {
                    return Err(RuntimeError::ConstraintViolation {
                        type_name: ty.canonical_name(),
                        interface: interface.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn constraints_hold(
        &self,
        constraints: &[(String, String)],
        bindings: &HashMap<String, TypeExpr>,
        depth: usize,
    ) -> bool {
        constraints.iter().all(|(param, interface)| match bindings.get(param) {
            Some(ty) if !ty.is_wildcard() => self.implements_at(ty, interface, depth + 1),
            _ => true,
        })
    }

    pub(super) fn type_implements(&self, ty: &TypeExpr, interface: &str) -> bool {
        self.implements_at(ty, interface, 0)
    }

    fn implements_at(&self, ty: &TypeExpr, interface: &str, depth: usize) -> bool {
        if depth > MAX_INTERFACE_DEPTH {
            return false;
        }
        let via_impl = self.impls.iter().any(|entry| {
            if entry.interface != interface && !self.interface_extends(&entry.interface, interface, 0) {
                return false;
            }
            let mut bindings = HashMap::new();
            unify_types(&entry.target, ty, &entry.generics, &mut bindings)
                && self.constraints_hold(&entry.constraints, &bindings, depth)
        });
        via_impl || self.provides_signatures(ty, interface)
    }

    /// Structural conformance: every required method is reachable as an
    /// inherent method or as a UFCS function taking `ty` first.
    fn provides_signatures(&self, ty: &TypeExpr, interface: &str) -> bool {
        let def = match self.interfaces.get(interface) {
            Some(def) => def.clone(),
            None => return false,
        };
        let required: Vec<_> = def
            .signatures
            .iter()
            .filter(|signature| signature.default_body.is_none())
            .collect();
        if required.is_empty() {
            return false;
        }
        required.iter().all(|signature| {
            if self.inherent_method(ty, &signature.name, true).is_some() {
                return true;
            }
            match self.globals.get(&signature.name) {
                Some(Value::Function(closure)) => closure
                    .params()
                    .first()
                    .and_then(|param| param.ty.as_ref())
                    .map_or(false, |first| unify_types(first, ty, &[], &mut HashMap::new())),
                _ => false,
            }
        })
    }

    /// `interface` lists `base` among its ancestors.
    pub(super) fn interface_extends(&self, interface: &str, base: &str, depth: usize) -> bool {
        if depth > MAX_INTERFACE_DEPTH {
            return false;
        }
        let def = match self.interfaces.get(interface) {
            Some(def) => def,
            None => return false,
        };
        def.base_interfaces.iter().any(|parent| match parent.base_name() {
            Some(name) => name == base || self.interface_extends(name, base, depth + 1),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::build::*;

    #[test]
    fn unify_binds_nested_parameters() {
        let generics = vec!["T".to_string()];
        let mut bindings = HashMap::new();
        assert!(unify_types(
            &ty_generic("Box", vec![ty("T")]),
            &ty_generic("Box", vec![ty("i32")]),
            &generics,
            &mut bindings
        ));
        assert_eq!(bindings.get("T"), Some(&ty("i32")));
        assert!(!unify_types(&ty("Box"), &ty("Crate"), &generics, &mut bindings));
    }

    #[test]
    fn conflicting_bindings_do_not_unify() {
        let generics = vec!["T".to_string()];
        let mut bindings = HashMap::new();
        let pair = ty_generic("Pair", vec![ty("T"), ty("T")]);
        assert!(!unify_types(
            &pair,
            &ty_generic("Pair", vec![ty("i32"), ty("String")]),
            &generics,
            &mut bindings
        ));
    }
}
