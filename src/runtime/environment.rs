use crate::language::types::TypeExpr;
use crate::runtime::{
    error::{RuntimeError, RuntimeResult},
    value::Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

struct Scope {
    parent: Option<Environment>,
    bindings: RefCell<HashMap<String, Value>>,
    types: RefCell<HashMap<String, TypeExpr>>,
}

/// Handle to a lexical scope. Cloning shares the scope.
#[derive(Clone)]
pub struct Environment {
    scope: Rc<Scope>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scope: Rc::new(Scope {
                parent: None,
                bindings: RefCell::new(HashMap::new()),
                types: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            scope: Rc::new(Scope {
                parent: Some(self.clone()),
                bindings: RefCell::new(HashMap::new()),
                types: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn same_scope(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }

    /// Declares `name` in this scope. A second function with the same name
    /// merges into an overload set; anything else is a redeclaration.
    pub fn declare(&self, name: &str, value: Value) -> RuntimeResult<()> {
        let mut bindings = self.scope.bindings.borrow_mut();
        match bindings.get(name) {
            None => {
                bindings.insert(name.to_string(), value);
                Ok(())
            }
            Some(existing) => match merge_overloads(existing, &value) {
                Some(merged) => {
                    bindings.insert(name.to_string(), merged);
                    Ok(())
                }
                None => Err(RuntimeError::Redeclaration {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// Binds `name` in this scope, replacing any previous local binding.
    pub fn define(&self, name: &str, value: Value) {
        self.scope
            .bindings
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    pub fn assign(&self, name: &str, value: Value) -> RuntimeResult<()> {
        let mut current = Some(self);
        while let Some(env) = current {
            let mut bindings = env.scope.bindings.borrow_mut();
            if let Some(slot) = bindings.get_mut(name) {
                *slot = value;
                return Ok(());
            }
            drop(bindings);
            current = env.scope.parent.as_ref();
        }
        Err(RuntimeError::UnknownSymbol {
            name: name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(env) = current {
            if let Some(value) = env.scope.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            current = env.scope.parent.as_ref();
        }
        None
    }

    pub fn lookup(&self, name: &str) -> RuntimeResult<Value> {
        self.get(name).ok_or_else(|| RuntimeError::UnknownSymbol {
            name: name.to_string(),
        })
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.scope.bindings.borrow().contains_key(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn bind_type(&self, name: &str, ty: TypeExpr) {
        self.scope.types.borrow_mut().insert(name.to_string(), ty);
    }

    /// Resolves a generic parameter bound in this or an enclosing scope.
    pub fn resolve_type(&self, name: &str) -> Option<TypeExpr> {
        let mut current = Some(self);
        while let Some(env) = current {
            if let Some(ty) = env.scope.types.borrow().get(name) {
                return Some(ty.clone());
            }
            current = env.scope.parent.as_ref();
        }
        None
    }

    pub fn type_bindings(&self) -> HashMap<String, TypeExpr> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(env) = current {
            chain.push(env);
            current = env.scope.parent.as_ref();
        }
        let mut merged = HashMap::new();
        for env in chain.into_iter().rev() {
            for (name, ty) in env.scope.types.borrow().iter() {
                merged.insert(name.clone(), ty.clone());
            }
        }
        merged
    }
}

fn merge_overloads(existing: &Value, incoming: &Value) -> Option<Value> {
    let is_function = |value: &Value| matches!(value, Value::Function(_));
    match existing {
        Value::Function(_) if is_function(incoming) => {
            Some(Value::Overloads(Rc::new(vec![existing.clone(), incoming.clone()])))
        }
        Value::Overloads(set) if is_function(incoming) => {
            let mut members = set.as_ref().clone();
            members.push(incoming.clone());
            Some(Value::Overloads(Rc::new(members)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_rejects_redeclaration_in_same_scope() {
        let env = Environment::new();
        env.declare("x", Value::int(1)).unwrap();
        assert!(matches!(
            env.declare("x", Value::int(2)),
            Err(RuntimeError::Redeclaration { .. })
        ));
        let inner = env.child();
        inner.declare("x", Value::int(3)).unwrap();
        assert!(inner.get("x").unwrap().equals(&Value::int(3)));
        assert!(env.get("x").unwrap().equals(&Value::int(1)));
    }

    #[test]
    fn assign_requires_existing_binding() {
        let env = Environment::new();
        let inner = env.child();
        assert!(inner.assign("missing", Value::Nil).is_err());
        env.declare("count", Value::int(0)).unwrap();
        inner.assign("count", Value::int(5)).unwrap();
        assert!(env.get("count").unwrap().equals(&Value::int(5)));
    }

    #[test]
    fn type_bindings_shadow_outer_scopes() {
        let env = Environment::new();
        env.bind_type("T", TypeExpr::named("i32"));
        let inner = env.child();
        inner.bind_type("T", TypeExpr::named("String"));
        assert_eq!(inner.resolve_type("T"), Some(TypeExpr::named("String")));
        assert_eq!(env.resolve_type("T"), Some(TypeExpr::named("i32")));
    }
}
