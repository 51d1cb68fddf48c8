use super::{
    errors::raised,
    impl_resolution::{ImplEntry, MethodSet},
    Interpreter,
};
use crate::language::{
    ast::{
        ExternFunction, FunctionDef, GenericParam, ImplDef, Import, ImportKind, InterfaceDef,
        MethodsDef, StructDef, TypeAliasDef, UnionDef, WhereConstraint,
    },
    types::{IntegerKind, TypeExpr},
};
use crate::runtime::{
    environment::Environment,
    error::{RuntimeError, RuntimeResult},
    outcome::Flow,
    value::{Closure, FunctionSource, ImplNamespace, NativeFunction, Value},
};
use std::collections::HashMap;
use std::rc::Rc;

impl Interpreter {
    pub(super) fn define_function(&mut self, def: &Rc<FunctionDef>, env: &Environment) -> RuntimeResult<Flow> {
        let closure = Closure::new(FunctionSource::Def(def.clone()), env.clone());
        env.declare(&def.name, Value::Function(closure))?;
        Ok(Flow::nil())
    }

    pub(super) fn define_struct(&mut self, def: &Rc<StructDef>, env: &Environment) -> RuntimeResult<Flow> {
        env.declare(&def.name, Value::StructDef(def.clone()))?;
        self.structs.insert(def.name.clone(), def.clone());
        Ok(Flow::nil())
    }

    pub(super) fn define_union(&mut self, def: &Rc<UnionDef>, env: &Environment) -> RuntimeResult<Flow> {
        env.declare(&def.name, Value::UnionDef(def.clone()))?;
        self.unions.insert(def.name.clone(), def.clone());
        Ok(Flow::nil())
    }

    /// Aliases live in one runtime-wide table and are expanded wherever a
    /// type annotation is checked.
    pub(super) fn define_type_alias(&mut self, def: &Rc<TypeAliasDef>) -> RuntimeResult<Flow> {
        if self.structs.contains_key(&def.name) || self.unions.contains_key(&def.name) {
            return Err(RuntimeError::type_mismatch(format!(
                "type alias `{}` shadows an existing type",
                def.name
            )));
        }
        self.aliases.insert(def.name.clone(), def.clone());
        Ok(Flow::nil())
    }

    pub(super) fn define_interface(&mut self, def: &Rc<InterfaceDef>, env: &Environment) -> RuntimeResult<Flow> {
        env.declare(&def.name, Value::InterfaceDef(def.clone()))?;
        self.interfaces.insert(def.name.clone(), def.clone());
        Ok(Flow::nil())
    }

    pub(super) fn define_methods(&mut self, def: &Rc<MethodsDef>, env: &Environment) -> RuntimeResult<Flow> {
        let base = match def.target.base_name() {
            Some(base) => base.to_string(),
            None => {
                return Err(RuntimeError::unsupported(format!(
                    "methods block for non-nominal type `{}`",
                    def.target
                )))
            }
        };
        let methods = def
            .methods
            .iter()
            .map(|method| (method.name.clone(), method.clone()))
            .collect();
        self.inherent.entry(base.clone()).or_default().push(MethodSet {
            target: def.target.clone(),
            generics: target_generics(&def.generics, &def.target),
            methods,
            env: env.clone(),
        });
        tracing::debug!(ty = %def.target, "registered inherent methods");
        Ok(Flow::nil())
    }

    pub(super) fn define_impl(&mut self, def: &Rc<ImplDef>, env: &Environment) -> RuntimeResult<Flow> {
        let interface = self
            .interfaces
            .get(&def.interface)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownSymbol {
                name: def.interface.clone(),
            })?;
        let mut methods: HashMap<String, Rc<FunctionDef>> = def
            .methods
            .iter()
            .map(|method| (method.name.clone(), method.clone()))
            .collect();
        for signature in &interface.signatures {
            if methods.contains_key(&signature.name) {
                continue;
            }
            let body = signature.default_body.clone().ok_or_else(|| {
                RuntimeError::unsupported(format!(
                    "impl {} for {} is missing method `{}`",
                    def.interface, def.target, signature.name
                ))
            })?;
            methods.insert(
                signature.name.clone(),
                Rc::new(FunctionDef {
                    name: signature.name.clone(),
                    generics: signature.generics.clone(),
                    params: signature.params.clone(),
                    return_type: signature.return_type.clone(),
                    where_clause: Vec::new(),
                    body,
                    is_private: false,
                }),
            );
        }

        if let Some(name) = &def.impl_name {
            let namespace = ImplNamespace {
                name: name.clone(),
                interface: def.interface.clone(),
                target: def.target.clone(),
                methods,
                env: env.clone(),
            };
            env.declare(name, Value::ImplNamespace(Rc::new(namespace)))?;
            return Ok(Flow::nil());
        }

        let generics = target_generics(&def.generics, &def.target);
        let constraints = impl_constraints(&def.generics, &def.where_clause);
        let signature = impl_signature(def, &generics, &constraints);
        if self.impls.iter().any(|entry| entry.signature == signature) {
            let target = def.target.base_name().unwrap_or_default().to_string();
            if self.config.allows_duplicate(&def.interface, &target) {
                tracing::debug!(%signature, "duplicate impl allowed; keeping the first");
                return Ok(Flow::nil());
            }
            return Err(RuntimeError::DuplicateImpl {
                interface: def.interface.clone(),
                target: def.target.canonical_name(),
            });
        }
        tracing::debug!(%signature, "registered impl");
        self.impls.push(ImplEntry {
            interface: def.interface.clone(),
            interface_args: def.interface_args.clone(),
            target: def.target.clone(),
            generics,
            constraints,
            methods,
            env: env.clone(),
            signature,
        });
        Ok(Flow::nil())
    }

    /// Binds an `extern fn` to the host native of the same name.
    pub(super) fn define_extern(&mut self, def: &Rc<ExternFunction>, env: &Environment) -> RuntimeResult<Flow> {
        let native = match def.name.as_str() {
            "now_monotonic_ms" => NativeFunction::new("now_monotonic_ms", Some(0), |interp, _| {
                Ok(Flow::Completed(Value::Integer {
                    value: interp.platform.now_monotonic_ms(),
                    kind: IntegerKind::I64,
                }))
            }),
            "read_text" => NativeFunction::new("read_text", Some(1), |interp, args| {
                let path = match args.first() {
                    Some(Value::String(path)) => path.clone(),
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "read_text expects a String path, found `{}`",
                            other.map_or_else(|| "nothing".to_string(), Value::type_name)
                        )))
                    }
                };
                match interp.platform.read_text(&path) {
                    Ok(text) => Ok(Flow::Completed(Value::String(text))),
                    Err(message) => Err(raised(message)),
                }
            }),
            other => {
                let name = other.to_string();
                NativeFunction::new(other, Some(def.params.len()), move |_, _| {
                    Err(RuntimeError::HostNotImplemented { name: name.clone() })
                })
            }
        };
        env.declare(&def.name, native)?;
        Ok(Flow::nil())
    }

    pub(super) fn eval_import(&mut self, import: &Import, env: &Environment) -> RuntimeResult<Flow> {
        if !self.registry.has_package(&import.package) {
            return Err(RuntimeError::UnknownSymbol {
                name: import.package.clone(),
            });
        }
        match &import.kind {
            ImportKind::Package { alias } => {
                let name = alias.clone().unwrap_or_else(|| {
                    import
                        .package
                        .rsplit('.')
                        .next()
                        .unwrap_or(&import.package)
                        .to_string()
                });
                env.define(&name, Value::Package(import.package.clone()));
            }
            ImportKind::Selectors(selectors) => {
                for selector in selectors {
                    let value = self.registry.lookup(&import.package, &selector.name)?;
                    env.define(selector.alias.as_deref().unwrap_or(&selector.name), value);
                }
            }
            ImportKind::Wildcard => {
                for (name, value) in self.registry.public_symbols(&import.package) {
                    env.define(&name, value);
                }
            }
        }
        Ok(Flow::nil())
    }
}

/// Declared generics plus bare single-letter capitals used in the target
/// (`methods Box T { }`).
fn target_generics(declared: &[GenericParam], target: &TypeExpr) -> Vec<String> {
    let mut names: Vec<String> = declared.iter().map(|param| param.name.clone()).collect();
    collect_implicit(target, &mut names);
    names
}

fn collect_implicit(ty: &TypeExpr, names: &mut Vec<String>) {
    match ty {
        TypeExpr::Named(name, args) => {
            let implicit = args.is_empty()
                && name.len() == 1
                && name.chars().all(|c| c.is_ascii_uppercase());
            if implicit && !names.contains(name) {
                names.push(name.clone());
            }
            for arg in args {
                collect_implicit(arg, names);
            }
        }
        TypeExpr::Nullable(inner) | TypeExpr::Result(inner) => collect_implicit(inner, names),
        TypeExpr::Union(members) => members.iter().for_each(|member| collect_implicit(member, names)),
        TypeExpr::Function { params, ret } => {
            params.iter().for_each(|param| collect_implicit(param, names));
            collect_implicit(ret, names);
        }
        TypeExpr::Wildcard | TypeExpr::SelfType => {}
    }
}

fn impl_constraints(generics: &[GenericParam], where_clause: &[WhereConstraint]) -> Vec<(String, String)> {
    let mut constraints = Vec::new();
    let bounds = generics
        .iter()
        .map(|param| (&param.name, &param.constraints))
        .chain(where_clause.iter().map(|clause| (&clause.type_param, &clause.constraints)));
    for (param, interfaces) in bounds {
        for interface in interfaces {
            if let Some(name) = interface.base_name() {
                constraints.push((param.clone(), name.to_string()));
            }
        }
    }
    constraints
}

/// Identity of an unnamed impl with generic parameters renamed by position,
/// so `impl Show for Box T` and `impl Show for Box U` collide.
fn impl_signature(def: &ImplDef, generics: &[String], constraints: &[(String, String)]) -> String {
    let renames: HashMap<String, TypeExpr> = generics
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.clone(), TypeExpr::named(format!("${idx}"))))
        .collect();
    let args: Vec<String> = def
        .interface_args
        .iter()
        .map(|arg| arg.substitute(&renames).canonical_name())
        .collect();
    let target = def.target.substitute(&renames).canonical_name();
    let mut bounds: Vec<String> = constraints
        .iter()
        .map(|(param, interface)| {
            let param = renames
                .get(param)
                .map(TypeExpr::canonical_name)
                .unwrap_or_else(|| param.clone());
            format!("{param}: {interface}")
        })
        .collect();
    bounds.sort();
    let bounds = if bounds.is_empty() {
        "<none>".to_string()
    } else {
        bounds.join(", ")
    };
    format!("{}<{}>|{}|{}", def.interface, args.join(", "), target, bounds)
}
