use crate::runtime::{
    error::{RuntimeError, RuntimeResult},
    value::Value,
};
use std::collections::HashMap;

struct Export {
    value: Value,
    private: bool,
}

/// `(package, symbol) -> value` table that backs imports.
#[derive(Default)]
pub struct PackageRegistry {
    packages: HashMap<String, Vec<(String, Export)>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, package: &str, symbol: &str, value: Value, private: bool) {
        let exports = self.packages.entry(package.to_string()).or_default();
        match exports.iter_mut().find(|(name, _)| name == symbol) {
            Some((_, export)) => {
                export.value = value;
                export.private = private;
            }
            None => exports.push((symbol.to_string(), Export { value, private })),
        }
    }

    pub fn has_package(&self, package: &str) -> bool {
        self.packages.contains_key(package)
    }

    pub fn lookup(&self, package: &str, symbol: &str) -> RuntimeResult<Value> {
        let exports = self
            .packages
            .get(package)
            .ok_or_else(|| RuntimeError::UnknownSymbol {
                name: package.to_string(),
            })?;
        let (_, export) = exports
            .iter()
            .find(|(name, _)| name == symbol)
            .ok_or_else(|| RuntimeError::UnknownSymbol {
                name: format!("{package}.{symbol}"),
            })?;
        if export.private {
            return Err(RuntimeError::unsupported(format!(
                "`{symbol}` is private to package `{package}`"
            )));
        }
        Ok(export.value.clone())
    }

    /// Public symbols in registration order.
    pub fn public_symbols(&self, package: &str) -> Vec<(String, Value)> {
        self.packages
            .get(package)
            .map(|exports| {
                exports
                    .iter()
                    .filter(|(_, export)| !export.private)
                    .map(|(name, export)| (name.clone(), export.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_symbols_are_hidden() {
        let mut registry = PackageRegistry::new();
        registry.register("geo", "origin", Value::int(0), false);
        registry.register("geo", "secret", Value::int(1), true);
        assert!(registry.lookup("geo", "origin").is_ok());
        assert!(registry.lookup("geo", "secret").is_err());
        assert!(registry.lookup("geo", "missing").is_err());
        let public: Vec<String> = registry
            .public_symbols("geo")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(public, vec!["origin".to_string()]);
    }
}
