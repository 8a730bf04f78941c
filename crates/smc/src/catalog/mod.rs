//! Distribution and function catalog.
//!
//! The graph only talks to distributions and functions through the [`Distribution`] and
//! [`Function`] traits. A [`Catalog`] is an explicitly constructed lookup table from names to
//! implementations; [`Catalog::builtin`] registers the standard set.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::utils::dim_len;

pub mod distribution;
pub mod function;

pub use distribution::{Bounds, Distribution};
pub use function::{Affine, Arity, Function, LinearTerm};

/// A borrowed parameter value together with its dimension.
#[derive(Debug, Clone, Copy)]
pub struct ParamRef<'a> {
    pub value: &'a [f64],
    pub dim: &'a [usize],
}

impl<'a> ParamRef<'a> {
    pub fn new(value: &'a [f64], dim: &'a [usize]) -> Self {
        Self { value, dim }
    }

    /// The single value of a scalar parameter.
    pub fn scalar(&self) -> std::result::Result<f64, String> {
        match self.value {
            [v] => Ok(*v),
            _ => Err(format!("expected a scalar, found {} values", self.value.len())),
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        dim_len(self.dim) == 1
    }
}

/// Registry of named distributions and functions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    distributions: IndexMap<String, Arc<dyn Distribution>>,
    functions: IndexMap<String, Arc<dyn Function>>,
}

impl Catalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding every built-in distribution and function.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for dist in distribution::builtin_distributions() {
            catalog.register_distribution(dist);
        }
        for func in function::builtin_functions() {
            catalog.register_function(func);
        }
        catalog
    }

    pub fn register_distribution(&mut self, dist: Arc<dyn Distribution>) {
        self.distributions.insert(dist.name().to_string(), dist);
    }

    pub fn register_function(&mut self, func: Arc<dyn Function>) {
        self.functions.insert(func.name().to_string(), func);
    }

    /// Look up a distribution by name (e.g. `"dnorm"`).
    pub fn distribution(&self, name: &str) -> Result<Arc<dyn Distribution>> {
        self.distributions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDistribution(name.to_string()))
    }

    /// Look up a function by name (e.g. `"+"`, `"%*%"`).
    pub fn function(&self, name: &str) -> Result<Arc<dyn Function>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }

    /// Distribution names in registration order.
    pub fn distribution_names(&self) -> Vec<&str> {
        self.distributions.keys().map(|s| s.as_str()).collect()
    }

    /// Function names in registration order.
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = Catalog::builtin();
        for name in ["dnorm", "dnormvar", "dmnorm", "dmnormvar", "dbeta", "dbin", "dbern", "dcat"] {
            assert_eq!(catalog.distribution(name).unwrap().name(), name);
        }
        for name in ["+", "-", "*", "/", "%*%", "neg", "sum", "exp", "log", "sqrt", "pow"] {
            assert_eq!(catalog.function(name).unwrap().name(), name);
        }
        assert!(matches!(
            catalog.distribution("dwishart"),
            Err(Error::UnknownDistribution(_))
        ));
        assert!(matches!(catalog.function("logit"), Err(Error::UnknownFunction(_))));
    }

    #[test]
    fn test_independent_catalogs() {
        let mut empty = Catalog::new();
        assert!(empty.distribution("dnorm").is_err());
        let builtin = Catalog::builtin();
        empty.register_distribution(builtin.distribution("dnorm").unwrap());
        assert_eq!(empty.distribution_names(), vec!["dnorm"]);
        assert!(builtin.distribution_names().len() > 1);
    }

    #[test]
    fn test_names_keep_registration_order() {
        let builtin = Catalog::builtin();
        let mut catalog = Catalog::new();
        for name in ["dnormvar", "dbeta", "dnorm"] {
            catalog.register_distribution(builtin.distribution(name).unwrap());
        }
        assert_eq!(catalog.distribution_names(), vec!["dnormvar", "dbeta", "dnorm"]);
        // re-registering replaces in place
        catalog.register_distribution(builtin.distribution("dbeta").unwrap());
        assert_eq!(catalog.distribution_names(), vec!["dnormvar", "dbeta", "dnorm"]);
    }

    #[test]
    fn test_param_ref_scalar() {
        let dim = [1];
        let p = ParamRef::new(&[2.5], &dim);
        assert_eq!(p.scalar().unwrap(), 2.5);
        assert!(p.is_scalar());
        let vdim = [2];
        assert!(ParamRef::new(&[1.0, 2.0], &vdim).scalar().is_err());
    }
}
