//! Lazy key→value parameter store with environment overrides.
//!
//! Steps declare the parameters they provide as lazy suppliers; consumers
//! resolve them by name. A value injected through the environment always
//! wins over a supplier, which lets the planner prune or shim a step without
//! the step knowing whether its output will be computed or injected.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::{ApiError, ApiResult};

/// A lazy producer for a single parameter value.
pub type ParameterSupplier = Arc<dyn Fn() -> ApiResult<String> + Send + Sync>;

/// The parameters a step provides, keyed by name.
pub type ParameterMap = HashMap<String, ParameterSupplier>;

/// Convenience constructor for a supplier returning a fixed value.
pub fn static_supplier(value: impl Into<String>) -> ParameterSupplier {
    let value = value.into();
    Arc::new(move || Ok(value.clone()))
}

#[derive(Default)]
struct ParameterState {
    suppliers: HashMap<String, ParameterSupplier>,
    values: BTreeMap<String, String>,
}

/// Thread-safe deferred parameter store.
///
/// Resolution is idempotent within a run: the first successful resolution of
/// a name is cached, and a name materialized from an environment input is
/// never overridden. Resolution of a given name is serialized, so suppliers
/// run at most once.
pub struct DeferredParameters {
    parent: Option<Arc<DeferredParameters>>,
    inputs: Arc<BTreeMap<String, String>>,
    state: Mutex<ParameterState>,
}

impl DeferredParameters {
    /// Create a store over the given environment inputs.
    pub fn new(inputs: BTreeMap<String, String>) -> Self {
        Self {
            parent: None,
            inputs: Arc::new(inputs),
            state: Mutex::new(ParameterState::default()),
        }
    }

    /// Create a store backed by the process environment.
    pub fn from_env() -> Self {
        Self::new(std::env::vars().collect())
    }

    /// Create a child layer over `parent`. Registrations and cached values
    /// in the child do not leak into the parent; lookups fall through.
    pub fn chained(parent: Arc<DeferredParameters>) -> Self {
        Self {
            inputs: Arc::clone(&parent.inputs),
            parent: Some(parent),
            state: Mutex::new(ParameterState::default()),
        }
    }

    /// Register a lazy supplier for `name`. The registration is ignored once
    /// a value for `name` has been materialized.
    pub fn add(&self, name: impl Into<String>, supplier: ParameterSupplier) {
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        if state.values.contains_key(&name) {
            return;
        }
        state.suppliers.insert(name, supplier);
    }

    /// Whether an environment input exists for `name`.
    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    /// Whether `name` can be resolved at all: input, cached value, or
    /// registered supplier, here or in a parent layer.
    pub fn has(&self, name: &str) -> bool {
        if self.has_input(name) {
            return true;
        }
        {
            let state = self.state.lock().unwrap();
            if state.values.contains_key(name) || state.suppliers.contains_key(name) {
                return true;
            }
        }
        self.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// Force a literal value for `name`, bypassing any supplier.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.values.insert(name.into(), value.into());
    }

    /// Apply a batch of values atomically under a single lock acquisition.
    pub fn set_all(&self, values: &BTreeMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        for (name, value) in values {
            state.values.insert(name.clone(), value.clone());
        }
    }

    /// Resolve `name`: environment input first, then the cached value, then
    /// the registered supplier. The first successful resolution is cached.
    pub fn get(&self, name: &str) -> ApiResult<String> {
        if let Some(value) = self.inputs.get(name) {
            return Ok(value.clone());
        }

        let mut state = self.state.lock().unwrap();
        if let Some(value) = state.values.get(name) {
            return Ok(value.clone());
        }
        if let Some(supplier) = state.suppliers.get(name).cloned() {
            let value = supplier().map_err(|err| ApiError::ParameterFailed {
                name: name.to_string(),
                message: err.to_string(),
            })?;
            state.values.insert(name.to_string(), value.clone());
            return Ok(value);
        }
        drop(state);

        if let Some(parent) = &self.parent {
            return parent.get(name);
        }
        Err(ApiError::ParameterUnavailable {
            name: name.to_string(),
        })
    }

    /// Resolve every registered parameter, including parent layers, and
    /// return the full map. Used when flushing the store to a file.
    pub fn resolve_all(&self) -> ApiResult<BTreeMap<String, String>> {
        let mut resolved = match &self.parent {
            Some(parent) => parent.resolve_all()?,
            None => BTreeMap::new(),
        };
        let names: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .suppliers
                .keys()
                .chain(state.values.keys())
                .cloned()
                .collect()
        };
        for name in names {
            resolved.insert(name.clone(), self.get(&name)?);
        }
        for (name, value) in self.inputs.iter() {
            if resolved.contains_key(name) {
                resolved.insert(name.clone(), value.clone());
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn get_prefers_environment_inputs() {
        let params = DeferredParameters::new(BTreeMap::from([(
            "NAMESPACE".to_string(),
            "ci-op-1234".to_string(),
        )]));
        params.add("NAMESPACE", static_supplier("computed"));
        assert_eq!(params.get("NAMESPACE").unwrap(), "ci-op-1234");
        assert!(params.has_input("NAMESPACE"));
    }

    #[test]
    fn suppliers_run_at_most_once() {
        let params = DeferredParameters::new(BTreeMap::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        params.add(
            "IMAGE",
            Arc::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok("registry/img:latest".to_string())
            }),
        );

        assert_eq!(params.get("IMAGE").unwrap(), "registry/img:latest");
        assert_eq!(params.get("IMAGE").unwrap(), "registry/img:latest");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_is_ignored_after_materialization() {
        let params = DeferredParameters::new(BTreeMap::new());
        params.set("KEY", "forced");
        params.add("KEY", static_supplier("from-supplier"));
        assert_eq!(params.get("KEY").unwrap(), "forced");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let params = DeferredParameters::new(BTreeMap::new());
        assert!(matches!(
            params.get("NOPE"),
            Err(ApiError::ParameterUnavailable { .. })
        ));
    }

    #[test]
    fn chained_layer_falls_through_to_parent() {
        let parent = Arc::new(DeferredParameters::new(BTreeMap::new()));
        parent.add("SHARED", static_supplier("parent-value"));
        let child = DeferredParameters::chained(Arc::clone(&parent));
        child.add("LOCAL", static_supplier("child-value"));

        assert_eq!(child.get("SHARED").unwrap(), "parent-value");
        assert_eq!(child.get("LOCAL").unwrap(), "child-value");
        // The child registration never reaches the parent.
        assert!(parent.get("LOCAL").is_err());
    }

    #[test]
    fn resolve_all_covers_both_layers() {
        let parent = Arc::new(DeferredParameters::new(BTreeMap::new()));
        parent.add("A", static_supplier("1"));
        let child = DeferredParameters::chained(Arc::clone(&parent));
        child.add("B", static_supplier("2"));

        let all = child.resolve_all().unwrap();
        assert_eq!(all.get("A").map(String::as_str), Some("1"));
        assert_eq!(all.get("B").map(String::as_str), Some("2"));
    }
}
