//! Start-up registry of invocable target types.

use crate::queue::ports::{ModelHandle, ModelResolver, ResolveError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

struct RegisteredModel {
    handle: Arc<dyn ModelHandle>,
    methods: BTreeSet<String>,
}

/// Resolver built once from explicit registrations.
///
/// Only methods named at registration can be queued or executed.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, RegisteredModel>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ModelRegistry").field("models", &names).finish()
    }
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `model`, allowing `methods`.
    ///
    /// Registering the same name twice replaces the earlier entry.
    #[must_use]
    pub fn register<I, M>(
        mut self,
        model: impl Into<String>,
        handle: Arc<dyn ModelHandle>,
        methods: I,
    ) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        let methods = methods.into_iter().map(Into::into).collect();
        self.models.insert(model.into(), RegisteredModel { handle, methods });
        self
    }

    /// Returns whether `model` is registered.
    #[must_use]
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }
}

impl ModelResolver for ModelRegistry {
    fn resolve(&self, model: &str, method: &str) -> Result<Arc<dyn ModelHandle>, ResolveError> {
        let registered = self
            .models
            .get(model)
            .ok_or_else(|| ResolveError::UnknownModel(model.to_owned()))?;
        if !registered.methods.contains(method) {
            return Err(ResolveError::MethodNotAllowed {
                model: model.to_owned(),
                method: method.to_owned(),
            });
        }
        Ok(Arc::clone(&registered.handle))
    }
}
