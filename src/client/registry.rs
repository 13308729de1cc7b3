//! Immutable method registry.
//!
//! Maps a method key to its request template and optional fallback. Built
//! once by `ClientBuilder`; lookups never lock.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::http::{MethodKey, RequestTemplate};
use crate::resilience::Fallback;

/// One declared method: `interface#signature` plus how to build its request.
#[derive(Clone)]
pub struct MethodSpec {
    key: MethodKey,
    template: RequestTemplate,
    fallback: Option<Arc<dyn Any + Send + Sync>>,
    fallback_type: Option<&'static str>,
}

impl MethodSpec {
    pub fn new(key: MethodKey, template: RequestTemplate) -> Self {
        Self {
            key,
            template,
            fallback: None,
            fallback_type: None,
        }
    }

    /// Register a fallback. `T` must match the type the method is called with
    /// (`Vec<I>` for sequences).
    pub fn fallback<T>(mut self, fallback: Fallback<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self.fallback_type = Some(type_name::<T>());
        self
    }

    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// The registered fallback typed as `T`, or `FallbackType` when it was
    /// registered for another type.
    pub(crate) fn fallback_for<T>(&self) -> Result<Option<Fallback<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(fallback) = &self.fallback else {
            return Ok(None);
        };
        fallback
            .downcast_ref::<Fallback<T>>()
            .cloned()
            .map(Some)
            .ok_or_else(|| Error::FallbackType {
                method_key: self.key.to_string(),
            })
    }
}

impl std::fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodSpec")
            .field("key", &self.key)
            .field("method", self.template.method())
            .field("path", &self.template.path())
            .field("fallback", &self.fallback_type)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<MethodKey, MethodSpec>,
}

impl MethodRegistry {
    /// Later registrations of the same key replace earlier ones.
    pub fn new(methods: impl IntoIterator<Item = MethodSpec>) -> Self {
        Self {
            methods: methods
                .into_iter()
                .map(|spec| (spec.key.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, method_key: &str) -> Result<&MethodSpec> {
        self.methods
            .get(method_key)
            .ok_or_else(|| Error::UnknownMethod(method_key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &MethodKey> {
        self.methods.keys()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
