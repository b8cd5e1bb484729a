// Per-dispatch dependency resolution

use crate::container::{Entry, Instance, Registration};
use crate::logging::{debug, trace};
use crate::{Container, Error, HttpContext, Provider};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Request-lifetime lookup surface.
///
/// Layers exactly one synthesized binding, `HttpContext` to the current
/// request's context, over the frozen process-wide [`Container`]. Scoped
/// instances are cached here; everything a factory creates is owned by the
/// resolver and released in reverse creation order when it is dropped.
pub struct ScopedResolver {
    root: Arc<Container>,
    context: Arc<HttpContext>,
    scoped: Mutex<HashMap<TypeId, Instance>>,
    owned: Mutex<Vec<(&'static str, Instance)>>,
    resolving: Mutex<Vec<TypeId>>,
}

impl ScopedResolver {
    pub fn new(root: Arc<Container>, context: Arc<HttpContext>) -> Self {
        trace!(path = context.path(), "Opening request scope");
        Self {
            root,
            context,
            scoped: Mutex::new(HashMap::new()),
            owned: Mutex::new(Vec::new()),
            resolving: Mutex::new(Vec::new()),
        }
    }

    /// The request context bound into this scope
    pub fn context(&self) -> &Arc<HttpContext> {
        &self.context
    }

    /// Resolve a provider by type
    pub fn resolve<T: Provider>(&self) -> Result<Arc<T>, Error> {
        let type_name = std::any::type_name::<T>();
        let instance = self.try_resolve_any(TypeId::of::<T>())?.ok_or_else(|| {
            Error::ProviderNotFound(format!("Provider not found: {}", type_name))
        })?;

        instance.downcast::<T>().map_err(|_| {
            Error::DependencyInjection(format!("Provider type mismatch: {}", type_name))
        })
    }

    /// Resolve by type identifier; `Ok(None)` when nothing is registered
    pub fn try_resolve_any(&self, type_id: TypeId) -> Result<Option<Instance>, Error> {
        if type_id == TypeId::of::<HttpContext>() {
            return Ok(Some(self.context.clone() as Instance));
        }

        let Some(entry) = self.root.entry(&type_id) else {
            return Ok(None);
        };

        match &entry.registration {
            Registration::Singleton(instance) => Ok(Some(instance.clone())),
            Registration::Scoped(factory) => {
                if let Some(cached) = self.scoped.lock().get(&type_id) {
                    return Ok(Some(cached.clone()));
                }
                let created = self.create(type_id, entry, factory)?;
                let instance = self
                    .scoped
                    .lock()
                    .entry(type_id)
                    .or_insert(created)
                    .clone();
                Ok(Some(instance))
            }
            Registration::Transient(factory) => self.create(type_id, entry, factory).map(Some),
        }
    }

    /// Whether `type_id` can be resolved in this scope
    pub fn can_resolve(&self, type_id: TypeId) -> bool {
        type_id == TypeId::of::<HttpContext>() || self.root.entry(&type_id).is_some()
    }

    fn create(
        &self,
        type_id: TypeId,
        entry: &Entry,
        factory: &crate::InstanceFactory,
    ) -> Result<Instance, Error> {
        {
            let mut resolving = self.resolving.lock();
            if resolving.contains(&type_id) {
                return Err(Error::DependencyInjection(format!(
                    "Circular dependency while resolving {}",
                    entry.type_name
                )));
            }
            resolving.push(type_id);
        }

        // No lock is held while the factory runs; it may resolve further providers.
        let result = factory(self);
        self.resolving.lock().retain(|id| *id != type_id);

        let instance = result?;
        self.owned.lock().push((entry.type_name, instance.clone()));
        trace!(provider = entry.type_name, "Created scope-owned instance");
        Ok(instance)
    }
}

impl Drop for ScopedResolver {
    fn drop(&mut self) {
        self.scoped.get_mut().clear();
        let owned = self.owned.get_mut();
        let released = owned.len();
        while let Some((type_name, instance)) = owned.pop() {
            trace!(provider = type_name, "Releasing scope-owned instance");
            drop(instance);
        }
        debug!(released, path = self.context.path(), "Request scope disposed");
    }
}

impl fmt::Debug for ScopedResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedResolver")
            .field("context", &self.context)
            .field("owned", &self.owned.lock().len())
            .finish()
    }
}
