// Process-wide dependency registry

use crate::logging::{debug, trace};
use crate::{Error, Provider, ScopedResolver};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased shared instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased factory run against the current request scope
pub type InstanceFactory = Arc<dyn Fn(&ScopedResolver) -> Result<Instance, Error> + Send + Sync>;

/// How long a resolved instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance for the whole process
    Singleton,
    /// One instance per dispatch, released with the scope
    Scoped,
    /// A new instance on every resolution, released with the scope
    Transient,
}

pub(crate) enum Registration {
    Singleton(Instance),
    Scoped(InstanceFactory),
    Transient(InstanceFactory),
}

pub(crate) struct Entry {
    pub(crate) type_name: &'static str,
    pub(crate) registration: Registration,
}

/// The dependency injection container.
///
/// Registration needs `&mut self`; once startup is done the container is
/// shared as `Arc<Container>` and can no longer change. Request-specific
/// composition happens in [`ScopedResolver`], never here.
#[derive(Default)]
pub struct Container {
    entries: HashMap<TypeId, Entry>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new DI container");
        Self::default()
    }

    /// Register a singleton provider instance
    pub fn register<T: Provider>(&mut self, instance: T) {
        self.register_arc(Arc::new(instance));
    }

    /// Register a singleton that is already shared
    pub fn register_arc<T: Provider>(&mut self, instance: Arc<T>) {
        self.insert::<T>(Registration::Singleton(instance));
    }

    /// Register a singleton built eagerly by `factory`
    pub fn register_factory<T: Provider, F>(&mut self, factory: F)
    where
        F: FnOnce() -> T,
    {
        debug!(
            provider = std::any::type_name::<T>(),
            "Creating provider from factory"
        );
        self.register(factory());
    }

    /// Register a provider created at most once per dispatch
    pub fn register_scoped<T: Provider, F>(&mut self, factory: F)
    where
        F: Fn(&ScopedResolver) -> Result<T, Error> + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Scoped(erase(factory)));
    }

    /// Register a provider created anew on every resolution
    pub fn register_transient<T: Provider, F>(&mut self, factory: F)
    where
        F: Fn(&ScopedResolver) -> Result<T, Error> + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Transient(erase(factory)));
    }

    /// Resolve a singleton by type.
    ///
    /// Scoped and transient providers need a request scope; use
    /// [`ScopedResolver::resolve`] for those.
    pub fn resolve<T: Provider>(&self) -> Result<Arc<T>, Error> {
        let type_name = std::any::type_name::<T>();
        trace!(provider = type_name, "Attempting to resolve provider");

        match self.entries.get(&TypeId::of::<T>()) {
            Some(Entry {
                registration: Registration::Singleton(instance),
                ..
            }) => instance.clone().downcast::<T>().map_err(|_| {
                Error::DependencyInjection(format!("Provider type mismatch: {}", type_name))
            }),
            Some(_) => Err(Error::DependencyInjection(format!(
                "Provider {} requires a request scope",
                type_name
            ))),
            None => Err(Error::ProviderNotFound(format!(
                "Provider not found: {}",
                type_name
            ))),
        }
    }

    /// Check if a provider is registered
    pub fn has<T: Provider>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn lifetime_of(&self, type_id: TypeId) -> Option<Lifetime> {
        self.entries.get(&type_id).map(|entry| match entry.registration {
            Registration::Singleton(_) => Lifetime::Singleton,
            Registration::Scoped(_) => Lifetime::Scoped,
            Registration::Transient(_) => Lifetime::Transient,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of every registered provider type
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn entry(&self, type_id: &TypeId) -> Option<&Entry> {
        self.entries.get(type_id)
    }

    fn insert<T: Provider>(&mut self, registration: Registration) {
        let type_name = std::any::type_name::<T>();
        let replaced = self
            .entries
            .insert(
                TypeId::of::<T>(),
                Entry {
                    type_name,
                    registration,
                },
            )
            .is_some();

        debug!(provider = type_name, replaced, "Provider registered in DI container");
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.type_names())
            .finish()
    }
}

fn erase<T: Provider, F>(factory: F) -> InstanceFactory
where
    F: Fn(&ScopedResolver) -> Result<T, Error> + Send + Sync + 'static,
{
    Arc::new(move |scope: &ScopedResolver| factory(scope).map(|value| Arc::new(value) as Instance))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter {
        greeting: String,
    }

    impl Provider for Greeter {}

    #[test]
    fn test_register_and_resolve() {
        let mut container = Container::new();
        container.register(Greeter {
            greeting: "hi".to_string(),
        });

        let resolved = container.resolve::<Greeter>().unwrap();
        assert_eq!(resolved.greeting, "hi");
        assert_eq!(container.lifetime_of(TypeId::of::<Greeter>()), Some(Lifetime::Singleton));
    }

    #[test]
    fn test_scoped_needs_scope() {
        let mut container = Container::new();
        container.register_scoped(|_| {
            Ok(Greeter {
                greeting: "scoped".to_string(),
            })
        });

        assert!(container.has::<Greeter>());
        assert!(matches!(
            container.resolve::<Greeter>(),
            Err(Error::DependencyInjection(_))
        ));
    }

    #[test]
    fn test_resolve_missing() {
        let container = Container::new();
        assert!(matches!(
            container.resolve::<Greeter>(),
            Err(Error::ProviderNotFound(_))
        ));
        assert!(container.is_empty());
    }
}
