//! Bound argument values handed to an action

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use trellis_core::{Error, Instance};

/// Owned type-erased value produced by coercion or a default
pub type BoxedValue = Box<dyn Any + Send>;

/// A single bound parameter value
pub enum BoundValue {
    /// Nothing supplied a value and the parameter is nullable
    Null,
    /// A value created for this dispatch
    Owned(BoxedValue),
    /// An instance resolved from the request scope
    Shared(Instance),
}

impl BoundValue {
    pub fn is_null(&self) -> bool {
        matches!(self, BoundValue::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            BoundValue::Null => "null",
            BoundValue::Owned(_) => "owned",
            BoundValue::Shared(_) => "shared",
        }
    }
}

impl fmt::Debug for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// The ordered argument list for one invocation.
///
/// Values are taken out by parameter name; each can be taken once.
#[derive(Debug, Default)]
pub struct ActionArguments {
    values: Vec<(String, BoundValue)>,
}

impl ActionArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: BoundValue) {
        self.values.push((name.into(), value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameter names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_null(&self, name: &str) -> bool {
        self.values
            .iter()
            .any(|(n, value)| n == name && value.is_null())
    }

    /// Take a required owned value
    pub fn take<T: Any>(&mut self, name: &str) -> Result<T, Error> {
        match self.remove(name)? {
            BoundValue::Owned(value) => value.downcast::<T>().map(|value| *value).map_err(|_| {
                Error::Binding(format!(
                    "argument '{}' is not a {}",
                    name,
                    std::any::type_name::<T>()
                ))
            }),
            BoundValue::Shared(_) => Err(Error::Binding(format!(
                "argument '{}' was resolved from the container; take it with `shared`",
                name
            ))),
            BoundValue::Null => Err(Error::Binding(format!("argument '{}' is null", name))),
        }
    }

    /// Take a nullable owned value
    pub fn take_opt<T: Any>(&mut self, name: &str) -> Result<Option<T>, Error> {
        if self.is_null(name) {
            self.remove(name)?;
            return Ok(None);
        }
        self.take(name).map(Some)
    }

    /// Take a value as a shared reference, whichever way it was bound
    pub fn shared<T: Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>, Error> {
        let mismatch = || {
            Error::Binding(format!(
                "argument '{}' is not a {}",
                name,
                std::any::type_name::<T>()
            ))
        };
        match self.remove(name)? {
            BoundValue::Shared(instance) => instance.downcast::<T>().map_err(|_| mismatch()),
            BoundValue::Owned(value) => value
                .downcast::<T>()
                .map(|value| Arc::new(*value))
                .map_err(|_| mismatch()),
            BoundValue::Null => Err(Error::Binding(format!("argument '{}' is null", name))),
        }
    }

    fn remove(&mut self, name: &str) -> Result<BoundValue, Error> {
        let index = self
            .values
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::Binding(format!("no argument named '{}'", name)))?;
        Ok(self.values.remove(index).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Repo;

    #[test]
    fn test_take_by_name() {
        let mut args = ActionArguments::new();
        args.push("id", BoundValue::Owned(Box::new(7i32)));
        args.push("q", BoundValue::Null);
        args.push("repo", BoundValue::Shared(Arc::new(Repo)));
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["id", "q", "repo"]);

        assert_eq!(args.take::<i32>("id").unwrap(), 7);
        assert!(args.take::<i32>("id").is_err());
        assert_eq!(args.take_opt::<String>("q").unwrap(), None);
        assert!(args.shared::<Repo>("repo").is_ok());
        assert!(args.is_empty());
    }

    #[test]
    fn test_type_mismatch_is_binding_error() {
        let mut args = ActionArguments::new();
        args.push("id", BoundValue::Owned(Box::new(7i32)));
        assert!(matches!(args.take::<String>("id"), Err(Error::Binding(_))));
    }

    #[test]
    fn test_shared_from_owned() {
        let mut args = ActionArguments::new();
        args.push("name", BoundValue::Owned(Box::new("ann".to_string())));
        assert_eq!(*args.shared::<String>("name").unwrap(), "ann");
    }
}
