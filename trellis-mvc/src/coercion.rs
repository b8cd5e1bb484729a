//! String-to-type coercion strategies
//!
//! A [`CoercionRegistry`] maps a target type to the mechanisms able to turn a
//! raw request string into a value of that type. Two kinds exist, checked in
//! this order:
//!
//! 1. **try-parse**: a non-throwing parser returning `None` on malformed input.
//!    A rejection is not fatal; the caller falls through to further sources.
//! 2. **converter**: a general converter whose rejection is a definite
//!    failure for the parameter.
//!
//! A type with neither kind registered is reported as exhausted.

use crate::arguments::BoxedValue;
use crate::descriptor::ParamType;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

type TryParseFn = Arc<dyn Fn(&str) -> Option<BoxedValue> + Send + Sync>;
type ConvertFn = Arc<dyn Fn(&str) -> Result<BoxedValue, String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    TryParse,
    Converter,
}

#[derive(Clone, Default)]
struct Strategies {
    type_name: &'static str,
    try_parse: Vec<TryParseFn>,
    converter: Option<ConvertFn>,
}

/// Result of attempting a coercion
pub enum Coercion {
    Parsed(BoxedValue),
    /// Every try-parse strategy declined and no converter exists
    Declined,
    /// The converter rejected the input
    Rejected(String),
    /// No strategy is registered for the type
    Exhausted,
}

impl fmt::Debug for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coercion::Parsed(_) => f.write_str("Parsed"),
            Coercion::Declined => f.write_str("Declined"),
            Coercion::Rejected(cause) => f.debug_tuple("Rejected").field(cause).finish(),
            Coercion::Exhausted => f.write_str("Exhausted"),
        }
    }
}

/// Registry of coercion strategies keyed by target type
#[derive(Clone, Default)]
pub struct CoercionRegistry {
    strategies: HashMap<TypeId, Strategies>,
}

impl CoercionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering primitives, identifiers and common std types
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register_try_parse::<i8>()
            .register_try_parse::<i16>()
            .register_try_parse::<i32>()
            .register_try_parse::<i64>()
            .register_try_parse::<i128>()
            .register_try_parse::<isize>()
            .register_try_parse::<u8>()
            .register_try_parse::<u16>()
            .register_try_parse::<u32>()
            .register_try_parse::<u64>()
            .register_try_parse::<u128>()
            .register_try_parse::<usize>()
            .register_try_parse::<f32>()
            .register_try_parse::<f64>()
            // whitespace is a valid char, so no trimming
            .register_try_parse_with::<char, _>(|raw| raw.parse().ok())
            .register_try_parse::<uuid::Uuid>()
            .register_try_parse_with::<bool, _>(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            })
            .register_from_str::<IpAddr>()
            .register_from_str::<Ipv4Addr>()
            .register_from_str::<Ipv6Addr>()
            .register_from_str::<SocketAddr>()
            .register_from_str::<PathBuf>()
            .register_converter::<serde_json::Value, _, _>(|raw: &str| {
                serde_json::from_str::<serde_json::Value>(raw)
            });
        registry
    }

    /// Register `T`'s `FromStr` as a try-parse strategy
    pub fn register_try_parse<T: FromStr + Any + Send>(&mut self) -> &mut Self {
        self.register_try_parse_with::<T, _>(|raw| raw.trim().parse().ok())
    }

    pub fn register_try_parse_with<T, F>(&mut self, parse: F) -> &mut Self
    where
        T: Any + Send,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        self.slot::<T>()
            .try_parse
            .push(Arc::new(move |raw: &str| parse(raw).map(|value| Box::new(value) as BoxedValue)));
        self
    }

    /// Register `T`'s `FromStr` as the converter
    pub fn register_from_str<T>(&mut self) -> &mut Self
    where
        T: FromStr + Any + Send,
        T::Err: Display,
    {
        self.register_converter::<T, _, _>(|raw: &str| raw.parse::<T>())
    }

    /// Register the converter for `T`, replacing any earlier one
    pub fn register_converter<T, E, F>(&mut self, convert: F) -> &mut Self
    where
        T: Any + Send,
        E: Display,
        F: Fn(&str) -> Result<T, E> + Send + Sync + 'static,
    {
        self.slot::<T>().converter = Some(Arc::new(move |raw: &str| {
            convert(raw)
                .map(|value| Box::new(value) as BoxedValue)
                .map_err(|e| e.to_string())
        }));
        self
    }

    /// Whether a strategy of `kind` exists for `type_id`
    pub fn has_strategy(&self, type_id: TypeId, kind: StrategyKind) -> bool {
        self.strategies
            .get(&type_id)
            .map(|strategies| match kind {
                StrategyKind::TryParse => !strategies.try_parse.is_empty(),
                StrategyKind::Converter => strategies.converter.is_some(),
            })
            .unwrap_or(false)
    }

    /// Names of every type with at least one strategy
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.values().map(|s| s.type_name).collect();
        names.sort_unstable();
        names
    }

    /// Coerce `raw` into a value of `ty`
    pub fn coerce(&self, ty: &ParamType, raw: &str) -> Coercion {
        let Some(strategies) = self.strategies.get(&ty.id()) else {
            return Coercion::Exhausted;
        };

        if let Some(value) = strategies.try_parse.iter().find_map(|parse| parse(raw)) {
            return Coercion::Parsed(value);
        }

        match &strategies.converter {
            Some(convert) => match convert(raw) {
                Ok(value) => Coercion::Parsed(value),
                Err(cause) => Coercion::Rejected(cause),
            },
            None if strategies.try_parse.is_empty() => Coercion::Exhausted,
            None => Coercion::Declined,
        }
    }

    fn slot<T: Any>(&mut self) -> &mut Strategies {
        self.strategies
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Strategies {
                type_name: std::any::type_name::<T>(),
                ..Strategies::default()
            })
    }
}

impl fmt::Debug for CoercionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoercionRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed<T: Any + Copy>(coercion: Coercion) -> T {
        match coercion {
            Coercion::Parsed(value) => *value.downcast::<T>().unwrap(),
            other => panic!("expected a parsed value, got {:?}", other),
        }
    }

    #[test]
    fn test_default_primitives() {
        let registry = CoercionRegistry::with_defaults();
        assert_eq!(parsed::<i32>(registry.coerce(&ParamType::of::<i32>(), "42")), 42);
        assert_eq!(parsed::<i32>(registry.coerce(&ParamType::of::<i32>(), " 7 ")), 7);
        assert_eq!(parsed::<f64>(registry.coerce(&ParamType::of::<f64>(), "2.5")), 2.5);
        assert!(parsed::<bool>(registry.coerce(&ParamType::of::<bool>(), "TRUE")));
        assert!(registry.has_strategy(TypeId::of::<uuid::Uuid>(), StrategyKind::TryParse));
    }

    #[test]
    fn test_char_keeps_whitespace() {
        let registry = CoercionRegistry::with_defaults();
        let ty = ParamType::of::<char>();
        assert_eq!(parsed::<char>(registry.coerce(&ty, " ")), ' ');
        assert_eq!(parsed::<char>(registry.coerce(&ty, "x")), 'x');
        assert!(matches!(registry.coerce(&ty, " x "), Coercion::Declined));
    }

    #[test]
    fn test_try_parse_rejection_declines() {
        let registry = CoercionRegistry::with_defaults();
        assert!(matches!(
            registry.coerce(&ParamType::of::<i32>(), "abc"),
            Coercion::Declined
        ));
    }

    #[test]
    fn test_converter_rejection_is_definite() {
        let registry = CoercionRegistry::with_defaults();
        assert!(matches!(
            registry.coerce(&ParamType::of::<IpAddr>(), "not-an-ip"),
            Coercion::Rejected(_)
        ));
        assert_eq!(
            parsed::<IpAddr>(registry.coerce(&ParamType::of::<IpAddr>(), "127.0.0.1")),
            IpAddr::from([127, 0, 0, 1])
        );
    }

    #[test]
    fn test_try_parse_falls_back_to_converter() {
        let mut registry = CoercionRegistry::new();
        registry
            .register_try_parse::<u16>()
            .register_converter::<u16, _, _>(|raw: &str| match raw {
                "max" => Ok(u16::MAX),
                other => Err(format!("'{}' is not a port", other)),
            });

        let ty = ParamType::of::<u16>();
        assert_eq!(parsed::<u16>(registry.coerce(&ty, "80")), 80);
        assert_eq!(parsed::<u16>(registry.coerce(&ty, "max")), u16::MAX);
        assert!(matches!(registry.coerce(&ty, "min"), Coercion::Rejected(_)));
    }

    #[test]
    fn test_unregistered_type_is_exhausted() {
        struct Opaque;
        let registry = CoercionRegistry::with_defaults();
        assert!(matches!(
            registry.coerce(&ParamType::of::<Opaque>(), "x"),
            Coercion::Exhausted
        ));
    }
}
