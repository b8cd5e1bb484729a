//! Controller and action metadata
//!
//! An [`ActionDescriptor`] is the read-only description of one invokable
//! controller method: its owning controller, its ordered parameters and the
//! shape of its return value. Descriptors are built once at startup and shared
//! across dispatches.

use crate::arguments::{ActionArguments, BoxedValue};
use crate::result::{ActionOutput, ActionReturn};
use crate::source::{ParameterSourceSet, SourceAnnotation, SourceConflict};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;
use trellis_core::{Error, Instance, ScopedResolver};

/// Deserializes a JSON document into a boxed value of a fixed type
pub type JsonReader = fn(&str) -> Result<BoxedValue, serde_json::Error>;

/// Produces a fresh copy of a parameter's declared default
pub type DefaultFactory = Arc<dyn Fn() -> BoxedValue + Send + Sync>;

/// Type-erased action entry point
pub type ActionHandler =
    Arc<dyn Fn(Instance, ActionArguments) -> Result<ActionReturn, Error> + Send + Sync>;

fn read_json<T: DeserializeOwned + Send + 'static>(text: &str) -> Result<BoxedValue, serde_json::Error> {
    serde_json::from_str::<T>(text).map(|value| Box::new(value) as BoxedValue)
}

/// Runtime description of a parameter's declared type
#[derive(Clone, Copy)]
pub struct ParamType {
    id: TypeId,
    name: &'static str,
    nullable: bool,
    json: Option<JsonReader>,
}

impl ParamType {
    pub fn of<T: Any + Send>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            nullable: false,
            json: None,
        }
    }

    /// A type that can also be read from a JSON body
    pub fn json<T: DeserializeOwned + Any + Send>() -> Self {
        Self {
            json: Some(read_json::<T>),
            ..Self::of::<T>()
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether an unresolvable value binds as null instead of failing
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_string(&self) -> bool {
        self.id == TypeId::of::<String>()
    }

    pub fn json_reader(&self) -> Option<JsonReader> {
        self.json
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamType")
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .field("json", &self.json.is_some())
            .finish()
    }
}

#[derive(Clone)]
struct DefaultValue {
    type_id: TypeId,
    factory: DefaultFactory,
}

/// One declared parameter of an action
#[derive(Clone)]
pub struct ParameterDescriptor {
    name: String,
    ty: ParamType,
    default: Option<DefaultValue>,
    annotations: Vec<SourceAnnotation>,
    sources: Result<ParameterSourceSet, SourceConflict>,
}

impl ParameterDescriptor {
    /// A required parameter of type `T`
    pub fn new<T: Any + Send>(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::of::<T>())
    }

    /// A parameter of type `T` that binds as null when nothing supplies it
    pub fn optional<T: Any + Send>(name: impl Into<String>) -> Self {
        Self::new::<T>(name).nullable()
    }

    /// A parameter deserialized from the JSON request body
    pub fn body<T: DeserializeOwned + Any + Send>(name: impl Into<String>) -> Self {
        Self::json::<T>(name).from_body()
    }

    /// A parameter of a JSON-readable type, bound from request sources
    /// unless annotated otherwise
    pub fn json<T: DeserializeOwned + Any + Send>(name: impl Into<String>) -> Self {
        Self::typed(name, ParamType::json::<T>())
    }

    pub fn typed(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            annotations: Vec::new(),
            sources: Ok(ParameterSourceSet::ANY),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.ty.nullable = true;
        self
    }

    pub fn from_query(self) -> Self {
        self.annotate(SourceAnnotation::FromQuery)
    }

    pub fn from_header(self) -> Self {
        self.annotate(SourceAnnotation::FromHeader)
    }

    pub fn from_form(self) -> Self {
        self.annotate(SourceAnnotation::FromForm)
    }

    pub fn from_body(self) -> Self {
        self.annotate(SourceAnnotation::FromBody)
    }

    pub fn annotate(mut self, annotation: SourceAnnotation) -> Self {
        self.annotations.push(annotation);
        self.sources = ParameterSourceSet::classify(&self.annotations);
        self
    }

    /// Declare a default used when no source supplies a value
    pub fn with_default<T: Clone + Any + Send + Sync>(mut self, value: T) -> Self {
        self.default = Some(DefaultValue {
            type_id: TypeId::of::<T>(),
            factory: Arc::new(move || Box::new(value.clone()) as BoxedValue),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ParamType {
        &self.ty
    }

    pub fn annotations(&self) -> &[SourceAnnotation] {
        &self.annotations
    }

    /// Classification computed from the annotations
    pub fn sources(&self) -> Result<ParameterSourceSet, SourceConflict> {
        self.sources
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// A fresh copy of the declared default
    pub fn default_value(&self) -> Option<BoxedValue> {
        self.default.as_ref().map(|default| (default.factory)())
    }
}

impl fmt::Debug for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("sources", &self.sources)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Whether an action completes immediately or yields a deferred computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnDescriptor {
    pub kind: ReturnKind,
}

impl ReturnDescriptor {
    pub fn is_async(&self) -> bool {
        self.kind == ReturnKind::Async
    }
}

/// A controller type whose methods can be dispatched to.
///
/// Controllers are constructed fresh for every dispatch against the request
/// scope, so constructor dependencies come from the same [`ScopedResolver`]
/// that parameter binding uses.
pub trait Controller: Send + Sync + Sized + 'static {
    /// Construct an instance for the current dispatch
    fn create(resolver: &ScopedResolver) -> Result<Self, Error>;

    /// Display name, used in logs and view lookup.
    ///
    /// The last path segment of the type name, without generic arguments.
    fn name() -> &'static str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// Type-erased controller metadata
#[derive(Clone, Copy)]
pub struct ControllerDescriptor {
    name: &'static str,
    type_id: TypeId,
    factory: fn(&ScopedResolver) -> Result<Instance, Error>,
}

fn construct<C: Controller>(resolver: &ScopedResolver) -> Result<Instance, Error> {
    C::create(resolver).map(|controller| Arc::new(controller) as Instance)
}

impl ControllerDescriptor {
    pub fn of<C: Controller>() -> Self {
        Self {
            name: C::name(),
            type_id: TypeId::of::<C>(),
            factory: construct::<C>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Build a controller instance in `resolver`'s scope
    pub fn create(&self, resolver: &ScopedResolver) -> Result<Instance, Error> {
        (self.factory)(resolver)
    }
}

impl fmt::Debug for ControllerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ControllerDescriptor").field(&self.name).finish()
    }
}

/// Metadata and entry point for a single controller action
pub struct ActionDescriptor {
    controller: ControllerDescriptor,
    name: String,
    parameters: Vec<ParameterDescriptor>,
    returns: ReturnDescriptor,
    handler: ActionHandler,
}

impl ActionDescriptor {
    pub fn builder<C: Controller>(name: impl Into<String>) -> ActionBuilder<C> {
        ActionBuilder {
            name: name.into(),
            parameters: Vec::new(),
            _controller: PhantomData,
        }
    }

    pub fn controller(&self) -> &ControllerDescriptor {
        &self.controller
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn returns(&self) -> ReturnDescriptor {
        self.returns
    }

    /// Call the action on `controller`
    pub fn invoke(&self, controller: Instance, args: ActionArguments) -> Result<ActionReturn, Error> {
        (self.handler)(controller, args)
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("controller", &self.controller.name)
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish()
    }
}

/// Builder for [`ActionDescriptor`]; finished by attaching a handler
pub struct ActionBuilder<C> {
    name: String,
    parameters: Vec<ParameterDescriptor>,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Controller> ActionBuilder<C> {
    /// Append the next parameter in declaration order
    pub fn param(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Finish with an action that completes immediately.
    ///
    /// `Ok(None)` is a null return and faults the dispatch.
    pub fn handler<F>(self, handler: F) -> Result<ActionDescriptor, Error>
    where
        F: Fn(Arc<C>, ActionArguments) -> Result<Option<ActionOutput>, Error> + Send + Sync + 'static,
    {
        self.finish(
            ReturnKind::Sync,
            Arc::new(move |controller: Instance, args: ActionArguments| {
                handler(downcast::<C>(controller)?, args).map(ActionReturn::Ready)
            }),
        )
    }

    /// Finish with an action returning a deferred computation.
    ///
    /// A computation completing with `Ok(None)` writes empty content.
    pub fn handler_async<F, Fut>(self, handler: F) -> Result<ActionDescriptor, Error>
    where
        F: Fn(Arc<C>, ActionArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<ActionOutput>, Error>> + Send + 'static,
    {
        self.finish(
            ReturnKind::Async,
            Arc::new(move |controller: Instance, args: ActionArguments| {
                Ok(ActionReturn::Deferred(
                    handler(downcast::<C>(controller)?, args).boxed(),
                ))
            }),
        )
    }

    fn finish(self, kind: ReturnKind, handler: ActionHandler) -> Result<ActionDescriptor, Error> {
        let controller = ControllerDescriptor::of::<C>();
        if self.name.is_empty() {
            return Err(Error::Internal(format!(
                "action on {} has an empty name",
                controller.name
            )));
        }

        let mut seen = HashSet::new();
        for parameter in &self.parameters {
            if parameter.name.is_empty() {
                return Err(Error::Internal(format!(
                    "{}.{} declares a parameter with an empty name",
                    controller.name, self.name
                )));
            }
            if !seen.insert(parameter.name.to_ascii_lowercase()) {
                return Err(Error::Internal(format!(
                    "{}.{} declares parameter '{}' twice",
                    controller.name, self.name, parameter.name
                )));
            }
            if let Some(default) = &parameter.default {
                if default.type_id != parameter.ty.id {
                    return Err(Error::Internal(format!(
                        "default for {}.{}({}) is not a {}",
                        controller.name, self.name, parameter.name, parameter.ty.name
                    )));
                }
            }
            // Conflicts surface as binding faults on every dispatch; flag them early too.
            if let Err(conflict) = parameter.sources {
                warn!(
                    controller = controller.name,
                    action = %self.name,
                    parameter = %parameter.name,
                    %conflict,
                    "Parameter declares conflicting sources"
                );
            }
        }

        Ok(ActionDescriptor {
            controller,
            name: self.name,
            parameters: self.parameters,
            returns: ReturnDescriptor { kind },
            handler,
        })
    }
}

fn downcast<C: Controller>(controller: Instance) -> Result<Arc<C>, Error> {
    controller.downcast::<C>().map_err(|_| {
        Error::Internal(format!(
            "controller instance is not a {}",
            std::any::type_name::<C>()
        ))
    })
}
