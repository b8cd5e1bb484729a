//! Controller action dispatch for Trellis.
//!
//! Given a request already mapped to an [`ActionDescriptor`], this crate
//! builds the controller in a request scope, binds each parameter from the
//! request or the container, invokes the action and writes its result.
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis_core::{Container, Error, HttpMethod, MiddlewareChain, ScopedResolver};
//! use trellis_mvc::*;
//!
//! struct Greeter;
//!
//! impl Controller for Greeter {
//!     fn create(_: &ScopedResolver) -> Result<Self, Error> {
//!         Ok(Greeter)
//!     }
//! }
//!
//! # fn main() -> Result<(), Error> {
//! let mut actions = ActionTable::new();
//! actions.add(
//!     HttpMethod::GET,
//!     "/hello",
//!     ActionDescriptor::builder::<Greeter>("hello")
//!         .param(ParameterDescriptor::new::<String>("name").from_query())
//!         .handler(|_, mut args| {
//!             let name = args.take::<String>("name")?;
//!             Ok(Some(ActionOutput::text(format!("Hello, {}!", name))))
//!         })?,
//! );
//!
//! let mut chain = MiddlewareChain::new();
//! chain.use_middleware(DispatchMiddleware::new(Arc::new(Container::new()), actions));
//! # Ok(())
//! # }
//! ```

pub mod arguments;
pub mod binder;
pub mod coercion;
pub mod descriptor;
pub mod dispatch;
pub mod fault;
pub mod invoker;
pub mod options;
pub mod resolver;
pub mod result;
pub mod source;
pub mod view;

pub use arguments::{ActionArguments, BoundValue, BoxedValue};
pub use binder::{BindingOutcome, ValueBinder};
pub use coercion::{Coercion, CoercionRegistry, StrategyKind};
pub use descriptor::{
    ActionBuilder, ActionDescriptor, ActionHandler, Controller, ControllerDescriptor, ParamType,
    ParameterDescriptor, ReturnDescriptor, ReturnKind,
};
pub use dispatch::DispatchMiddleware;
pub use fault::{BindingError, DispatchFault};
pub use invoker::{ActionInvoker, DispatchProgress, DispatchState};
pub use options::DispatchOptions;
pub use resolver::{ActionResolver, ActionTable};
pub use result::{
    ActionOutput, ActionResult, ActionResultContext, ActionReturn, ContentResult, JsonResult,
    StatusCodeResult,
};
pub use source::{ParameterSource, ParameterSourceSet, SourceAnnotation, SourceConflict};
pub use view::{ViewEngine, ViewEngineHandle, ViewResult};
