// Trellis - controller action dispatch for Rust web pipelines
//
// A request that routing has mapped to a controller action is dispatched
// here: the controller is built in a request scope, every parameter is bound
// from the request or the container, and the action's result is written back.

// Re-export core functionality
pub use trellis_core::*;

// Re-export the dispatcher
pub use trellis_mvc::*;

pub use trellis_config;

pub mod prelude {
    pub use trellis_config::{ConfigManager, FileFormat};
    pub use trellis_core::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
    pub use trellis_core::{
        Container, Error, HttpContext, HttpMethod, HttpRequest, HttpResponse, Middleware,
        MiddlewareChain, Next, Provider, ScopedResolver,
    };
    pub use trellis_mvc::{
        ActionArguments, ActionDescriptor, ActionOutput, ActionResolver, ActionResult,
        ActionResultContext, ActionTable, CoercionRegistry, ContentResult, Controller,
        DispatchMiddleware, DispatchOptions, JsonResult, ParameterDescriptor, StatusCodeResult,
        ViewEngine, ViewEngineHandle, ViewResult,
    };

    pub use async_trait::async_trait;
}
