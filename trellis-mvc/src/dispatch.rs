//! The dispatch pipeline stage

use crate::coercion::CoercionRegistry;
use crate::fault::DispatchFault;
use crate::invoker::{ActionInvoker, DispatchProgress, DispatchState};
use crate::options::DispatchOptions;
use crate::resolver::ActionResolver;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info_span, trace, warn, Instrument};
use trellis_core::{Container, Error, HttpContext, Middleware, Next, ScopedResolver};

/// Pipeline stage that dispatches resolved requests to controller actions.
///
/// Requests without a resolved action pass through to the next stage. Every
/// dispatch runs in its own [`ScopedResolver`], released when the dispatch
/// ends however it ends. Faults never escape: they are logged and answered
/// with [`DispatchOptions::fault_status`].
pub struct DispatchMiddleware {
    container: Arc<Container>,
    resolver: Arc<dyn ActionResolver>,
    coercion: Arc<CoercionRegistry>,
    options: DispatchOptions,
}

impl DispatchMiddleware {
    pub fn new(container: Arc<Container>, resolver: impl ActionResolver + 'static) -> Self {
        Self {
            container,
            resolver: Arc::new(resolver),
            coercion: Arc::new(CoercionRegistry::with_defaults()),
            options: DispatchOptions::default(),
        }
    }

    /// Replace the default coercion registry
    pub fn with_coercion(mut self, registry: CoercionRegistry) -> Self {
        self.coercion = Arc::new(registry);
        self
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Run one dispatch.
    ///
    /// Returns `Ok(None)` when no action matched the request and
    /// `Ok(Some(DispatchState::Done))` once a response was written.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use trellis_core::{Container, HttpContext, HttpMethod, HttpRequest};
    /// use trellis_mvc::{ActionTable, DispatchMiddleware};
    ///
    /// # tokio_test::block_on(async {
    /// let middleware = DispatchMiddleware::new(Arc::new(Container::new()), ActionTable::new());
    /// let ctx = Arc::new(HttpContext::new(HttpRequest::new(HttpMethod::GET, "/")));
    /// assert!(middleware.dispatch(&ctx).await.unwrap().is_none());
    /// # });
    /// ```
    pub async fn dispatch(
        &self,
        ctx: &Arc<HttpContext>,
    ) -> Result<Option<DispatchState>, DispatchFault> {
        let mut progress = DispatchProgress::new();
        let Some(action) = self.resolver.resolve(ctx) else {
            return Ok(None);
        };

        let span = info_span!(
            "dispatch",
            controller = action.controller().name(),
            action = action.name(),
            method = %ctx.method(),
            path = ctx.path(),
        );

        async {
            let scope = ScopedResolver::new(self.container.clone(), ctx.clone());
            if ctx.cancellation().is_cancelled() {
                return Err(progress.fault(Error::Cancelled(
                    "cancelled before dispatch".to_string(),
                )));
            }

            let controller = match action.controller().create(&scope) {
                Ok(controller) => controller,
                Err(err) => return Err(progress.fault(err)),
            };

            ActionInvoker::new(&self.coercion, &self.options)
                .invoke(&mut progress, &action, controller, &scope)
                .await?;

            trace!("Dispatch complete");
            Ok(Some(progress.state()))
        }
        .instrument(span)
        .await
    }

    fn write_fault(&self, ctx: &HttpContext, fault: &DispatchFault) {
        if fault.is_cancelled() {
            warn!(
                phase = ?fault.phase,
                error = %fault.error,
                path = ctx.path(),
                "Dispatch cancelled"
            );
        } else {
            error!(
                phase = ?fault.phase,
                error = %fault.error,
                path = ctx.path(),
                "Dispatch failed"
            );
        }
        ctx.set_status(self.options.fault_status);
    }
}

#[async_trait]
impl Middleware for DispatchMiddleware {
    async fn handle(&self, ctx: Arc<HttpContext>, next: Next) -> Result<(), Error> {
        match AssertUnwindSafe(self.dispatch(&ctx)).catch_unwind().await {
            Ok(Ok(Some(_))) => Ok(()),
            Ok(Ok(None)) => {
                trace!(path = ctx.path(), "No action resolved, passing request on");
                next(ctx).await
            }
            Ok(Err(fault)) => {
                self.write_fault(&ctx, &fault);
                Ok(())
            }
            Err(_) => {
                let fault = DispatchFault::new(
                    DispatchState::Faulted,
                    Error::Internal("dispatch panicked".to_string()),
                );
                self.write_fault(&ctx, &fault);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ActionDescriptor, Controller, ParameterDescriptor};
    use crate::resolver::ActionTable;
    use crate::result::ActionOutput;
    use trellis_core::{HttpMethod, HttpRequest, MiddlewareChain};

    struct Ping;

    impl Controller for Ping {
        fn create(_: &ScopedResolver) -> Result<Self, Error> {
            Ok(Ping)
        }
    }

    struct Broken;

    impl Controller for Broken {
        fn create(_: &ScopedResolver) -> Result<Self, Error> {
            Err(Error::DependencyInjection("no database".into()))
        }
    }

    fn table() -> ActionTable {
        let mut table = ActionTable::new();
        table
            .add(
                HttpMethod::GET,
                "/ping",
                ActionDescriptor::builder::<Ping>("ping")
                    .param(ParameterDescriptor::new::<String>("name").with_default("pong".to_string()))
                    .handler(|_, mut args| Ok(Some(ActionOutput::text(args.take::<String>("name")?))))
                    .unwrap(),
            )
            .add(
                HttpMethod::GET,
                "/broken",
                ActionDescriptor::builder::<Broken>("index")
                    .handler(|_, _| Ok(Some(ActionOutput::text("unreachable"))))
                    .unwrap(),
            )
            .add(
                HttpMethod::GET,
                "/panic",
                ActionDescriptor::builder::<Ping>("panic")
                    .handler_async(|_, _| async { panic!("handler bug") })
                    .unwrap(),
            );
        table
    }

    async fn run(path: &str, options: DispatchOptions) -> trellis_core::HttpResponse {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(
            DispatchMiddleware::new(Arc::new(Container::new()), table()).with_options(options),
        );
        let ctx = Arc::new(HttpContext::new(HttpRequest::new(HttpMethod::GET, path)));
        chain.run(ctx.clone()).await.unwrap();
        ctx.take_response()
    }

    #[tokio::test]
    async fn test_dispatches_resolved_action() {
        let response = run("/ping?name=hello", DispatchOptions::default()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "hello");

        let response = run("/ping", DispatchOptions::default()).await;
        assert_eq!(response.body_text(), "pong");
    }

    #[tokio::test]
    async fn test_unresolved_passes_through() {
        let response = run("/missing", DispatchOptions::default()).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_controller_construction_fault() {
        let response = run("/broken", DispatchOptions::default()).await;
        assert_eq!(response.status, 500);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let options = DispatchOptions {
            fault_status: 503,
            ..DispatchOptions::default()
        };
        let response = run("/panic", options).await;
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_dispatch_reports_fault_phase() {
        let middleware = DispatchMiddleware::new(Arc::new(Container::new()), table());
        let ctx = Arc::new(HttpContext::new(HttpRequest::new(HttpMethod::GET, "/broken")));
        let fault = middleware.dispatch(&ctx).await.unwrap_err();
        assert_eq!(fault.phase, DispatchState::Resolving);
    }
}
