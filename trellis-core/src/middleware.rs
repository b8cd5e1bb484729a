// Middleware pipeline for request processing

use crate::logging::{debug, trace};
use crate::{Error, HttpContext, HttpStatus};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future produced by a pipeline stage
pub type StageFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// Type alias for the next stage in the middleware chain
pub type Next = Box<dyn FnOnce(Arc<HttpContext>) -> StageFuture + Send>;

/// Type alias for the terminal handler of a chain
pub type HandlerFn = Arc<dyn Fn(Arc<HttpContext>) -> StageFuture + Send + Sync>;

/// Middleware trait: a pipeline stage that either handles the request by
/// writing into the context's response slot or passes it on via `next`.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: Arc<HttpContext>, next: Next) -> Result<(), Error>;
}

/// Middleware chain executor
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
        }
    }

    /// Add a middleware to the chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.use_arc(Arc::new(middleware));
    }

    /// Add an already shared middleware to the chain
    pub fn use_arc(&mut self, middleware: Arc<dyn Middleware>) {
        let mut mws = (*self.middlewares).clone();
        mws.push(middleware);
        self.middlewares = Arc::new(mws);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the chain; a request nobody handled gets a 404
    pub async fn run(&self, ctx: Arc<HttpContext>) -> Result<(), Error> {
        let not_found: HandlerFn = Arc::new(|ctx: Arc<HttpContext>| {
            Box::pin(async move {
                trace!(path = ctx.path(), "No stage handled the request");
                ctx.set_status(HttpStatus::NotFound.code());
                Ok(())
            }) as StageFuture
        });
        self.apply(ctx, not_found).await
    }

    /// Execute the middleware chain ending in `handler`
    pub async fn apply(&self, ctx: Arc<HttpContext>, handler: HandlerFn) -> Result<(), Error> {
        debug!(
            middleware_count = self.middlewares.len(),
            path = ctx.path(),
            method = %ctx.method(),
            "Executing middleware chain"
        );
        self.execute_from(0, ctx, handler).await
    }

    fn execute_from(&self, index: usize, ctx: Arc<HttpContext>, handler: HandlerFn) -> StageFuture {
        if index >= self.middlewares.len() {
            trace!("Middleware chain complete, calling handler");
            handler(ctx)
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();

            trace!(middleware_index = index, "Executing middleware");
            Box::pin(async move {
                middleware
                    .handle(
                        ctx,
                        Box::new(move |ctx: Arc<HttpContext>| {
                            chain.execute_from(index + 1, ctx, handler)
                        }),
                    )
                    .await
            })
        }
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}
